use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{default_seeds, Config, CrawlerConfig};
use crate::fingerprint::DEFAULT_SIMILARITY_THRESHOLD;
use crate::shard::SHARD_COUNT;

/// CLI entry point so users can control the crawler from the command line.
/// Exit codes: 0=success, 2=invalid arguments, 3=I/O or state error, 4=fatal crawl error
#[derive(Parser, Debug)]
#[command(name = "academic_crawler")]
#[command(about = "A polite, resumable crawler for the UCI academic domains")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Crawl the permitted domains, resuming from the save file unless --restart is given.
    Crawl {
        #[arg(
            short,
            long = "seed",
            help = "Seed URL (repeatable). Defaults to the homepage of every permitted domain"
        )]
        seeds: Vec<String>,

        #[arg(
            short,
            long,
            default_value = Config::DATA_DIR,
            help = "Directory for the save file, logs and accepted pages"
        )]
        data_dir: PathBuf,

        #[arg(
            long,
            default_value = Config::SAVE_FILE,
            help = "Ledger file; relative paths resolve inside the data directory"
        )]
        save_file: PathBuf,

        #[arg(
            long,
            default_value_t = SHARD_COUNT,
            help = "Worker count (fixed at one per domain shard)"
        )]
        threads: usize,

        #[arg(
            short,
            long,
            default_value_t = Config::FETCH_TIMEOUT_SECS,
            help = "Request timeout in seconds"
        )]
        timeout: u64,

        #[arg(
            short,
            long,
            default_value = Config::USER_AGENT,
            help = "User agent string for requests"
        )]
        user_agent: String,

        #[arg(long, help = "Discard the existing save file and start from the seeds")]
        restart: bool,

        #[arg(
            long,
            default_value_t = Config::POLITENESS_DELAY_MS,
            help = "Minimum delay between requests of one worker, in milliseconds"
        )]
        politeness_delay_ms: u64,

        #[arg(
            long,
            default_value_t = DEFAULT_SIMILARITY_THRESHOLD,
            help = "Fingerprint similarity above which a page counts as a near-duplicate"
        )]
        similarity_threshold: f64,

        #[arg(
            long,
            default_value_t = Config::POLL_INTERVAL_MS,
            help = "How often the supervisor checks for quiescence, in milliseconds"
        )]
        poll_interval_ms: u64,

        #[arg(
            long,
            default_value_t = Config::GRACE_PERIOD_SECS,
            help = "Seconds the crawl must stay idle before it is declared finished"
        )]
        grace_period_secs: u64,

        #[arg(
            long,
            default_value_t = Config::SAVE_INTERVAL_SECS,
            help = "Save interval in seconds (how often statistics are persisted)"
        )]
        save_interval_secs: u64,
    },

    /// Summarize the save file of a previous crawl without crawling.
    Status {
        #[arg(short, long, default_value = Config::DATA_DIR, help = "Directory containing crawl state")]
        data_dir: PathBuf,

        #[arg(long, default_value = Config::SAVE_FILE, help = "Ledger file")]
        save_file: PathBuf,

        #[arg(long, default_value_t = 10, help = "How many top words to list")]
        top_words: usize,
    },
}

impl Cli {
    /// Parse CLI arguments so the rest of the program can rely on structured options.
    /// On error, clap prints help and exits with code 2 (usage error).
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Commands {
    /// Runtime configuration for the `crawl` subcommand; `None` for others.
    pub fn crawler_config(&self) -> Option<CrawlerConfig> {
        match self {
            Commands::Crawl {
                seeds,
                data_dir,
                save_file,
                threads,
                timeout,
                user_agent,
                restart,
                politeness_delay_ms,
                similarity_threshold,
                poll_interval_ms,
                grace_period_secs,
                save_interval_secs,
            } => Some(CrawlerConfig {
                seed_urls: if seeds.is_empty() {
                    default_seeds()
                } else {
                    seeds.clone()
                },
                data_dir: data_dir.clone(),
                save_file: save_file.clone(),
                threads_count: *threads,
                user_agent: user_agent.clone(),
                fetch_timeout: Duration::from_secs(*timeout),
                restart: *restart,
                politeness_delay: Duration::from_millis(*politeness_delay_ms),
                similarity_threshold: *similarity_threshold,
                poll_interval: Duration::from_millis(*poll_interval_ms),
                grace_period: Duration::from_secs(*grace_period_secs),
                save_interval: Duration::from_secs(*save_interval_secs),
                ..CrawlerConfig::default()
            }),
            Commands::Status { .. } => None,
        }
    }
}
