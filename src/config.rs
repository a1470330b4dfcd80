// Global configuration constants - single source of truth

use std::path::PathBuf;
use std::time::Duration;

use crate::fingerprint::DEFAULT_SIMILARITY_THRESHOLD;
use crate::shard::{SHARD_COUNT, DOMAINS};

pub struct Config;

impl Config {
    pub const USER_AGENT: &'static str = "AcademicCrawler/0.1";
    pub const DATA_DIR: &'static str = "./data";
    pub const SAVE_FILE: &'static str = "frontier.redb";
    pub const PAGES_FILE: &'static str = "pages.jsonl";

    // HTTP/Network config
    pub const FETCH_TIMEOUT_SECS: u64 = 20;
    pub const MAX_CONTENT_SIZE: usize = 10 * 1024 * 1024; // 10MB

    // Politeness
    pub const POLITENESS_DELAY_MS: u64 = 500;
    pub const GATE_WAIT_SECS: u64 = 30;
    pub const MAX_CRAWL_DELAY_SECS: u64 = 60;

    // Supervisor timing
    pub const POLL_INTERVAL_MS: u64 = 1_000;
    pub const GRACE_PERIOD_SECS: u64 = 5;
    pub const SAVE_INTERVAL_SECS: u64 = 300;
    pub const QUEUE_POP_TIMEOUT_MS: u64 = 250;

    pub const STATS_SNAPSHOT: &'static str = "crawl_stats";
    pub const POLITENESS_SNAPSHOT: &'static str = "politeness";
}

/// Runtime options for one crawl.
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlerConfig {
    pub seed_urls: Vec<String>,
    pub data_dir: PathBuf,
    /// Ledger location. Relative paths resolve against `data_dir`.
    pub save_file: PathBuf,
    pub threads_count: usize,
    pub user_agent: String,
    pub fetch_timeout: Duration,
    pub restart: bool,
    pub politeness_delay: Duration,
    pub similarity_threshold: f64,
    pub poll_interval: Duration,
    pub grace_period: Duration,
    pub save_interval: Duration,
    pub gate_wait: Duration,
    pub queue_pop_timeout: Duration,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            seed_urls: default_seeds(),
            data_dir: PathBuf::from(Config::DATA_DIR),
            save_file: PathBuf::from(Config::SAVE_FILE),
            threads_count: SHARD_COUNT,
            user_agent: Config::USER_AGENT.to_string(),
            fetch_timeout: Duration::from_secs(Config::FETCH_TIMEOUT_SECS),
            restart: false,
            politeness_delay: Duration::from_millis(Config::POLITENESS_DELAY_MS),
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            poll_interval: Duration::from_millis(Config::POLL_INTERVAL_MS),
            grace_period: Duration::from_secs(Config::GRACE_PERIOD_SECS),
            save_interval: Duration::from_secs(Config::SAVE_INTERVAL_SECS),
            gate_wait: Duration::from_secs(Config::GATE_WAIT_SECS),
            queue_pop_timeout: Duration::from_millis(Config::QUEUE_POP_TIMEOUT_MS),
        }
    }
}

impl CrawlerConfig {
    pub fn ledger_path(&self) -> PathBuf {
        if self.save_file.is_absolute() {
            self.save_file.clone()
        } else {
            self.data_dir.join(&self.save_file)
        }
    }

    pub fn pages_path(&self) -> PathBuf {
        self.data_dir.join(Config::PAGES_FILE)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    /// One worker per shard; any other thread count is clamped.
    pub fn effective_threads(&self) -> usize {
        if self.threads_count != SHARD_COUNT {
            tracing::warn!(
                requested = self.threads_count,
                using = SHARD_COUNT,
                "thread count is fixed at one worker per shard"
            );
        }
        SHARD_COUNT
    }
}

/// The homepage of every permitted domain.
pub fn default_seeds() -> Vec<String> {
    DOMAINS
        .iter()
        .map(|domain| format!("https://www.{}", domain))
        .collect()
}
