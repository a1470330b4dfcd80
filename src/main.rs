use academic_crawler::cli::{Cli, Commands};
use academic_crawler::config::CrawlerConfig;
use academic_crawler::error::CrawlError;
use academic_crawler::logging;
use academic_crawler::network::{Fetcher, HttpClient};
use academic_crawler::sink::{JsonlPageSink, PageSink};
use academic_crawler::supervisor::{self, Crawler};
use std::process::ExitCode;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MainError {
    #[error("{0}")]
    Crawl(#[from] CrawlError),

    #[error("Logging error: {0}")]
    Logging(String),
}

impl MainError {
    /// 3 for local I/O or state problems, 4 for everything that went wrong mid-crawl.
    fn exit_code(&self) -> u8 {
        match self {
            MainError::Crawl(e) if e.is_storage() => 3,
            MainError::Logging(_) => 3,
            MainError::Crawl(_) => 4,
        }
    }
}

async fn run_crawl(config: CrawlerConfig) -> Result<(), MainError> {
    let _logging = logging::init_logging(config.log_dir()).map_err(|e| MainError::Logging(e.to_string()))?;

    println!(
        "Crawling {} seed(s) with {} workers ({}s timeout, data: {})",
        config.seed_urls.len(),
        config.effective_threads(),
        config.fetch_timeout.as_secs(),
        config.data_dir.display()
    );

    let fetcher: Arc<dyn Fetcher> = Arc::new(
        HttpClient::new(&config.user_agent, config.fetch_timeout.as_secs()).map_err(CrawlError::from)?,
    );
    let sink: Arc<dyn PageSink> =
        Arc::new(JsonlPageSink::open(config.pages_path(), config.restart).map_err(CrawlError::from)?);

    let crawler = Crawler::open(config.clone(), fetcher, sink)?;
    let summary = crawler.run().await?;

    println!(
        "Processed {} URLs, {} unique pages, {} ledger entries in {}s",
        summary.processed(),
        summary.pages,
        summary.ledger_entries,
        summary.elapsed.as_secs()
    );
    if summary.interrupted {
        println!("Crawl interrupted; run again without --restart to resume");
    } else {
        println!("Accepted pages: {}", config.pages_path().display());
    }
    Ok(())
}

fn run_status(command: &Commands) -> Result<(), MainError> {
    if let Commands::Status {
        data_dir,
        save_file,
        top_words,
    } = command
    {
        let path = if save_file.is_absolute() {
            save_file.clone()
        } else {
            data_dir.join(save_file)
        };
        let report = supervisor::status(&path, *top_words)?;
        print!("{}", report);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();

    let result = match cli.command.crawler_config() {
        Some(config) => run_crawl(config).await,
        None => run_status(&cli.command),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
