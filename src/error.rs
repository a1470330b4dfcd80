use thiserror::Error;

use crate::ledger::LedgerError;
use crate::network::FetchError;
use crate::sink::SinkError;

/// Errors that end a crawl. Per-URL failures never surface here; they are
/// folded into a worker's page outcome instead.
#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("page sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("HTTP client error: {0}")]
    Client(#[from] FetchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("worker for {shard} stopped unexpectedly: {reason}")]
    Worker { shard: String, reason: String },
}

impl CrawlError {
    /// True for failures of local storage rather than of the crawl itself.
    pub fn is_storage(&self) -> bool {
        matches!(self, CrawlError::Ledger(_) | CrawlError::Sink(_) | CrawlError::Io(_))
    }
}
