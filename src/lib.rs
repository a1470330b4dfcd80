pub mod cli;
pub mod completion_detector;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod frontier;
pub mod ledger;
pub mod logging;
pub mod network;
pub mod parser;
pub mod politeness;
pub mod robots;
pub mod shard;
pub mod sink;
pub mod stats;
pub mod supervisor;
pub mod url_utils;
pub mod worker;

// Re-export main types for library usage
pub use config::CrawlerConfig;
pub use error::CrawlError;
pub use fingerprint::{Fingerprint, FingerprintTable};
pub use frontier::{AddOutcome, Frontier};
pub use ledger::{Ledger, LedgerEntry, LedgerError};
pub use network::{FetchError, FetchResult, Fetcher, HttpClient};
pub use politeness::{Bootstrap, Politeness};
pub use shard::{classify, ShardId, SHARD_COUNT};
pub use sink::{JsonlPageSink, PageSink};
pub use supervisor::{CrawlSummary, Crawler};
pub use worker::{PageOutcome, ShardWorker};
