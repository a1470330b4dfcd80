//! Crawl supervisor: wires the shared state together, runs one worker per
//! shard, watches for quiescence and persists statistics.

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::completion_detector::{CompletionDetector, CompletionSignals};
use crate::config::{Config, CrawlerConfig};
use crate::error::CrawlError;
use crate::frontier::{Frontier, LoadSummary};
use crate::ledger::Ledger;
use crate::network::Fetcher;
use crate::politeness::{DomainRecord, Politeness};
use crate::shard::{self, ShardId, SHARD_COUNT};
use crate::sink::PageSink;
use crate::stats::{CrawlStats, StatsSnapshot};
use crate::worker::{ShardWorker, WorkerReport};

/// How a finished crawl went.
#[derive(Debug, Clone)]
pub struct CrawlSummary {
    pub load: LoadSummary,
    pub reports: Vec<WorkerReport>,
    pub pages: u64,
    pub ledger_entries: u64,
    pub interrupted: bool,
    pub elapsed: Duration,
}

impl CrawlSummary {
    pub fn processed(&self) -> u64 {
        self.reports.iter().map(|r| r.processed).sum()
    }
}

pub struct Crawler {
    config: CrawlerConfig,
    frontier: Arc<Frontier>,
    politeness: Arc<Politeness>,
    stats: Arc<CrawlStats>,
    fetcher: Arc<dyn Fetcher>,
    sink: Arc<dyn PageSink>,
    load: LoadSummary,
}

impl Crawler {
    /// Open the ledger and apply the restart protocol.
    ///
    /// On resume, saved statistics and politeness records are restored before
    /// pending ledger entries are re-queued.
    pub fn open(
        config: CrawlerConfig,
        fetcher: Arc<dyn Fetcher>,
        sink: Arc<dyn PageSink>,
    ) -> Result<Self, CrawlError> {
        let ledger = Arc::new(Ledger::open(config.ledger_path(), config.restart)?);
        let politeness = Arc::new(Politeness::new(&config.user_agent, config.gate_wait));
        let stats = Arc::new(CrawlStats::new(config.similarity_threshold));

        if !config.restart {
            if let Some(snapshot) = ledger.load_snapshot::<StatsSnapshot>(Config::STATS_SNAPSHOT)? {
                tracing::info!(pages = snapshot.tally.pages, "restored crawl statistics");
                stats.restore(snapshot);
            }
            if let Some(records) = ledger.load_snapshot::<Vec<DomainRecord>>(Config::POLITENESS_SNAPSHOT)? {
                tracing::info!(domains = records.len(), "restored robots policies");
                politeness.restore(records);
            }
        }

        let frontier = Arc::new(Frontier::new(
            ledger,
            Arc::clone(&politeness),
            config.queue_pop_timeout,
        ));
        let load = frontier.load(&config.seed_urls, config.restart)?;

        Ok(Self {
            config,
            frontier,
            politeness,
            stats,
            fetcher,
            sink,
            load,
        })
    }

    pub fn frontier(&self) -> &Arc<Frontier> {
        &self.frontier
    }

    pub fn stats(&self) -> &Arc<CrawlStats> {
        &self.stats
    }

    pub fn politeness(&self) -> &Arc<Politeness> {
        &self.politeness
    }

    /// Crawl until quiescence, a fatal worker error, or Ctrl+C.
    pub async fn run(&self) -> Result<CrawlSummary, CrawlError> {
        self.run_until(async {
            if tokio::signal::ctrl_c().await.is_err() {
                tracing::warn!("cannot listen for Ctrl+C, interrupt handling disabled");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Crawl until quiescence, a fatal worker error, or `interrupt` resolves.
    pub async fn run_until<F>(&self, interrupt: F) -> Result<CrawlSummary, CrawlError>
    where
        F: Future<Output = ()>,
    {
        let started = Instant::now();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let workers = self.spawn_workers(&shutdown_rx);

        let detector = CompletionDetector::new(self.config.grace_period);
        let mut poll = tokio::time::interval(self.config.poll_interval);
        let mut save = tokio::time::interval(self.config.save_interval);
        save.tick().await;
        tokio::pin!(interrupt);

        let mut interrupted = false;
        let mut polls: u64 = 0;

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    polls += 1;
                    let signals = CompletionSignals {
                        queued: self.frontier.total_depth(),
                        in_flight: self.frontier.in_flight(),
                    };
                    if polls % 10 == 0 {
                        tracing::info!(
                            queued = ?self.frontier.depths(),
                            in_flight = signals.in_flight,
                            pages = self.stats.page_count(),
                            "crawl progress"
                        );
                    }
                    if detector.check_completion(&signals) {
                        println!("all queues empty");
                        break;
                    }
                    if workers.iter().any(|(_, handle)| handle.is_finished()) {
                        tracing::error!("a worker exited before the crawl finished");
                        break;
                    }
                }
                _ = save.tick() => {
                    if let Err(e) = self.save_snapshot() {
                        tracing::error!(error = %e, "periodic snapshot failed");
                    }
                }
                _ = &mut interrupt => {
                    println!("\nReceived Ctrl+C, saving state...");
                    interrupted = true;
                    break;
                }
            }
        }

        let _ = shutdown_tx.send(true);

        let mut reports = Vec::with_capacity(workers.len());
        let mut fatal: Option<CrawlError> = None;
        for (shard, handle) in workers {
            match handle.await {
                Ok(Ok(report)) => reports.push(report),
                Ok(Err(e)) => {
                    tracing::error!(%shard, error = %e, "worker failed");
                    fatal.get_or_insert(e);
                }
                Err(e) => {
                    tracing::error!(%shard, error = %e, "worker panicked");
                    fatal.get_or_insert(CrawlError::Worker {
                        shard: shard.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        // Persist on every exit path, fatal included, so the next run can resume.
        self.save_snapshot()?;
        if let Some(e) = fatal {
            return Err(e);
        }

        Ok(CrawlSummary {
            load: self.load,
            reports,
            pages: self.stats.page_count(),
            ledger_entries: self.frontier.ledger().len()?,
            interrupted,
            elapsed: started.elapsed(),
        })
    }

    fn spawn_workers(
        &self,
        shutdown: &watch::Receiver<bool>,
    ) -> Vec<(ShardId, JoinHandle<Result<WorkerReport, CrawlError>>)> {
        let threads = self.config.effective_threads();
        ShardId::all()
            .take(threads)
            .map(|shard| {
                let worker = ShardWorker::new(
                    shard,
                    Arc::clone(&self.frontier),
                    Arc::clone(&self.politeness),
                    Arc::clone(&self.stats),
                    Arc::clone(&self.fetcher),
                    Arc::clone(&self.sink),
                    self.config.politeness_delay,
                );
                (shard, tokio::spawn(worker.run(shutdown.clone())))
            })
            .collect()
    }

    /// Write statistics and politeness records into the ledger database.
    pub fn save_snapshot(&self) -> Result<(), CrawlError> {
        let ledger = self.frontier.ledger();
        ledger.store_snapshot(Config::STATS_SNAPSHOT, &self.stats.snapshot())?;
        ledger.store_snapshot(Config::POLITENESS_SNAPSHOT, &self.politeness.snapshot())?;
        self.sink.flush()?;
        tracing::debug!(pages = self.stats.page_count(), "snapshot saved");
        Ok(())
    }
}

/// Ledger totals for one shard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShardProgress {
    pub completed: u64,
    pub pending: u64,
}

/// Read-only summary of a save file.
#[derive(Debug, Clone, Default)]
pub struct StatusReport {
    pub shards: [ShardProgress; SHARD_COUNT],
    /// Entries whose URL no longer classifies into any shard.
    pub unclassified: u64,
    pub stats: Option<StatsSnapshot>,
    pub banned_domains: Vec<String>,
    pub top_words: usize,
}

impl StatusReport {
    pub fn total(&self) -> u64 {
        self.shards.iter().map(|s| s.completed + s.pending).sum::<u64>() + self.unclassified
    }
}

/// Summarize the save file at `path` without crawling.
pub fn status<P: AsRef<Path>>(path: P, top_words: usize) -> Result<StatusReport, CrawlError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(CrawlError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no save file at {}", path.display()),
        )));
    }

    let ledger = Ledger::open(path, false)?;
    let mut report = StatusReport {
        top_words,
        ..Default::default()
    };

    ledger.for_each_entry(|_, entry| {
        match shard::classify(&entry.url) {
            Some(shard) => {
                let progress = &mut report.shards[shard.index()];
                if entry.completed {
                    progress.completed += 1;
                } else {
                    progress.pending += 1;
                }
            }
            None => report.unclassified += 1,
        }
        Ok(())
    })?;

    report.stats = ledger.load_snapshot(Config::STATS_SNAPSHOT)?;
    report.banned_domains = ledger
        .load_snapshot::<Vec<DomainRecord>>(Config::POLITENESS_SNAPSHOT)?
        .unwrap_or_default()
        .into_iter()
        .filter(|record| record.banned)
        .map(|record| record.root)
        .collect();

    Ok(report)
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Ledger entries: {}", self.total())?;
        for shard in ShardId::all() {
            let progress = self.shards[shard.index()];
            writeln!(
                f,
                "  {:<22} completed {:>8}  pending {:>8}",
                shard.domain(),
                progress.completed,
                progress.pending
            )?;
        }
        if !self.banned_domains.is_empty() {
            writeln!(f, "Banned domains: {}", self.banned_domains.join(", "))?;
        }

        let Some(stats) = &self.stats else {
            return writeln!(f, "No statistics snapshot saved yet");
        };
        writeln!(f, "Unique pages: {}", stats.tally.pages)?;
        if let Some(url) = &stats.tally.longest_page_url {
            writeln!(f, "Longest page: {} ({} words)", url, stats.tally.longest_page_words)?;
        }
        writeln!(f, "Fingerprints stored: {}", stats.fingerprints.len())?;
        writeln!(f, "Subdomains: {}", stats.subdomain_pages.len())?;
        for (host, pages) in &stats.subdomain_pages {
            writeln!(f, "  {}, {}", host, pages)?;
        }
        writeln!(f, "Top words:")?;
        for (word, count) in stats.top_words(self.top_words) {
            writeln!(f, "  {:<20} {}", word, count)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::StaticFetcher;
    use crate::sink::MemoryPageSink;
    use tempfile::TempDir;

    fn config(dir: &TempDir, seeds: &[&str], restart: bool) -> CrawlerConfig {
        CrawlerConfig {
            seed_urls: seeds.iter().map(|s| s.to_string()).collect(),
            data_dir: dir.path().to_path_buf(),
            restart,
            politeness_delay: Duration::ZERO,
            poll_interval: Duration::from_millis(20),
            grace_period: Duration::from_millis(100),
            queue_pop_timeout: Duration::from_millis(20),
            gate_wait: Duration::from_secs(2),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_interrupt_saves_state_and_resume_continues() {
        let dir = TempDir::new().unwrap();
        let fetcher: Arc<dyn Fetcher> = Arc::new(
            StaticFetcher::new()
                .with_page("https://www.ics.uci.edu/robots.txt", "User-agent: *\nDisallow:\n")
                .with_page("https://www.ics.uci.edu", "<html><body>Welcome to informatics and computing</body></html>"),
        );

        {
            let crawler = Crawler::open(
                config(&dir, &["https://www.ics.uci.edu"], true),
                Arc::clone(&fetcher),
                Arc::new(MemoryPageSink::new()),
            )
            .unwrap();
            // Interrupt fires on the first select.
            let summary = crawler.run_until(async {}).await.unwrap();
            assert!(summary.interrupted);
        }

        let crawler = Crawler::open(
            config(&dir, &["https://www.ics.uci.edu"], false),
            Arc::clone(&fetcher),
            Arc::new(MemoryPageSink::new()),
        )
        .unwrap();
        assert!(crawler.load.ledger_entries >= 2);
        assert_eq!(crawler.load.seeded, 0);

        let summary = crawler.run_until(std::future::pending()).await.unwrap();
        assert!(!summary.interrupted);
        assert_eq!(summary.pages, 1);
        drop(crawler);

        let report = status(dir.path().join(Config::SAVE_FILE), 5).unwrap();
        assert_eq!(report.shards[0].pending, 0);
        assert!(report.shards[0].completed >= 2);
        assert_eq!(report.stats.as_ref().unwrap().tally.pages, 1);
        assert!(report.to_string().contains("Unique pages: 1"));
    }

    #[test]
    fn test_status_of_missing_save_file() {
        let dir = TempDir::new().unwrap();
        let err = status(dir.path().join("nope.redb"), 5).unwrap_err();
        assert!(err.is_storage());
    }
}
