//! Fetch-parse worker: one long-lived task per shard.
//!
//! Each iteration dequeues a URL, resolves it to a [`PageOutcome`], and then
//! either marks it complete or, for [`PageOutcome::RetryLater`], puts it back
//! on the queue untouched.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::error::CrawlError;
use crate::fingerprint;
use crate::frontier::{AddOutcome, Frontier};
use crate::network::{is_acceptable_status, Fetcher};
use crate::parser;
use crate::politeness::{Politeness, PolitenessError, RobotsFetch};
use crate::shard::ShardId;
use crate::sink::{AcceptedPage, PageSink};
use crate::stats::{Admission, CrawlStats};
use crate::url_utils;

/// What happened to one dequeued URL.
#[derive(Debug, Clone, PartialEq)]
pub enum PageOutcome {
    /// Accepted, handed to the sink; `links` new URLs were queued.
    Indexed { links: usize },
    /// A sitemap document; links queued, nothing indexed.
    Sitemap { links: usize },
    /// Robots resource processed; `seeds` homepage/sitemap URLs were queued.
    Bootstrapped { seeds: usize },
    /// Domain disallows crawling entirely.
    Banned,
    /// Response status outside the accepted range, or no body.
    Rejected { status: u16 },
    /// Near-duplicate of an already accepted page.
    Duplicate { of: String },
    /// The domain's robots policy forbids this URL.
    Disallowed,
    /// Redirected to a URL that was admitted in its place or is already known.
    Redirected { to: String },
    /// Network failure. Terminal for the URL.
    FetchFailed(String),
    /// The domain's bootstrap is still in progress elsewhere.
    RetryLater,
}

impl PageOutcome {
    fn hit_network(&self) -> bool {
        !matches!(
            self,
            PageOutcome::Banned | PageOutcome::Disallowed | PageOutcome::RetryLater
        )
    }
}

/// Per-worker tally returned when the loop exits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub processed: u64,
    pub indexed: u64,
    pub sitemaps: u64,
    pub bootstrapped: u64,
    pub banned: u64,
    pub rejected: u64,
    pub duplicates: u64,
    pub disallowed: u64,
    pub redirected: u64,
    pub fetch_failed: u64,
    pub retried: u64,
}

impl WorkerReport {
    fn record(&mut self, outcome: &PageOutcome) {
        self.processed += 1;
        let counter = match outcome {
            PageOutcome::Indexed { .. } => &mut self.indexed,
            PageOutcome::Sitemap { .. } => &mut self.sitemaps,
            PageOutcome::Bootstrapped { .. } => &mut self.bootstrapped,
            PageOutcome::Banned => &mut self.banned,
            PageOutcome::Rejected { .. } => &mut self.rejected,
            PageOutcome::Duplicate { .. } => &mut self.duplicates,
            PageOutcome::Disallowed => &mut self.disallowed,
            PageOutcome::Redirected { .. } => &mut self.redirected,
            PageOutcome::FetchFailed(_) => &mut self.fetch_failed,
            PageOutcome::RetryLater => &mut self.retried,
        };
        *counter += 1;
    }
}

pub struct ShardWorker {
    shard: ShardId,
    frontier: Arc<Frontier>,
    politeness: Arc<Politeness>,
    stats: Arc<CrawlStats>,
    fetcher: Arc<dyn Fetcher>,
    sink: Arc<dyn PageSink>,
    politeness_delay: Duration,
}

impl ShardWorker {
    pub fn new(
        shard: ShardId,
        frontier: Arc<Frontier>,
        politeness: Arc<Politeness>,
        stats: Arc<CrawlStats>,
        fetcher: Arc<dyn Fetcher>,
        sink: Arc<dyn PageSink>,
        politeness_delay: Duration,
    ) -> Self {
        Self {
            shard,
            frontier,
            politeness,
            stats,
            fetcher,
            sink,
            politeness_delay,
        }
    }

    /// Drain the shard until `shutdown` flips. Only ledger and sink failures
    /// end the loop early.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<WorkerReport, CrawlError> {
        let mut report = WorkerReport::default();
        tracing::info!(shard = %self.shard, "worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let item = tokio::select! {
                item = self.frontier.get_next(self.shard) => item,
                _ = shutdown.changed() => break,
            };
            let Some(item) = item else {
                continue;
            };

            let outcome = self.process(&item.url).await?;
            tracing::debug!(shard = %self.shard, url = %item.url, ?outcome, "processed");

            if outcome == PageOutcome::RetryLater {
                self.frontier.retry_later(&item.url)?;
            } else {
                self.frontier.mark_complete(&item.url)?;
            }
            report.record(&outcome);
            let host = url_utils::extract_host(&item.url);
            drop(item);

            let delay = self.delay_for(&outcome, host.as_deref());
            if !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => break,
                }
            }
        }

        tracing::info!(shard = %self.shard, processed = report.processed, "worker stopped");
        Ok(report)
    }

    /// `max(politeness delay, robots Crawl-delay)` after any network round trip.
    fn delay_for(&self, outcome: &PageOutcome, host: Option<&str>) -> Duration {
        if !outcome.hit_network() && *outcome != PageOutcome::RetryLater {
            return Duration::ZERO;
        }
        let robots_delay = host
            .and_then(|h| self.politeness.crawl_delay(h))
            .unwrap_or(Duration::ZERO);
        self.politeness_delay.max(robots_delay)
    }

    /// Resolve one URL. Never marks it complete; the caller does.
    pub async fn process(&self, url: &str) -> Result<PageOutcome, CrawlError> {
        if url_utils::is_robots_url(url) {
            return self.bootstrap(url).await;
        }

        let Some(host) = url_utils::extract_host(url) else {
            return Ok(PageOutcome::Rejected { status: 0 });
        };

        if !self.politeness.is_bootstrapped(&host) {
            let Some(robots) = url_utils::robots_url(url) else {
                return Ok(PageOutcome::Rejected { status: 0 });
            };
            match self.bootstrap(&robots).await? {
                PageOutcome::Bootstrapped { .. } => {}
                other => return Ok(other),
            }
        }

        if self.politeness.is_banned(&host) {
            return Ok(PageOutcome::Banned);
        }
        match self.politeness.is_permitted(url) {
            Some(true) => {}
            Some(false) => return Ok(PageOutcome::Disallowed),
            None => return Ok(PageOutcome::RetryLater),
        }

        let result = match self.fetcher.fetch(url).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(shard = %self.shard, %url, error = %e, "fetch failed");
                return Ok(PageOutcome::FetchFailed(e.to_string()));
            }
        };

        if !is_acceptable_status(result.status) {
            tracing::debug!(%url, status = result.status, "unacceptable status");
            return Ok(PageOutcome::Rejected { status: result.status });
        }
        let Some(body) = result.body.filter(|b| !b.trim().is_empty()) else {
            return Ok(PageOutcome::Rejected { status: result.status });
        };

        let page_url = url_utils::normalize_url(&result.final_url).unwrap_or_else(|| url.to_string());
        if let Some(outcome) = self.check_redirect(url, &page_url)? {
            return Ok(outcome);
        }

        self.handle_page(&page_url, &body)
    }

    /// Decide what to do when the response came from a different URL.
    fn check_redirect(&self, requested: &str, page_url: &str) -> Result<Option<PageOutcome>, CrawlError> {
        let requested = url_utils::normalize_url(requested).unwrap_or_else(|| requested.to_string());
        if url_utils::url_identity(&requested) == url_utils::url_identity(page_url) {
            return Ok(None);
        }

        if !url_utils::is_valid(page_url) {
            tracing::debug!(from = %requested, to = %page_url, "redirected out of scope");
            return Ok(Some(PageOutcome::Rejected { status: 0 }));
        }

        match self.politeness.is_permitted(page_url) {
            Some(true) => {
                // Claim the target so a later sighting is not fetched again.
                if self.frontier.record_completed(page_url)? {
                    Ok(None)
                } else {
                    tracing::debug!(from = %requested, to = %page_url, "redirect target already known");
                    Ok(Some(PageOutcome::Redirected {
                        to: page_url.to_string(),
                    }))
                }
            }
            Some(false) => Ok(Some(PageOutcome::Disallowed)),
            None => {
                // Target domain has no politeness record yet; let it go
                // through admission so its robots resource comes first.
                self.frontier.add_url(page_url)?;
                Ok(Some(PageOutcome::Redirected {
                    to: page_url.to_string(),
                }))
            }
        }
    }

    fn handle_page(&self, page_url: &str, body: &str) -> Result<PageOutcome, CrawlError> {
        let links = parser::extract_links(page_url, body);

        if url_utils::is_sitemap_url(page_url) || parser::is_sitemap_document(body) {
            let queued = self.admit_links(&links)?;
            return Ok(PageOutcome::Sitemap { links: queued });
        }

        let text = parser::extract_text(body);
        let signature = fingerprint::fingerprint(&text.terms);
        if let Admission::DuplicateOf(of) = self.stats.admit_fingerprint(signature, page_url) {
            tracing::debug!(url = %page_url, duplicate_of = %of, "near-duplicate page dropped");
            return Ok(PageOutcome::Duplicate { of });
        }

        let host = url_utils::extract_host(page_url).unwrap_or_default();
        self.stats
            .record_page(page_url, &host, text.word_count, &text.terms);
        self.sink.accept(&AcceptedPage {
            url: page_url.to_string(),
            terms: text.terms,
            word_count: text.word_count,
            crawled_at: chrono::Utc::now(),
        })?;

        let queued = self.admit_links(&links)?;
        Ok(PageOutcome::Indexed { links: queued })
    }

    fn admit_links(&self, links: &[String]) -> Result<usize, CrawlError> {
        let mut queued = 0;
        for link in links {
            if self.frontier.add_url(link)? == AddOutcome::Queued {
                queued += 1;
            }
        }
        Ok(queued)
    }

    /// Pass the domain's robots gate, fetching robots.txt if no one has yet.
    /// Whoever runs the bootstrap also admits the domain's seed links.
    async fn bootstrap(&self, robots_url: &str) -> Result<PageOutcome, CrawlError> {
        let gate = self
            .politeness
            .ensure_bootstrapped(robots_url, || self.fetch_robots(robots_url))
            .await;

        let outcome = match gate {
            Ok(outcome) => outcome,
            Err(PolitenessError::GateTimeout(domain)) => {
                tracing::debug!(shard = %self.shard, %domain, "robots bootstrap still running, retrying later");
                return Ok(PageOutcome::RetryLater);
            }
            Err(e @ PolitenessError::NoHost(_)) => {
                tracing::warn!(shard = %self.shard, error = %e, "cannot bootstrap");
                return Ok(PageOutcome::Rejected { status: 0 });
            }
        };

        if outcome.record.banned {
            return Ok(PageOutcome::Banned);
        }

        let seeds = if outcome.fresh {
            self.admit_links(&outcome.record.seed_links())?
        } else {
            0
        };
        Ok(PageOutcome::Bootstrapped { seeds })
    }

    async fn fetch_robots(&self, robots_url: &str) -> RobotsFetch {
        match self.fetcher.fetch(robots_url).await {
            Ok(result) if is_acceptable_status(result.status) => match result.body {
                Some(body) => RobotsFetch::Fetched(body),
                None => RobotsFetch::Unavailable,
            },
            Ok(result) => {
                tracing::debug!(url = %robots_url, status = result.status, "no robots.txt, allowing all");
                RobotsFetch::Unavailable
            }
            Err(e) => {
                tracing::warn!(url = %robots_url, error = %e, "robots.txt fetch failed, allowing all");
                RobotsFetch::Unavailable
            }
        }
    }
}
