use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::ledger::{Ledger, LedgerError};
use crate::politeness::Politeness;
use crate::shard::{self, ShardId, SHARD_COUNT};
use crate::url_utils;

/// One shard's work queue and the lock that serializes admission into it.
struct ShardQueue {
    tx: flume::Sender<String>,
    rx: flume::Receiver<String>,
    admission: Mutex<()>,
}

impl ShardQueue {
    fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self {
            tx,
            rx,
            admission: Mutex::new(()),
        }
    }

    fn push(&self, url: String) {
        // The receiver lives as long as the queue, so send cannot fail here.
        if let Err(e) = self.tx.send(url) {
            tracing::error!(url = %e.into_inner(), "shard queue closed, dropping url");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Recorded in the ledger and pushed onto its shard queue.
    Queued,
    /// Identity already in the ledger.
    AlreadySeen,
    /// Rejected by the URL filter; nothing recorded.
    Invalid,
    /// Domain is banned by its robots policy; nothing recorded.
    Banned,
}

/// Counts how many URLs a restart put back into the queues.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub ledger_entries: usize,
    pub requeued: usize,
    pub seeded: usize,
}

struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A URL taken off a shard queue. Counts as in-flight until dropped.
pub struct Dequeued {
    pub url: String,
    pub shard: ShardId,
    _guard: InFlightGuard,
}

/// Frontier that owns the per-shard queues, the seen-domain set and the ledger.
pub struct Frontier {
    ledger: Arc<Ledger>,
    politeness: Arc<Politeness>,
    shards: [ShardQueue; SHARD_COUNT],
    /// Hosts whose robots URL has already been admitted.
    seen_domains: Mutex<HashSet<String>>,
    in_flight: Arc<AtomicUsize>,
    pop_timeout: Duration,
}

impl Frontier {
    pub fn new(ledger: Arc<Ledger>, politeness: Arc<Politeness>, pop_timeout: Duration) -> Self {
        Self {
            ledger,
            politeness,
            shards: std::array::from_fn(|_| ShardQueue::new()),
            seen_domains: Mutex::new(HashSet::new()),
            in_flight: Arc::new(AtomicUsize::new(0)),
            pop_timeout,
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Populate the queues for a new run.
    ///
    /// With `restart`, the (already discarded) ledger is ignored and the seeds
    /// are admitted. Otherwise every incomplete, still-valid ledger entry is
    /// re-queued, and the seeds are admitted only if the ledger was empty.
    pub fn load(&self, seeds: &[String], restart: bool) -> Result<LoadSummary, LedgerError> {
        let mut summary = LoadSummary::default();

        if !restart {
            let mut seen = self.seen_domains.lock();
            self.ledger.for_each_entry(|_, entry| {
                summary.ledger_entries += 1;

                if url_utils::is_robots_url(&entry.url) {
                    if let Some(host) = url_utils::extract_host(&entry.url) {
                        seen.insert(host);
                    }
                }

                if !entry.completed && url_utils::is_valid(&entry.url) {
                    if let Some(shard) = shard::classify(&entry.url) {
                        self.shards[shard.index()].push(entry.url);
                        summary.requeued += 1;
                    }
                }
                Ok(())
            })?;
            tracing::info!(
                pending = summary.requeued,
                total = summary.ledger_entries,
                "found urls to be downloaded in save file"
            );
        }

        if restart || summary.ledger_entries == 0 {
            for seed in seeds {
                if self.add_url(seed)? == AddOutcome::Queued {
                    summary.seeded += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Admit a discovered URL.
    ///
    /// The first URL seen for a host also records and enqueues that host's
    /// robots URL ahead of itself, under the shard's admission lock.
    pub fn add_url(&self, url: &str) -> Result<AddOutcome, LedgerError> {
        if !url_utils::is_valid(url) {
            return Ok(AddOutcome::Invalid);
        }
        let Some(normalized) = url_utils::normalize_url(url) else {
            return Ok(AddOutcome::Invalid);
        };
        let (Some(shard), Some(host)) = (shard::classify(&normalized), url_utils::extract_host(&normalized)) else {
            return Ok(AddOutcome::Invalid);
        };

        if self.politeness.is_banned(&host) {
            return Ok(AddOutcome::Banned);
        }

        let queue = &self.shards[shard.index()];
        let _admission = queue.admission.lock();

        let first_sighting = self.seen_domains.lock().insert(host.clone());
        if first_sighting {
            if let Some(robots) = url_utils::robots_url(&normalized) {
                tracing::debug!(%host, %shard, "new domain, queueing robots.txt first");
                self.admit(queue, robots)?;
            }
        }

        self.admit(queue, normalized)
    }

    fn admit(&self, queue: &ShardQueue, normalized: String) -> Result<AddOutcome, LedgerError> {
        let key = url_utils::url_identity(&normalized);
        if self.ledger.record(&key, &normalized)? {
            queue.push(normalized);
            Ok(AddOutcome::Queued)
        } else {
            Ok(AddOutcome::AlreadySeen)
        }
    }

    /// Pop the next URL for `shard`, waiting at most the pop timeout.
    /// `None` means the shard is drained for now, not necessarily forever.
    pub async fn get_next(&self, shard: ShardId) -> Option<Dequeued> {
        let queue = &self.shards[shard.index()];
        let url = match queue.rx.try_recv() {
            Ok(url) => url,
            Err(_) => tokio::time::timeout(self.pop_timeout, queue.rx.recv_async())
                .await
                .ok()?
                .ok()?,
        };

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Some(Dequeued {
            url,
            shard,
            _guard: InFlightGuard(Arc::clone(&self.in_flight)),
        })
    }

    /// Record a URL that was fetched without being dequeued, such as a
    /// redirect target, as already completed. Returns false if the ledger
    /// knew it before, in which case it stays untouched.
    pub fn record_completed(&self, url: &str) -> Result<bool, LedgerError> {
        let Some(normalized) = url_utils::normalize_url(url) else {
            return Ok(false);
        };
        let key = url_utils::url_identity(&normalized);
        if !self.ledger.record(&key, &normalized)? {
            return Ok(false);
        }
        self.ledger.mark_complete(&key, &normalized)?;
        Ok(true)
    }

    /// Flip the URL's ledger entry to completed.
    pub fn mark_complete(&self, url: &str) -> Result<(), LedgerError> {
        let normalized = url_utils::normalize_url(url).unwrap_or_else(|| url.to_string());
        let key = url_utils::url_identity(&normalized);
        if !self.ledger.mark_complete(&key, &normalized)? {
            tracing::error!(url = %normalized, "completed url, but have not seen it before");
        }
        Ok(())
    }

    /// Put a URL back for a later attempt without touching its completion state.
    ///
    /// An incomplete ledger entry is pushed straight back onto its queue;
    /// anything else goes through normal admission.
    pub fn retry_later(&self, url: &str) -> Result<AddOutcome, LedgerError> {
        let Some(normalized) = url_utils::normalize_url(url) else {
            return Ok(AddOutcome::Invalid);
        };
        let key = url_utils::url_identity(&normalized);
        match (self.ledger.get(&key)?, shard::classify(&normalized)) {
            (Some(entry), Some(shard)) if !entry.completed => {
                self.shards[shard.index()].push(entry.url);
                Ok(AddOutcome::Queued)
            }
            _ => self.add_url(&normalized),
        }
    }

    pub fn depth(&self, shard: ShardId) -> usize {
        self.shards[shard.index()].rx.len()
    }

    pub fn depths(&self) -> [usize; SHARD_COUNT] {
        std::array::from_fn(|i| self.shards[i].rx.len())
    }

    pub fn total_depth(&self) -> usize {
        self.shards.iter().map(|q| q.rx.len()).sum()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn seen_domain_count(&self) -> usize {
        self.seen_domains.lock().len()
    }
}
