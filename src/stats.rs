//! Aggregate crawl statistics shared by every worker.
//!
//! Each concern sits behind its own lock so unrelated shards never contend
//! on one global mutex. The whole object is snapshotted into the ledger
//! database at process boundaries and restored on resume.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::fingerprint::{Fingerprint, FingerprintTable};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageTally {
    /// Unique, non-duplicate pages accepted.
    pub pages: u64,
    pub longest_page_words: usize,
    pub longest_page_url: Option<String>,
}

/// Serializable copy of [`CrawlStats`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub tally: PageTally,
    pub word_frequencies: HashMap<String, u64>,
    pub subdomain_pages: BTreeMap<String, u64>,
    pub fingerprints: FingerprintTable,
}

impl StatsSnapshot {
    /// The `n` most frequent words, ties broken alphabetically.
    pub fn top_words(&self, n: usize) -> Vec<(String, u64)> {
        let mut words: Vec<(String, u64)> = self
            .word_frequencies
            .iter()
            .map(|(w, c)| (w.clone(), *c))
            .collect();
        words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        words.truncate(n);
        words
    }
}

/// Result of checking a page against the fingerprint table.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Accepted,
    DuplicateOf(String),
}

pub struct CrawlStats {
    tally: Mutex<PageTally>,
    word_frequencies: Mutex<HashMap<String, u64>>,
    subdomain_pages: Mutex<BTreeMap<String, u64>>,
    fingerprints: Mutex<FingerprintTable>,
}

impl CrawlStats {
    pub fn new(similarity_threshold: f64) -> Self {
        Self {
            tally: Mutex::new(PageTally::default()),
            word_frequencies: Mutex::new(HashMap::new()),
            subdomain_pages: Mutex::new(BTreeMap::new()),
            fingerprints: Mutex::new(FingerprintTable::new(similarity_threshold)),
        }
    }

    /// Check `signature` against every stored fingerprint and store it if new.
    ///
    /// The check and the insert happen under one lock so two workers cannot
    /// both accept near-identical pages.
    pub fn admit_fingerprint(&self, signature: Fingerprint, url: &str) -> Admission {
        let mut table = self.fingerprints.lock();
        if let Some(matched) = table.nearest_match(signature) {
            return Admission::DuplicateOf(matched.to_string());
        }
        table.insert(signature, url.to_string());
        Admission::Accepted
    }

    /// Fold an accepted page into the running totals.
    pub fn record_page(&self, url: &str, host: &str, word_count: usize, terms: &HashMap<String, u32>) {
        {
            let mut tally = self.tally.lock();
            tally.pages += 1;
            if word_count > tally.longest_page_words {
                tally.longest_page_words = word_count;
                tally.longest_page_url = Some(url.to_string());
            }
        }
        {
            let mut frequencies = self.word_frequencies.lock();
            for (term, count) in terms {
                *frequencies.entry(term.clone()).or_insert(0) += u64::from(*count);
            }
        }
        *self.subdomain_pages.lock().entry(host.to_string()).or_insert(0) += 1;
    }

    pub fn page_count(&self) -> u64 {
        self.tally.lock().pages
    }

    pub fn fingerprint_count(&self) -> usize {
        self.fingerprints.lock().len()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            tally: self.tally.lock().clone(),
            word_frequencies: self.word_frequencies.lock().clone(),
            subdomain_pages: self.subdomain_pages.lock().clone(),
            fingerprints: self.fingerprints.lock().clone(),
        }
    }

    /// Replace the current totals with a saved snapshot.
    /// The configured similarity threshold is kept.
    pub fn restore(&self, snapshot: StatsSnapshot) {
        *self.tally.lock() = snapshot.tally;
        *self.word_frequencies.lock() = snapshot.word_frequencies;
        *self.subdomain_pages.lock() = snapshot.subdomain_pages;
        let mut table = self.fingerprints.lock();
        let threshold = table.threshold();
        *table = snapshot.fingerprints;
        table.set_threshold(threshold);
    }
}
