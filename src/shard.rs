//! Domain shards: the fixed partition of permitted domains.
//!
//! Every URL the crawler accepts belongs to exactly one of four academic
//! domains. The shard index is the unit of queue and worker assignment, so
//! per-shard state is kept in arrays indexed by [`ShardId`] rather than in
//! one branch per domain.

use std::fmt;
use url::Url;

/// Number of domain shards (and therefore worker tasks).
pub const SHARD_COUNT: usize = 4;

/// Permitted domain suffixes, indexed by shard.
pub const DOMAINS: [&str; SHARD_COUNT] = [
    "ics.uci.edu",
    "cs.uci.edu",
    "informatics.uci.edu",
    "stat.uci.edu",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardId(usize);

impl ShardId {
    /// Build a shard id from a raw index, rejecting anything out of range.
    pub fn new(index: usize) -> Option<Self> {
        (index < SHARD_COUNT).then_some(Self(index))
    }

    pub fn index(self) -> usize {
        self.0
    }

    /// Domain suffix this shard covers.
    pub fn domain(self) -> &'static str {
        DOMAINS[self.0]
    }

    pub fn all() -> impl Iterator<Item = ShardId> {
        (0..SHARD_COUNT).map(ShardId)
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shard-{}({})", self.0, self.domain())
    }
}

/// Map a URL to its shard by matching the host against the domain table.
///
/// A host matches a suffix when it equals it or ends with `.` + suffix, so
/// `informatics.uci.edu` never falls into the `ics.uci.edu` shard. Returns
/// `None` for malformed URLs, URLs without a host and foreign domains.
pub fn classify(url: &str) -> Option<ShardId> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    classify_host(&host)
}

/// Same as [`classify`] for an already-extracted, lower-cased host.
pub fn classify_host(host: &str) -> Option<ShardId> {
    let host = host.trim_end_matches('.');
    DOMAINS
        .iter()
        .position(|suffix| {
            host == *suffix
                || (host.len() > suffix.len()
                    && host.ends_with(suffix)
                    && host.as_bytes()[host.len() - suffix.len() - 1] == b'.')
        })
        .map(ShardId)
}
