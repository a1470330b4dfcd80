//! 24-bit similarity-preserving content fingerprints (SimHash over weighted terms).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;

/// Width of a fingerprint in bits.
pub const FINGERPRINT_BITS: u32 = 24;

const FINGERPRINT_MASK: u32 = (1 << FINGERPRINT_BITS) - 1;

/// Pages whose fingerprints agree on more than this fraction of bits are duplicates.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 23.0 / 24.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(u32);

impl Fingerprint {
    pub fn from_bits(bits: u32) -> Self {
        Self(bits & FINGERPRINT_MASK)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn hamming_distance(self, other: Fingerprint) -> u32 {
        (self.0 ^ other.0).count_ones()
    }

    /// Fraction of matching bit positions, in `[0, 1]`.
    pub fn similarity(self, other: Fingerprint) -> f64 {
        let matching = FINGERPRINT_BITS - self.hamming_distance(other);
        f64::from(matching) / f64::from(FINGERPRINT_BITS)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:024b}", self.0)
    }
}

/// First 24 bits of the SHA-256 digest of a term.
pub fn term_digest(term: &str) -> u32 {
    let digest = Sha256::digest(term.as_bytes());
    u32::from_be_bytes([0, digest[0], digest[1], digest[2]])
}

/// Compute the fingerprint of a weighted term vector.
///
/// Each term votes `+weight` on the bit positions where its digest has a 1 and
/// `-weight` elsewhere; a signature bit is set when its tally is positive.
/// Bit 23 corresponds to the most significant bit of the digest.
pub fn fingerprint(term_weights: &HashMap<String, u32>) -> Fingerprint {
    let mut tally = [0i64; FINGERPRINT_BITS as usize];

    for (term, &weight) in term_weights {
        let digest = term_digest(term);
        let weight = i64::from(weight);
        for (position, slot) in tally.iter_mut().enumerate() {
            let bit = FINGERPRINT_BITS - 1 - position as u32;
            if digest & (1 << bit) != 0 {
                *slot += weight;
            } else {
                *slot -= weight;
            }
        }
    }

    let bits = tally
        .iter()
        .enumerate()
        .filter(|&(_, &value)| value > 0)
        .fold(0u32, |acc, (position, _)| {
            acc | 1 << (FINGERPRINT_BITS - 1 - position as u32)
        });

    Fingerprint(bits)
}

/// Signatures of every accepted page, in acceptance order.
///
/// Grows for the life of the crawl; there is no eviction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintTable {
    entries: Vec<(Fingerprint, String)>,
    threshold: f64,
}

impl FingerprintTable {
    pub fn new(threshold: f64) -> Self {
        Self {
            entries: Vec::new(),
            threshold,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: f64) {
        self.threshold = threshold;
    }

    /// URL of the first stored signature whose similarity exceeds the threshold.
    pub fn nearest_match(&self, candidate: Fingerprint) -> Option<&str> {
        self.entries
            .iter()
            .find(|(stored, _)| stored.similarity(candidate) > self.threshold)
            .map(|(_, url)| url.as_str())
    }

    /// Record a signature unless it is already present.
    pub fn insert(&mut self, signature: Fingerprint, url: String) {
        if !self.entries.iter().any(|(stored, _)| *stored == signature) {
            self.entries.push((signature, url));
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for FingerprintTable {
    fn default() -> Self {
        Self::new(DEFAULT_SIMILARITY_THRESHOLD)
    }
}
