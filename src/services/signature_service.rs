//! MinHash fingerprints over question shingle sets.
//!
//! Every position of a [`Signature`] is the minimum, over all shingles, of a
//! SHA-256 derived integer for one fixed seed. Seeds are the integers
//! `0..num_permutations`, so signatures computed by different processes (or
//! cached long ago) stay comparable as long as the permutation count matches.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

pub const DEFAULT_PERMUTATIONS: usize = 100;

/// Value stored at every position when the shingle set is empty.
pub const EMPTY_SLOT: u64 = u64::MAX;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(pub Vec<u64>);

impl Signature {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct SignatureService {
    num_permutations: usize,
}

impl Default for SignatureService {
    fn default() -> Self {
        Self::new(DEFAULT_PERMUTATIONS)
    }
}

impl SignatureService {
    pub fn new(num_permutations: usize) -> Self {
        Self {
            num_permutations: num_permutations.max(1),
        }
    }

    pub fn num_permutations(&self) -> usize {
        self.num_permutations
    }

    pub fn signature(&self, shingles: &HashSet<String>) -> Signature {
        let values = (0..self.num_permutations as u64)
            .map(|seed| {
                shingles
                    .iter()
                    .map(|shingle| seeded_hash(seed, shingle))
                    .min()
                    .unwrap_or(EMPTY_SLOT)
            })
            .collect();
        Signature(values)
    }

    /// Signature of already-normalized text, shingled on whitespace.
    pub fn signature_of_text(&self, normalized: &str) -> Signature {
        self.signature(&shingles(normalized))
    }

    /// Fraction of positions holding the same value. Signatures of different
    /// length are never similar.
    pub fn similarity(a: &Signature, b: &Signature) -> f64 {
        if a.len() != b.len() || a.is_empty() {
            return 0.0;
        }
        let matches = a.0.iter().zip(b.0.iter()).filter(|(x, y)| x == y).count();
        matches as f64 / a.len() as f64
    }
}

/// Whitespace tokens of normalized text.
pub fn shingles(normalized: &str) -> HashSet<String> {
    normalized.split_whitespace().map(str::to_string).collect()
}

fn seeded_hash(seed: u64, item: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_string().as_bytes());
    hasher.update(item.as_bytes());
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(words: &[&str]) -> HashSet<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn self_similarity_is_exact() {
        let svc = SignatureService::default();
        let sig = svc.signature(&set(&["what", "is", "a", "closure", "in", "go"]));
        assert_eq!(sig.len(), DEFAULT_PERMUTATIONS);
        assert_eq!(SignatureService::similarity(&sig, &sig), 1.0);
    }

    #[test]
    fn signature_is_deterministic() {
        let a = SignatureService::new(64).signature(&set(&["goroutine", "channel"]));
        let b = SignatureService::new(64).signature(&set(&["channel", "goroutine"]));
        assert_eq!(a, b);
    }

    #[test]
    fn disjoint_sets_have_low_similarity() {
        let svc = SignatureService::new(256);
        let left: HashSet<String> = (0..200).map(|i| format!("left{}", i)).collect();
        let right: HashSet<String> = (0..200).map(|i| format!("right{}", i)).collect();
        let sim = SignatureService::similarity(&svc.signature(&left), &svc.signature(&right));
        assert!(sim < 0.05, "disjoint similarity too high: {}", sim);
    }

    #[test]
    fn estimate_tracks_jaccard() {
        let svc = SignatureService::new(400);
        let left: HashSet<String> = (0..100).map(|i| format!("w{}", i)).collect();
        let right: HashSet<String> = (50..150).map(|i| format!("w{}", i)).collect();
        // Jaccard = 50 / 150
        let sim = SignatureService::similarity(&svc.signature(&left), &svc.signature(&right));
        assert!((sim - 1.0 / 3.0).abs() < 0.12, "estimate off: {}", sim);
    }

    #[test]
    fn empty_input_fills_floor_value() {
        let sig = SignatureService::new(8).signature(&HashSet::new());
        assert!(sig.0.iter().all(|v| *v == EMPTY_SLOT));
    }

    #[test]
    fn mismatched_lengths_are_not_comparable() {
        let a = SignatureService::new(8).signature(&set(&["x"]));
        let b = SignatureService::new(16).signature(&set(&["x"]));
        assert_eq!(SignatureService::similarity(&a, &b), 0.0);
    }
}
