//! Deterministic assignment of payloads to processors.
//!
//! Every processor sees every published event and runs the partition function
//! itself; only the processor whose ordinal comes back handles the event.

use sha2::{Digest, Sha256};
use std::fmt;

/// A domain record the buffer can carry.
///
/// The buffer only needs a stable identity to partition on; the rest of the
/// record is opaque to it.
pub trait Payload: Send + Sync + 'static {
    fn identity(&self) -> &[u8];
}

impl Payload for String {
    fn identity(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl Payload for Vec<u8> {
    fn identity(&self) -> &[u8] {
        self
    }
}

/// Maps a payload identity onto a processor ordinal in `[0, count)`.
///
/// Implementations must be pure: the same identity and count always give the
/// same ordinal, on every processor and every run.
pub trait Partitioner: Send + Sync + fmt::Debug {
    fn partition(&self, identity: &[u8], count: usize) -> usize;
}

/// Partitions on the first eight bytes (big-endian) of the SHA-256 digest of
/// the identity, modulo the processor count.
///
/// Stable across processes and releases, which keeps replays reproducible.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Partitioner;

impl Partitioner for Sha256Partitioner {
    fn partition(&self, identity: &[u8], count: usize) -> usize {
        if count <= 1 {
            return 0;
        }
        let digest = Sha256::digest(identity);
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        (u64::from_be_bytes(prefix) % count as u64) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_processor_owns_everything() {
        let p = Sha256Partitioner;
        for id in ["a", "b", "message_17"] {
            assert_eq!(p.partition(id.as_bytes(), 1), 0);
        }
    }

    #[test]
    fn partition_is_deterministic_and_in_range() {
        let p = Sha256Partitioner;
        for i in 0..500 {
            let id = format!("message_{i}");
            let first = p.partition(id.as_bytes(), 7);
            assert!(first < 7);
            assert_eq!(first, p.partition(id.as_bytes(), 7));
        }
    }

    #[test]
    fn known_digest_prefix() {
        // sha256("") = e3b0c44298fc1c14...
        let expected = (0xe3b0_c442_98fc_1c14u64 % 5) as usize;
        assert_eq!(Sha256Partitioner.partition(b"", 5), expected);
    }

    #[test]
    fn spreads_roughly_evenly() {
        let p = Sha256Partitioner;
        let count = 4;
        let mut buckets = [0usize; 4];
        for _ in 0..4_000 {
            let id = fastrand::u64(..).to_string();
            buckets[p.partition(id.as_bytes(), count)] += 1;
        }
        for (ordinal, hits) in buckets.iter().enumerate() {
            assert!(*hits > 700, "processor {ordinal} only got {hits} of 4000");
        }
    }
}
