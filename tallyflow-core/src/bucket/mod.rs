//! Deterministic bucketing of record identifiers.
//!
//! Records of one task (or one dataset) are spread over a fixed number of
//! partitions so no single partition grows with the size of the task. The
//! hash is part of the storage format: rows already written under one hash
//! are only found again under the same hash, so [`bucket_hash`] must never
//! change.

mod scan;

pub use scan::{BucketCursor, count_contiguous, page_cursor, scan_buckets};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Number of partitions a logical table is split into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BucketCount(u16);

impl BucketCount {
    /// Partitions of the processed-records table.
    pub const PROCESSED_RECORDS: BucketCount = BucketCount(128);
    /// Partitions of the harvested-records ledger.
    pub const HARVESTED_RECORDS: BucketCount = BucketCount(64);

    /// Returns `None` for zero.
    pub const fn new(count: u16) -> Option<Self> {
        if count == 0 { None } else { Some(Self(count)) }
    }

    /// Clamps `count` into the supported range `1..=u16::MAX`.
    pub fn clamped(count: i64) -> Self {
        Self(u16::try_from(count.max(1)).unwrap_or(u16::MAX))
    }

    pub const fn get(self) -> u16 {
        self.0
    }

    /// Bucket indices in scan order.
    pub fn indices(self) -> impl Iterator<Item = i32> {
        0..i32::from(self.0)
    }
}

/// First eight bytes of the SHA-256 digest, big endian.
pub fn bucket_hash(identifier: &str) -> u64 {
    let digest = Sha256::digest(identifier.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

/// Bucket an identifier falls into.
pub fn bucket_for(identifier: &str, count: BucketCount) -> i32 {
    let index = bucket_hash(identifier) % u64::from(count.get());
    // index < u16::MAX
    index as i32
}

/// Bucket of a notification row, derived from its sequence number.
///
/// Sequence numbers start at 1, so bucket 0 holds the first
/// `bucket_size - 1` rows and every later bucket exactly `bucket_size`.
pub fn notification_bucket(resource_num: i64, bucket_size: i64) -> i32 {
    let bucket = resource_num.max(0) / bucket_size.max(1);
    i32::try_from(bucket).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CORPUS: &[(&str, u64)] = &[
        ("", 16406829232824261652),
        ("a", 14598278634844962250),
        ("exampleRecordId", 15093647958064040847),
        ("/2048128/618580", 2273805263600025831),
        (
            "http://data.europeana.eu/item/2048128/618580",
            13777667666244010094,
        ),
        ("oai:repository.example.org:record-42", 16915175284137344770),
        ("r1", 9436142683398368141),
        ("r2", 15814386800217387553),
        ("r3", 16473432630976024324),
        ("zażółć gęślą jaźń", 12343969905942437336),
    ];

    #[test]
    fn hash_matches_pinned_corpus() {
        for (identifier, expected) in CORPUS {
            assert_eq!(
                bucket_hash(identifier),
                *expected,
                "hash drifted for {identifier:?}"
            );
        }
    }

    #[test]
    fn buckets_match_pinned_corpus() {
        let processed = BucketCount::PROCESSED_RECORDS;
        let harvested = BucketCount::HARVESTED_RECORDS;

        assert_eq!(bucket_for("", harvested), 20);
        assert_eq!(bucket_for("a", harvested), 10);
        assert_eq!(bucket_for("a", processed), 74);
        assert_eq!(bucket_for("/2048128/618580", harvested), 39);
        assert_eq!(bucket_for("/2048128/618580", processed), 103);
        assert_eq!(bucket_for("zażółć gęślą jaźń", processed), 88);
        assert_eq!(bucket_for("r3", processed), 4);
    }

    #[test]
    fn bucket_always_within_range() {
        let count = BucketCount::new(7).unwrap();
        for i in 0..500 {
            let bucket = bucket_for(&format!("record-{i}"), count);
            assert!((0..7).contains(&bucket));
        }
    }

    #[test]
    fn zero_buckets_rejected() {
        assert!(BucketCount::new(0).is_none());
        assert_eq!(BucketCount::new(3).map(|c| c.indices().count()), Some(3));
        assert_eq!(BucketCount::clamped(0).get(), 1);
        assert_eq!(BucketCount::clamped(1_000_000).get(), u16::MAX);
    }

    #[test]
    fn notification_buckets_are_contiguous() {
        assert_eq!(notification_bucket(1, 10_000), 0);
        assert_eq!(notification_bucket(9_999, 10_000), 0);
        assert_eq!(notification_bucket(10_000, 10_000), 1);
        assert_eq!(notification_bucket(25_000, 10_000), 2);
    }
}
