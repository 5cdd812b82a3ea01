//! Bucket assignments: which host owns which slice of the work keyspace.
//!
//! The keyspace is split into a fixed number of buckets. A key belongs to
//! bucket `hash(key) % len`, and the bucket's owner handles the key.
//!
//! ```text
//! index:   0        1        2        3        4
//!        ┌────────┬────────┬────────┬────────┬────────┐
//!        │ host-a │ host-b │ host-a │ host-c │ host-b │
//!        └────────┴────────┴────────┴────────┴────────┘
//!
//! key "req-42" → xxhash64 → 17 → 17 % 5 = 2 → host-a
//! ```
//!
//! Assignments are built by the leader (see [`rebalance`]) and never
//! mutated afterwards; a new leader message replaces them wholesale.

mod rebalance;

pub use rebalance::rebalance;

use crate::error::ValidationError;
use crate::types::Host;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};
use twox_hash::XxHash64;

/// Mapping from bucket index to owning host.
///
/// Serializes as an ordered list of host-or-null.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BucketAssignments {
    host_array: Vec<Option<Host>>,
}

impl BucketAssignments {
    /// Create assignments from a bucket array.
    pub fn new(host_array: Vec<Option<Host>>) -> Self {
        Self { host_array }
    }

    /// Create fully assigned buckets from a list of owners.
    pub fn from_hosts<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Host>,
    {
        Self {
            host_array: hosts.into_iter().map(|h| Some(h.into())).collect(),
        }
    }

    /// Get the bucket array.
    pub fn host_array(&self) -> &[Option<Host>] {
        &self.host_array
    }

    /// Get the number of buckets.
    pub fn len(&self) -> usize {
        self.host_array.len()
    }

    /// Check if there are no buckets.
    pub fn is_empty(&self) -> bool {
        self.host_array.is_empty()
    }

    /// Get the owner of a bucket.
    pub fn get(&self, bucket: usize) -> Option<&str> {
        self.host_array.get(bucket).and_then(|h| h.as_deref())
    }

    /// The lowest host holding a bucket.
    ///
    /// For assignments published by a leader this is the leader itself.
    pub fn leader(&self) -> Option<&str> {
        self.host_array.iter().flatten().map(String::as_str).min()
    }

    /// Check if a host owns at least one bucket.
    pub fn has_assignment(&self, host: &str) -> bool {
        self.host_array.iter().flatten().any(|h| h == host)
    }

    /// All hosts that own a bucket, sorted.
    pub fn all_hosts(&self) -> BTreeSet<Host> {
        self.host_array.iter().flatten().cloned().collect()
    }

    /// Number of buckets owned by each host.
    pub fn bucket_counts(&self) -> BTreeMap<Host, usize> {
        let mut counts = BTreeMap::new();
        for host in self.host_array.iter().flatten() {
            *counts.entry(host.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Indexes of the buckets owned by a host.
    pub fn buckets_of(&self, host: &str) -> Vec<usize> {
        self.host_array
            .iter()
            .enumerate()
            .filter(|(_, h)| h.as_deref() == Some(host))
            .map(|(i, _)| i)
            .collect()
    }

    /// Hash a key to a 64-bit value.
    pub fn hash_key(key: &[u8]) -> u64 {
        let mut hasher = XxHash64::with_seed(0);
        key.hash(&mut hasher);
        hasher.finish()
    }

    /// The bucket a key falls into, or `None` when there are no buckets.
    pub fn bucket_of(&self, key: &[u8]) -> Option<usize> {
        if self.host_array.is_empty() {
            return None;
        }
        Some((Self::hash_key(key) % self.host_array.len() as u64) as usize)
    }

    /// The host that owns a key.
    pub fn owner_of(&self, key: &[u8]) -> Option<&str> {
        self.bucket_of(key).and_then(|bucket| self.get(bucket))
    }

    /// Check that the assignments are well formed.
    ///
    /// Fails when no bucket is assigned, or when assigned and unassigned
    /// buckets are mixed.
    pub fn check_validity(&self) -> Result<(), ValidationError> {
        if self.host_array.iter().all(Option::is_none) {
            return Err(ValidationError::EmptyAssignments);
        }

        match self.host_array.iter().position(Option::is_none) {
            Some(bucket) => Err(ValidationError::UnassignedBucket(bucket)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BucketAssignments {
        BucketAssignments::from_hosts(["host-b", "host-a", "host-c", "host-a"])
    }

    #[test]
    fn test_leader_is_lowest_host() {
        assert_eq!(sample().leader(), Some("host-a"));
        assert_eq!(BucketAssignments::default().leader(), None);
    }

    #[test]
    fn test_has_assignment() {
        let asgn = sample();
        assert!(asgn.has_assignment("host-a"));
        assert!(asgn.has_assignment("host-c"));
        assert!(!asgn.has_assignment("host-d"));
    }

    #[test]
    fn test_all_hosts_and_counts() {
        let asgn = sample();
        let hosts: Vec<_> = asgn.all_hosts().into_iter().collect();
        assert_eq!(hosts, vec!["host-a", "host-b", "host-c"]);

        let counts = asgn.bucket_counts();
        assert_eq!(counts["host-a"], 2);
        assert_eq!(counts["host-b"], 1);
        assert_eq!(counts["host-c"], 1);
        assert_eq!(asgn.buckets_of("host-a"), vec![1, 3]);
    }

    #[test]
    fn test_structural_equality() {
        assert_eq!(sample(), sample());
        assert_ne!(sample(), BucketAssignments::from_hosts(["host-a"]));
    }

    #[test]
    fn test_owner_of_is_stable() {
        let asgn = sample();
        let bucket = asgn.bucket_of(b"request-1").unwrap();
        assert!(bucket < asgn.len());
        assert_eq!(asgn.bucket_of(b"request-1"), Some(bucket));
        assert_eq!(asgn.owner_of(b"request-1"), asgn.get(bucket));

        assert_eq!(BucketAssignments::default().owner_of(b"request-1"), None);
    }

    #[test]
    fn test_validity() {
        assert!(sample().check_validity().is_ok());

        assert_eq!(
            BucketAssignments::default().check_validity(),
            Err(ValidationError::EmptyAssignments)
        );
        assert_eq!(
            BucketAssignments::new(vec![None, None]).check_validity(),
            Err(ValidationError::EmptyAssignments)
        );
        assert_eq!(
            BucketAssignments::new(vec![Some("host-a".into()), None]).check_validity(),
            Err(ValidationError::UnassignedBucket(1))
        );
    }

    #[test]
    fn test_serializes_as_list() {
        let asgn = BucketAssignments::new(vec![Some("host-a".into()), None]);
        let json = serde_json::to_string(&asgn).unwrap();
        assert_eq!(json, r#"["host-a",null]"#);

        let back: BucketAssignments = serde_json::from_str(&json).unwrap();
        assert_eq!(back, asgn);
    }
}
