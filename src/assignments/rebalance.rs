//! Leader-side reconciliation of the bucket array with the live membership.

use super::BucketAssignments;
use crate::types::Host;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Rebuild a bucket array for the given set of alive hosts.
///
/// 1. Without previous assignments every one of `max_buckets` buckets goes
///    to the first alive host (the leader).
/// 2. Otherwise the previous array is copied; buckets held by hosts that are
///    no longer alive become unassigned.
/// 3. Unassigned buckets are filled in index order, each going to the alive
///    host that currently owns the fewest buckets (lowest host wins ties).
/// 4. Buckets then move, highest index first, from the most loaded host to
///    the least loaded one until counts differ by at most one.
///
/// The output depends only on the inputs. When `alive` is empty there is
/// nobody to assign to and the reconciled array is returned as is.
pub fn rebalance(
    previous: Option<&BucketAssignments>,
    alive: &BTreeSet<Host>,
    max_buckets: usize,
) -> BucketAssignments {
    let mut slots: Vec<Option<Host>> = match previous {
        Some(prev) if !prev.is_empty() => prev
            .host_array()
            .iter()
            .map(|owner| owner.as_ref().filter(|h| alive.contains(*h)).cloned())
            .collect(),
        _ => vec![alive.iter().next().cloned(); max_buckets],
    };

    if alive.is_empty() {
        return BucketAssignments::new(slots);
    }

    let mut counts: BTreeMap<&str, usize> = alive.iter().map(|h| (h.as_str(), 0)).collect();
    for owner in slots.iter().flatten() {
        if let Some(count) = counts.get_mut(owner.as_str()) {
            *count += 1;
        }
    }

    let mut filled = 0usize;
    for slot in slots.iter_mut().filter(|s| s.is_none()) {
        let host = least_loaded(&counts);
        *slot = Some(host.to_string());
        *counts.entry(host).or_insert(0) += 1;
        filled += 1;
    }

    let mut moved = 0usize;
    loop {
        let most = most_loaded(&counts);
        let least = least_loaded(&counts);
        if counts[most] - counts[least] <= 1 {
            break;
        }

        let bucket = slots
            .iter()
            .rposition(|s| s.as_deref() == Some(most))
            .unwrap_or_default();
        slots[bucket] = Some(least.to_string());

        if let Some(count) = counts.get_mut(most) {
            *count -= 1;
        }
        if let Some(count) = counts.get_mut(least) {
            *count += 1;
        }
        moved += 1;
    }

    debug!(
        buckets = slots.len(),
        hosts = alive.len(),
        filled,
        moved,
        "Rebalanced bucket assignments"
    );

    BucketAssignments::new(slots)
}

/// Host with the fewest buckets; the lowest host wins ties.
fn least_loaded<'a>(counts: &BTreeMap<&'a str, usize>) -> &'a str {
    let mut best: Option<(&'a str, usize)> = None;
    for (&host, &count) in counts {
        if best.map_or(true, |(_, c)| count < c) {
            best = Some((host, count));
        }
    }
    best.map(|(h, _)| h).unwrap_or_default()
}

/// Host with the most buckets; the lowest host wins ties.
fn most_loaded<'a>(counts: &BTreeMap<&'a str, usize>) -> &'a str {
    let mut best: Option<(&'a str, usize)> = None;
    for (&host, &count) in counts {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((host, count));
        }
    }
    best.map(|(h, _)| h).unwrap_or_default()
}
