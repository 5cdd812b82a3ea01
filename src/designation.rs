//! Choosing the primary among hosts that record when they were designated.
//!
//! Some deployments keep a per-host record of whether the host currently
//! considers itself designated and when it last claimed that role. When such
//! records disagree, the pick is:
//! - if any host is designated, the one designated earliest (it claimed the
//!   role first and others should defer to it);
//! - otherwise the host designated most recently (it was the last primary).
//!
//! Ties on the date fall to the lowest host.

use crate::types::Host;

/// A host's designation record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRecord {
    /// The host.
    pub host: Host,
    /// Whether the host currently claims to be primary.
    pub designated: bool,
    /// When the host last became primary, in milliseconds since the epoch.
    pub designated_date_ms: u64,
}

impl HostRecord {
    /// Create a new record.
    pub fn new(host: impl Into<Host>, designated: bool, designated_date_ms: u64) -> Self {
        Self {
            host: host.into(),
            designated,
            designated_date_ms,
        }
    }
}

/// Pick the record that should be primary.
pub fn most_recent_primary(records: &[HostRecord]) -> Option<&HostRecord> {
    let designated = records
        .iter()
        .filter(|r| r.designated)
        .min_by(|a, b| {
            a.designated_date_ms
                .cmp(&b.designated_date_ms)
                .then_with(|| a.host.cmp(&b.host))
        });

    designated.or_else(|| {
        records.iter().max_by(|a, b| {
            a.designated_date_ms
                .cmp(&b.designated_date_ms)
                .then_with(|| b.host.cmp(&a.host))
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: u64 = 1_700_000_000_000;
    const DAY: u64 = 86_400_000;

    fn records(designated: bool) -> Vec<HostRecord> {
        vec![
            HostRecord::new("pdp1", designated, T - 2 * DAY),
            HostRecord::new("pdp2", designated, T - 3 * DAY),
            HostRecord::new("pdp3", designated, T - DAY),
            HostRecord::new("pdp4", designated, T),
        ]
    }

    #[test]
    fn test_none_designated_picks_latest() {
        let recs = records(false);
        assert_eq!(most_recent_primary(&recs).unwrap().host, "pdp4");
    }

    #[test]
    fn test_all_designated_picks_earliest() {
        let recs = records(true);
        assert_eq!(most_recent_primary(&recs).unwrap().host, "pdp2");
    }

    #[test]
    fn test_designated_beats_more_recent() {
        let mut recs = records(false);
        recs[2].designated = true;
        assert_eq!(most_recent_primary(&recs).unwrap().host, "pdp3");
    }

    #[test]
    fn test_ties_fall_to_lowest_host() {
        let recs = vec![
            HostRecord::new("pdp-b", false, T),
            HostRecord::new("pdp-a", false, T),
        ];
        assert_eq!(most_recent_primary(&recs).unwrap().host, "pdp-a");
        assert!(most_recent_primary(&[]).is_none());
    }
}
