//! Node metrics.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     PoolingMetrics                       │
//! │  ┌─────────────────────────┐  ┌───────────────────────┐  │
//! │  │  Counters               │  │  Gauges               │  │
//! │  │ - transitions{state}    │  │ - owned_buckets       │  │
//! │  │ - messages rx/discarded │  │                       │  │
//! │  │ - heartbeats missed     │  │                       │  │
//! │  │ - leader accessions     │  │                       │  │
//! │  │ - forwards              │  │                       │  │
//! │  └─────────────────────────┘  └───────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```

mod counters;
mod gauges;

pub use counters::{Counter, LabeledCounter};
pub use gauges::Gauge;

/// Counters and gauges for one node.
#[derive(Debug)]
pub struct PoolingMetrics {
    /// State transitions, labelled by the state entered.
    pub transitions: LabeledCounter,
    /// Messages decoded from the topic.
    pub messages_received: Counter,
    /// Messages that failed decoding or the current filter.
    pub messages_discarded: Counter,
    /// Heartbeat checks that found nothing.
    pub heartbeats_missed: Counter,
    /// Times this node announced itself as leader.
    pub leader_accessions: Counter,
    /// Work items forwarded to another host.
    pub forwards_sent: Counter,
    /// Forwards dropped as expired or over the hop limit.
    pub forwards_dropped: Counter,
    /// Forwards delivered locally.
    pub forwards_handled: Counter,
    /// Buckets this node currently serves.
    pub owned_buckets: Gauge,
}

impl PoolingMetrics {
    pub fn new() -> Self {
        Self {
            transitions: LabeledCounter::new(
                "pooling_transitions_total",
                "State transitions by state entered",
                "state",
            ),
            messages_received: Counter::new("pooling_messages_received_total", "Messages received"),
            messages_discarded: Counter::new(
                "pooling_messages_discarded_total",
                "Messages discarded",
            ),
            heartbeats_missed: Counter::new("pooling_heartbeats_missed_total", "Missed heartbeats"),
            leader_accessions: Counter::new(
                "pooling_leader_accessions_total",
                "Leader announcements by this node",
            ),
            forwards_sent: Counter::new("pooling_forwards_sent_total", "Forwards sent"),
            forwards_dropped: Counter::new("pooling_forwards_dropped_total", "Forwards dropped"),
            forwards_handled: Counter::new("pooling_forwards_handled_total", "Forwards handled"),
            owned_buckets: Gauge::new("pooling_owned_buckets", "Buckets owned by this node"),
        }
    }

    /// Record entry into a state.
    pub fn record_transition(&self, state: &str) {
        self.transitions.inc(state);
    }

    /// Take a point-in-time copy.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            transitions: self.transitions.total(),
            messages_received: self.messages_received.get(),
            messages_discarded: self.messages_discarded.get(),
            heartbeats_missed: self.heartbeats_missed.get(),
            leader_accessions: self.leader_accessions.get(),
            forwards_sent: self.forwards_sent.get(),
            forwards_dropped: self.forwards_dropped.get(),
            forwards_handled: self.forwards_handled.get(),
            owned_buckets: self.owned_buckets.get(),
        }
    }
}

impl Default for PoolingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy of the metric values at one moment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub transitions: u64,
    pub messages_received: u64,
    pub messages_discarded: u64,
    pub heartbeats_missed: u64,
    pub leader_accessions: u64,
    pub forwards_sent: u64,
    pub forwards_dropped: u64,
    pub forwards_handled: u64,
    pub owned_buckets: i64,
}

impl MetricsSnapshot {
    /// Fraction of received messages that were discarded.
    pub fn discard_rate(&self) -> f64 {
        if self.messages_received == 0 {
            0.0
        } else {
            self.messages_discarded as f64 / self.messages_received as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let metrics = PoolingMetrics::new();
        metrics.record_transition("query");
        metrics.record_transition("active");
        metrics.messages_received.inc_by(4);
        metrics.messages_discarded.inc();
        metrics.owned_buckets.set(512);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.transitions, 2);
        assert_eq!(snapshot.owned_buckets, 512);
        assert!((snapshot.discard_rate() - 0.25).abs() < f64::EPSILON);
        assert_eq!(metrics.transitions.get("active"), 1);
    }

    #[test]
    fn test_empty_discard_rate() {
        assert_eq!(MetricsSnapshot::default().discard_rate(), 0.0);
    }
}
