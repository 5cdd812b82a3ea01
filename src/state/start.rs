use super::{StateCore, Transition};
use crate::manager::{Context, TimerKind};
use crate::message::{Filter, Heartbeat, Query, FIELD_CHANNEL, FIELD_TIMESTAMP};
use crate::types::{now_ms, ADMIN_CHANNEL};
use tracing::{debug, info};

/// Initial state: proves the internal topic works by receiving its own
/// heartbeat before taking part in an election.
#[derive(Debug)]
pub struct StartState {
    core: StateCore,
    heartbeat_timestamp_ms: u64,
}

impl StartState {
    pub fn new(ctx: Context) -> Self {
        Self {
            core: StateCore::new(ctx),
            heartbeat_timestamp_ms: now_ms(),
        }
    }

    pub(crate) fn core(&self) -> &StateCore {
        &self.core
    }

    pub(crate) fn core_mut(&mut self) -> &mut StateCore {
        &mut self.core
    }

    /// Timestamp carried by the probe heartbeat.
    pub fn heartbeat_timestamp_ms(&self) -> u64 {
        self.heartbeat_timestamp_ms
    }

    pub fn start(&mut self) {
        let host = self.core.host().to_string();
        debug!(host = %host, timestamp = self.heartbeat_timestamp_ms, "Probing internal topic");

        self.core
            .publish(&host, Heartbeat::new(host.as_str(), self.heartbeat_timestamp_ms));
        let timeout = self.core.properties().start_heartbeat;
        self.core.schedule(timeout, TimerKind::StartHeartbeat);
    }

    pub fn filter(&self) -> Filter {
        Filter::or(vec![
            Filter::equals(FIELD_CHANNEL, ADMIN_CHANNEL),
            Filter::and(vec![
                Filter::equals(FIELD_CHANNEL, self.core.host()),
                Filter::equals(FIELD_TIMESTAMP, self.heartbeat_timestamp_ms.to_string()),
            ]),
        ])
    }

    pub fn process_heartbeat(&mut self, heartbeat: &Heartbeat) -> Transition {
        if heartbeat.source != self.core.host()
            || heartbeat.timestamp_ms != self.heartbeat_timestamp_ms
        {
            return None;
        }

        info!(host = %self.core.host(), "Internal topic verified, querying peers");
        self.core.publish_admin(Query::new(self.core.host()));
        Some(self.core.go_query(None))
    }

    pub fn on_timer(&mut self, kind: TimerKind) -> Transition {
        match kind {
            TimerKind::StartHeartbeat => Some(self.core.internal_topic_failed()),
            _ => None,
        }
    }
}
