//! Serving buckets.
//!
//! Active nodes form a ring over the hosts in the assignments. Each node
//! heartbeats itself and its successor; failing to hear its own heartbeat
//! means the topic is broken, and failing to hear its predecessor starts a
//! new election.

use super::{Processing, State, Transition};
use crate::assignments::BucketAssignments;
use crate::error::Result;
use crate::manager::{Context, TimerKind};
use crate::message::{Filter, Heartbeat, Offline, Query, FIELD_CHANNEL};
use crate::types::{now_ms, Host, ADMIN_CHANNEL};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

#[derive(Debug)]
pub struct ActiveState {
    processing: Processing,
    succ_host: Option<Host>,
    pred_host: Option<Host>,
    my_heartbeat_seen: bool,
    pred_heartbeat_seen: bool,
}

impl ActiveState {
    pub fn new(ctx: Context, assignments: Arc<BucketAssignments>) -> Self {
        let host = ctx.host();
        let leader = assignments.leader().unwrap_or(host.as_str()).to_string();
        let (pred_host, succ_host) = neighbors(&host, &assignments);

        Self {
            processing: Processing::new(ctx, leader, Some(assignments)),
            succ_host,
            pred_host,
            my_heartbeat_seen: false,
            pred_heartbeat_seen: false,
        }
    }

    pub fn processing(&self) -> &Processing {
        &self.processing
    }

    pub fn processing_mut(&mut self) -> &mut Processing {
        &mut self.processing
    }

    /// Next host in the ring, if there is another host.
    pub fn succ_host(&self) -> Option<&str> {
        self.succ_host.as_deref()
    }

    /// Previous host in the ring, if there is another host.
    pub fn pred_host(&self) -> Option<&str> {
        self.pred_host.as_deref()
    }

    pub fn start(&mut self) {
        info!(
            host = %self.processing.host(),
            leader = %self.processing.leader(),
            buckets = self
                .processing
                .assignments()
                .map_or(0, |asgn| asgn.buckets_of(self.processing.host()).len()),
            "Active"
        );

        self.send_heartbeats();

        let props = self.processing.core().properties().clone();
        let core = self.processing.core_mut();
        core.schedule_with_fixed_delay(
            props.active_heartbeat,
            props.active_heartbeat,
            TimerKind::GenerateHeartbeat,
        );
        core.schedule_with_fixed_delay(
            props.inter_heartbeat,
            props.inter_heartbeat,
            TimerKind::CheckSelfHeartbeat,
        );
        if self.pred_host.is_some() {
            core.schedule_with_fixed_delay(
                props.inter_heartbeat,
                props.inter_heartbeat,
                TimerKind::CheckPredecessorHeartbeat,
            );
        }
    }

    pub fn filter(&self) -> Filter {
        Filter::or(vec![
            Filter::equals(FIELD_CHANNEL, ADMIN_CHANNEL),
            Filter::equals(FIELD_CHANNEL, self.processing.host()),
        ])
    }

    pub fn process_heartbeat(&mut self, heartbeat: &Heartbeat) {
        if heartbeat.source == self.processing.host() {
            trace!("Own heartbeat seen");
            self.my_heartbeat_seen = true;
        }
        if self.pred_host.as_deref() == Some(heartbeat.source.as_str()) {
            trace!(pred = %heartbeat.source, "Predecessor heartbeat seen");
            self.pred_heartbeat_seen = true;
        }
    }

    pub fn process_offline(&mut self, source: &str) -> Result<Transition> {
        let assignments = match self.processing.assignments() {
            Some(asgn) if source != self.processing.host() && asgn.has_assignment(source) => asgn,
            _ => return Ok(None),
        };

        let pred_was_leader =
            self.pred_host.as_deref() == Some(source) && self.processing.leader() == source;
        if !self.processing.is_leader() && !pred_was_leader {
            debug!(offline = %source, "Host left, leader will rebalance");
            return Ok(None);
        }

        info!(offline = %source, "Host left, rebalancing");
        let mut alive = assignments.all_hosts();
        alive.remove(source);
        alive.insert(self.processing.host().to_string());
        self.processing.become_leader(&alive).map(Some)
    }

    pub fn process_query(&mut self, source: &str) -> State {
        info!(source = %source, "Query received, rejoining election");
        self.processing.publish_identification();
        self.processing
            .core()
            .go_query(self.processing.assignments().cloned())
    }

    /// Whether a `Leader` from `source` carrying `assignments` outranks this
    /// node: the sender must lead what it sent and precede this host.
    pub fn accepts_leader(&self, source: &str, assignments: &BucketAssignments) -> bool {
        assignments.leader() == Some(source) && source < self.processing.host()
    }

    pub fn process_leader(&mut self, source: &str, assignments: Arc<BucketAssignments>) -> Transition {
        if source == self.processing.host() {
            trace!("Own Leader seen");
            return None;
        }
        if !self.accepts_leader(source, &assignments) {
            warn!(source = %source, host = %self.processing.host(), "Ignoring Leader that does not outrank this host");
            return None;
        }
        if self.processing.assignments() == Some(&assignments) {
            return None;
        }

        let core = self.processing.core();
        if assignments.has_assignment(core.host()) {
            Some(core.go_active(assignments))
        } else {
            info!(leader = %source, "No buckets left, standing down");
            Some(core.go_inactive())
        }
    }

    pub fn on_timer(&mut self, kind: TimerKind) -> Transition {
        match kind {
            TimerKind::GenerateHeartbeat => {
                self.send_heartbeats();
                None
            }
            TimerKind::CheckSelfHeartbeat => {
                if std::mem::take(&mut self.my_heartbeat_seen) {
                    return None;
                }
                warn!(host = %self.processing.host(), "Own heartbeat missed");
                let core = self.processing.core();
                if self.succ_host.is_some() {
                    core.publish_admin(Offline::new(core.host()));
                }
                Some(core.internal_topic_failed())
            }
            TimerKind::CheckPredecessorHeartbeat => {
                if std::mem::take(&mut self.pred_heartbeat_seen) {
                    return None;
                }
                warn!(pred = ?self.pred_host, "Predecessor heartbeat missed");
                let core = self.processing.core();
                core.publish_admin(Query::new(core.host()));
                Some(core.go_query(self.processing.assignments().cloned()))
            }
            _ => None,
        }
    }

    fn send_heartbeats(&self) {
        let core = self.processing.core();
        let now = now_ms();
        core.publish(core.host(), Heartbeat::new(core.host(), now));
        if let Some(succ) = &self.succ_host {
            core.publish(succ, Heartbeat::new(core.host(), now));
        }
    }
}

/// Predecessor and successor of `host` among the assignment hosts,
/// wrapping around.
fn neighbors(host: &str, assignments: &BucketAssignments) -> (Option<Host>, Option<Host>) {
    let mut hosts = assignments.all_hosts();
    hosts.insert(host.to_string());
    let hosts: Vec<Host> = hosts.into_iter().collect();
    if hosts.len() < 2 {
        return (None, None);
    }

    let n = hosts.len();
    let idx = match hosts.iter().position(|h| h == host) {
        Some(idx) => idx,
        None => return (None, None),
    };
    let pred = hosts[(idx + n - 1) % n].clone();
    let succ = hosts[(idx + 1) % n].clone();
    (Some(pred), Some(succ))
}
