//! Election round.
//!
//! The node collects `Identification`s on the admin channel for the
//! identification window, adopting the lowest host seen as leader and the
//! assignments published by the lowest leader. If it is the leader at the end
//! of the window it rebalances and announces; otherwise it waits a further
//! window for someone else's `Leader`.

use super::{Processing, Transition};
use crate::assignments::BucketAssignments;
use crate::error::Result;
use crate::manager::{Context, TimerKind};
use crate::message::{Filter, Identification, FIELD_CHANNEL};
use crate::types::{Host, ADMIN_CHANNEL};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Where a query round is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPhase {
    AwaitIdentification,
    AwaitLeader,
}

#[derive(Debug)]
pub struct QueryState {
    processing: Processing,
    alive: BTreeSet<Host>,
    phase: QueryPhase,
}

impl QueryState {
    /// Start a round with self as leader, seeded with known assignments.
    pub fn new(ctx: Context, assignments: Option<Arc<BucketAssignments>>) -> Self {
        let host = ctx.host();
        let mut alive = BTreeSet::new();
        alive.insert(host.clone());
        Self {
            processing: Processing::new(ctx, host, assignments),
            alive,
            phase: QueryPhase::AwaitIdentification,
        }
    }

    pub fn processing(&self) -> &Processing {
        &self.processing
    }

    pub fn processing_mut(&mut self) -> &mut Processing {
        &mut self.processing
    }

    /// Hosts known to be alive, self included.
    pub fn alive(&self) -> &BTreeSet<Host> {
        &self.alive
    }

    pub fn phase(&self) -> QueryPhase {
        self.phase
    }

    pub fn start(&mut self) {
        let window = self.processing.core().properties().identification;
        self.processing
            .core_mut()
            .schedule(window, TimerKind::AwaitIdentification);
    }

    pub fn filter(&self) -> Filter {
        Filter::equals(FIELD_CHANNEL, ADMIN_CHANNEL)
    }

    pub fn process_identification(&mut self, ident: Identification) {
        debug!(source = %ident.source, "Identification received");

        if ident.source.as_str() < self.processing.leader() {
            self.processing.set_leader(ident.source.clone());
        }
        self.alive.insert(ident.source);
        self.merge(ident.assignments);
    }

    pub fn process_leader(&mut self, source: &str, assignments: Arc<BucketAssignments>) -> Result<Transition> {
        if source >= self.processing.host() {
            self.merge(Some(assignments));
            return Ok(None);
        }

        info!(leader = %source, "Leader announced during query");
        let core = self.processing.core();
        if assignments.has_assignment(core.host()) {
            Ok(Some(core.go_active(assignments)))
        } else {
            Ok(Some(core.go_inactive()))
        }
    }

    pub fn process_offline(&mut self, source: &str) -> Result<Transition> {
        if source == self.processing.host() {
            return Ok(None);
        }

        self.alive.remove(source);
        if source != self.processing.leader() {
            return Ok(None);
        }

        // alive always holds self
        let next = match self.alive.iter().next() {
            Some(first) => first.clone(),
            None => self.processing.host().to_string(),
        };
        debug!(offline = %source, leader = %next, "Leader left during query");
        self.processing.set_leader(next);

        if self.processing.is_leader() && self.phase == QueryPhase::AwaitLeader {
            return self.processing.become_leader(&self.alive).map(Some);
        }
        Ok(None)
    }

    pub fn process_query(&mut self, source: &str) {
        debug!(source = %source, "Answering query");
        self.processing.publish_identification();
    }

    pub fn on_timer(&mut self, kind: TimerKind) -> Result<Transition> {
        match kind {
            TimerKind::AwaitIdentification => {
                self.phase = QueryPhase::AwaitLeader;
                if self.processing.is_leader() {
                    return self.processing.become_leader(&self.alive).map(Some);
                }
                let window = self.processing.core().properties().leader;
                self.processing
                    .core_mut()
                    .schedule(window, TimerKind::AwaitLeader);
                Ok(None)
            }
            TimerKind::AwaitLeader => {
                let core = self.processing.core();
                match self.processing.assignments() {
                    Some(asgn) if asgn.has_assignment(core.host()) => {
                        Ok(Some(core.go_active(asgn.clone())))
                    }
                    _ => Ok(Some(core.go_inactive())),
                }
            }
            _ => Ok(None),
        }
    }

    fn merge(&mut self, incoming: Option<Arc<BucketAssignments>>) {
        let incoming = match incoming {
            Some(asgn) if !asgn.is_empty() => asgn,
            _ => return,
        };

        let replace = match self.processing.assignments() {
            Some(local) if !local.is_empty() => match (incoming.leader(), local.leader()) {
                (Some(theirs), Some(ours)) => theirs < ours,
                (Some(_), None) => true,
                _ => false,
            },
            _ => true,
        };

        if replace {
            self.processing.set_assignments(Some(incoming));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Leader, Message, Offline, Query};
    use crate::state::State;
    use crate::testing::{on_channel, RecordingManager, HOST1, HOST2, HOST3, HOST4, MY_HOST};
    use proptest::prelude::*;

    fn asgn(hosts: &[&str]) -> Arc<BucketAssignments> {
        Arc::new(BucketAssignments::from_hosts(hosts.iter().copied()))
    }

    fn query(mgr: &Arc<RecordingManager>, assignments: Option<Arc<BucketAssignments>>) -> State {
        let mut state = mgr.factory_state(|ctx| State::Query(QueryState::new(ctx, assignments)));
        state.start();
        state
    }

    fn inner(state: &State) -> &QueryState {
        match state {
            State::Query(q) => q,
            other => panic!("not querying: {}", other.name()),
        }
    }

    fn identify(state: &mut State, source: &str, assignments: Option<Arc<BucketAssignments>>) {
        let next = state
            .process(Identification::new(source, assignments).into())
            .unwrap();
        assert!(next.is_none());
    }

    #[test]
    fn test_starts_as_own_leader() {
        let mgr = RecordingManager::new(HOST2);
        let state = query(&mgr, Some(asgn(&[HOST1])));

        assert_eq!(state.leader(), Some(HOST2));
        assert_eq!(inner(&state).alive().len(), 1);
        assert_eq!(inner(&state).phase(), QueryPhase::AwaitIdentification);
        assert_eq!(mgr.timer_kinds(), vec![TimerKind::AwaitIdentification]);
    }

    #[test]
    fn test_filter_admin_only() {
        let mgr = RecordingManager::new(MY_HOST);
        let state = query(&mgr, None);
        let filter = state.filter();

        assert!(filter.matches(&on_channel(Query::new(HOST1), ADMIN_CHANNEL)));
        assert!(!filter.matches(&on_channel(Query::new(HOST1), MY_HOST)));
    }

    #[test]
    fn test_identification_lowers_leader() {
        let mgr = RecordingManager::new(HOST2);
        let mut state = query(&mgr, None);

        identify(&mut state, HOST3, None);
        assert_eq!(state.leader(), Some(HOST2));

        identify(&mut state, HOST1, None);
        assert_eq!(state.leader(), Some(HOST1));
        assert_eq!(inner(&state).alive().len(), 3);
    }

    #[test]
    fn test_identification_merges_lower_leader_assignments() {
        let mgr = RecordingManager::new(HOST3);
        let mut state = query(&mgr, None);

        let from_two = asgn(&[HOST2, HOST3]);
        identify(&mut state, HOST2, Some(from_two.clone()));
        assert_eq!(state.assignments(), Some(&from_two));

        let from_one = asgn(&[HOST1, HOST3]);
        identify(&mut state, HOST1, Some(from_one.clone()));
        assert_eq!(state.assignments(), Some(&from_one));

        // a higher leader never replaces what we have
        identify(&mut state, HOST2, Some(from_two));
        assert_eq!(state.assignments(), Some(&from_one));

        // empty assignments are ignored
        identify(&mut state, HOST2, Some(Arc::new(BucketAssignments::default())));
        assert_eq!(state.assignments(), Some(&from_one));
    }

    #[test]
    fn test_query_answered_without_transition() {
        let known = asgn(&[MY_HOST]);
        let mgr = RecordingManager::new(MY_HOST);
        let mut state = query(&mgr, Some(known.clone()));

        assert!(state.process(Query::new(HOST1).into()).unwrap().is_none());
        let published = mgr.published_of("Identification");
        assert_eq!(published.len(), 1);
        assert_eq!(
            published[0].1,
            on_channel(Identification::new(MY_HOST, Some(known)), ADMIN_CHANNEL)
        );
    }

    #[test]
    fn test_lower_leader_with_my_bucket_goes_active() {
        let mgr = RecordingManager::new(HOST2);
        let mut state = query(&mgr, None);

        let announced = asgn(&[HOST1, HOST2]);
        let next = state
            .process(Leader::new(HOST1, announced.clone()).into())
            .unwrap()
            .unwrap();
        assert_eq!(next.name(), "active");
        assert_eq!(next.assignments(), Some(&announced));
        assert_eq!(next.leader(), Some(HOST1));
        assert_eq!(mgr.distributed(), vec![Some(announced.clone()), Some(announced)]);
    }

    #[test]
    fn test_lower_leader_without_my_bucket_goes_inactive() {
        let mgr = RecordingManager::new(HOST2);
        let mut state = query(&mgr, None);

        let next = state
            .process(Leader::new(HOST1, asgn(&[HOST1, HOST3])).into())
            .unwrap()
            .unwrap();
        assert_eq!(next.name(), "inactive");
    }

    #[test]
    fn test_higher_leader_is_merged_only() {
        let mgr = RecordingManager::new(HOST1);
        let mut state = query(&mgr, None);

        let announced = asgn(&[HOST2, HOST3]);
        assert!(state
            .process(Leader::new(HOST2, announced.clone()).into())
            .unwrap()
            .is_none());
        assert_eq!(state.assignments(), Some(&announced));
        assert_eq!(state.leader(), Some(HOST1));
    }

    #[test]
    fn test_leader_after_identification_window() {
        let mgr = RecordingManager::new(MY_HOST);
        let mut state = query(&mgr, None);
        identify(&mut state, HOST1, None);
        identify(&mut state, HOST2, None);

        let id = mgr.timer_id(TimerKind::AwaitIdentification).unwrap();
        let next = state.timer_fired(id).unwrap().unwrap();
        assert_eq!(next.name(), "active");
        assert_eq!(next.leader(), Some(MY_HOST));

        let counts = next.assignments().unwrap().bucket_counts();
        assert_eq!(counts.keys().cloned().collect::<Vec<_>>(), vec![MY_HOST, HOST1, HOST2]);
        assert_eq!(mgr.published_of("Leader").len(), 1);
    }

    #[test]
    fn test_follower_waits_for_leader() {
        let mgr = RecordingManager::new(HOST2);
        let mut state = query(&mgr, None);
        identify(&mut state, HOST1, None);

        let id = mgr.timer_id(TimerKind::AwaitIdentification).unwrap();
        assert!(state.timer_fired(id).unwrap().is_none());
        assert_eq!(inner(&state).phase(), QueryPhase::AwaitLeader);
        assert!(mgr.timer_id(TimerKind::AwaitLeader).is_some());
        assert!(mgr.published_of("Leader").is_empty());
    }

    #[test]
    fn test_leader_window_expiry() {
        // with a bucket: resume serving
        let mgr = RecordingManager::new(HOST2);
        let mut state = query(&mgr, None);
        identify(&mut state, HOST1, Some(asgn(&[HOST1, HOST2])));
        state
            .timer_fired(mgr.timer_id(TimerKind::AwaitIdentification).unwrap())
            .unwrap();
        let next = state
            .timer_fired(mgr.timer_id(TimerKind::AwaitLeader).unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(next.name(), "active");

        // without one: stand down
        let mgr = RecordingManager::new(HOST2);
        let mut state = query(&mgr, None);
        identify(&mut state, HOST1, None);
        state
            .timer_fired(mgr.timer_id(TimerKind::AwaitIdentification).unwrap())
            .unwrap();
        let next = state
            .timer_fired(mgr.timer_id(TimerKind::AwaitLeader).unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(next.name(), "inactive");
    }

    #[test]
    fn test_offline_leader_during_identification() {
        let mgr = RecordingManager::new(HOST2);
        let mut state = query(&mgr, None);
        identify(&mut state, HOST1, None);
        identify(&mut state, HOST3, None);

        // identification still open: pick the next leader but wait
        assert!(state.process(Offline::new(HOST1).into()).unwrap().is_none());
        assert_eq!(state.leader(), Some(HOST2));
        assert!(!inner(&state).alive().contains(HOST1));
        assert!(mgr.published_of("Leader").is_empty());
    }

    #[test]
    fn test_offline_leader_after_identification() {
        let mgr = RecordingManager::new(HOST2);
        let mut state = query(&mgr, None);
        identify(&mut state, HOST1, None);
        identify(&mut state, HOST3, None);
        state
            .timer_fired(mgr.timer_id(TimerKind::AwaitIdentification).unwrap())
            .unwrap();

        let next = state.process(Offline::new(HOST1).into()).unwrap().unwrap();
        assert_eq!(next.name(), "active");
        assert_eq!(next.leader(), Some(HOST2));
        let hosts = next.assignments().unwrap().all_hosts();
        assert_eq!(hosts.into_iter().collect::<Vec<_>>(), vec![HOST2, HOST3]);
    }

    #[test]
    fn test_offline_non_leader_or_self() {
        let mgr = RecordingManager::new(HOST1);
        let mut state = query(&mgr, None);
        identify(&mut state, HOST2, None);

        assert!(state.process(Offline::new(HOST1).into()).unwrap().is_none());
        assert!(inner(&state).alive().contains(HOST1));

        assert!(state.process(Offline::new(HOST2).into()).unwrap().is_none());
        assert_eq!(state.leader(), Some(HOST1));
        assert_eq!(inner(&state).alive().len(), 1);
    }

    const SENDERS: [&str; 4] = [HOST1, HOST2, HOST3, HOST4];

    /// Assignments whose leader is `host`.
    fn led_by(host: &str) -> Arc<BucketAssignments> {
        asgn(&[host, host])
    }

    /// `(is_leader, source, carries_assignments)`
    type Event = (bool, &'static str, bool);

    fn deliver(state: &mut State, events: &[Event]) {
        for &(leader, source, carries) in events {
            let msg: Message = if leader {
                Leader::new(source, led_by(source)).into()
            } else {
                Identification::new(source, carries.then(|| led_by(source))).into()
            };
            assert!(state.process(msg).unwrap().is_none());
        }
    }

    fn lowest_with_assignments(events: &[Event]) -> Option<Arc<BucketAssignments>> {
        events
            .iter()
            .filter(|(leader, _, carries)| *leader || *carries)
            .map(|(_, source, _)| *source)
            .min()
            .map(led_by)
    }

    fn events_strategy(leaders: bool) -> impl Strategy<Value = Vec<Event>> {
        let event = (
            any::<bool>().prop_map(move |l| l && leaders),
            prop::sample::select(SENDERS.to_vec()),
            any::<bool>(),
        );
        prop::collection::vec(event, 1..16)
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 128, .. ProptestConfig::default() })]

        #[test]
        fn lowest_leader_assignments_win_any_order(events in events_strategy(true)) {
            // every sender is above my.host, so nothing is authoritative
            let mgr = RecordingManager::new(MY_HOST);
            let mut state = query(&mgr, None);
            deliver(&mut state, &events);

            prop_assert_eq!(state.name(), "query");
            prop_assert_eq!(state.leader(), Some(MY_HOST));
            prop_assert_eq!(state.assignments().cloned(), lowest_with_assignments(&events));
        }

        #[test]
        fn identification_order_does_not_matter(events in events_strategy(false)) {
            let forward_mgr = RecordingManager::new(HOST2);
            let mut forward = query(&forward_mgr, None);
            deliver(&mut forward, &events);

            let reversed: Vec<Event> = events.iter().rev().copied().collect();
            let backward_mgr = RecordingManager::new(HOST2);
            let mut backward = query(&backward_mgr, None);
            deliver(&mut backward, &reversed);

            let expected_leader = events
                .iter()
                .map(|(_, source, _)| *source)
                .chain(std::iter::once(HOST2))
                .min();
            prop_assert_eq!(forward.leader(), expected_leader);
            prop_assert_eq!(backward.leader(), expected_leader);
            prop_assert_eq!(forward.assignments().cloned(), lowest_with_assignments(&events));
            prop_assert_eq!(backward.assignments(), forward.assignments());
        }
    }
}
