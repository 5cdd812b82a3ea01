//! The per-node coordination state machine.
//!
//! ```text
//!            own heartbeat echoed                 identification done,
//!   ┌───────┐ ──────────────────► ┌───────┐ ─── self lowest / leader seen ──► ┌────────┐
//!   │ Start │                     │ Query │                                   │ Active │
//!   └───────┘ ◄──┐                └───────┘ ◄── query / predecessor silent ── └────────┘
//!       │        │                    │                                           │
//!       │ no     │ reactivate         │ no leader and                             │ own heartbeat
//!       │ echo   │                    │ no buckets                                │ lost
//!       ▼        │                    ▼                                           │
//!   ┌──────────┐─┘◄───────────────────────────────────────────────────────────────┘
//!   │ Inactive │
//!   └──────────┘                     ┌──────┐
//!                                    │ Idle │ ◄── node shutdown
//!                                    └──────┘
//! ```
//!
//! Each handler returns `None` to stay or `Some(next)` to transition. The
//! runtime then cancels every timer of the old state before starting the
//! next one, and timer ids the current state does not own are ignored, so
//! a timer can never fire into a state that did not arm it.

mod active;
mod idle;
mod inactive;
mod processing;
mod query;
mod start;
mod timers;

pub use active::ActiveState;
pub use idle::IdleState;
pub use inactive::InactiveState;
pub use processing::Processing;
pub use query::{QueryPhase, QueryState};
pub use start::StartState;
pub use timers::Timers;

use crate::assignments::BucketAssignments;
use crate::config::PoolingProperties;
use crate::error::Result;
use crate::manager::{Context, PoolingManager, TimerId, TimerKind};
use crate::message::{Filter, Message, Offline};
use crate::types::Host;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Outcome of handling an event: `None` stays, `Some` moves on.
pub type Transition = Option<State>;

/// A node's current state.
#[derive(Debug)]
pub enum State {
    Start(StartState),
    Idle(IdleState),
    Query(QueryState),
    Active(ActiveState),
    Inactive(InactiveState),
}

impl State {
    /// Short name for logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            State::Start(_) => "start",
            State::Idle(_) => "idle",
            State::Query(_) => "query",
            State::Active(_) => "active",
            State::Inactive(_) => "inactive",
        }
    }

    fn core(&self) -> &StateCore {
        match self {
            State::Start(s) => s.core(),
            State::Idle(s) => s.core(),
            State::Query(s) => s.processing().core(),
            State::Active(s) => s.processing().core(),
            State::Inactive(s) => s.core(),
        }
    }

    fn core_mut(&mut self) -> &mut StateCore {
        match self {
            State::Start(s) => s.core_mut(),
            State::Idle(s) => s.core_mut(),
            State::Query(s) => s.processing_mut().core_mut(),
            State::Active(s) => s.processing_mut().core_mut(),
            State::Inactive(s) => s.core_mut(),
        }
    }

    /// This node's host.
    pub fn host(&self) -> &str {
        self.core().host()
    }

    /// The leader this state believes in, for states that track one.
    pub fn leader(&self) -> Option<&str> {
        match self {
            State::Query(s) => Some(s.processing().leader()),
            State::Active(s) => Some(s.processing().leader()),
            _ => None,
        }
    }

    /// The assignments this state works with, for states that track them.
    pub fn assignments(&self) -> Option<&Arc<BucketAssignments>> {
        match self {
            State::Query(s) => s.processing().assignments(),
            State::Active(s) => s.processing().assignments(),
            _ => None,
        }
    }

    /// Number of timers the state currently holds.
    pub fn timer_count(&self) -> usize {
        self.core().timers().len()
    }

    /// Entry hook, run once the state becomes current.
    pub fn start(&mut self) {
        match self {
            State::Start(s) => s.start(),
            State::Idle(_) => {}
            State::Query(s) => s.start(),
            State::Active(s) => s.start(),
            State::Inactive(s) => s.start(),
        }
    }

    /// Shutdown hook: announce departure, except from Idle which holds
    /// nothing to give up.
    pub fn stop(&mut self) {
        match self {
            State::Idle(_) => {}
            _ => {
                let core = self.core();
                core.publish_admin(Offline::new(core.host()));
            }
        }
    }

    /// The inbound messages this state wants to see.
    pub fn filter(&self) -> Filter {
        match self {
            State::Start(s) => s.filter(),
            State::Idle(s) => s.filter(),
            State::Query(s) => s.filter(),
            State::Active(s) => s.filter(),
            State::Inactive(s) => s.filter(),
        }
    }

    /// Cancel every timer this state armed.
    pub fn cancel_timers(&mut self) {
        self.core_mut().cancel_timers();
    }

    /// Give up on the internal topic and stand down.
    pub fn internal_topic_failed(&mut self) -> State {
        self.core().internal_topic_failed()
    }

    /// Handle an inbound message.
    ///
    /// Forwarded work always goes to the manager. Leader assignments are
    /// distributed before the state gets to react, unless an Active node
    /// outranks the sender.
    pub fn process(&mut self, msg: Message) -> Result<Transition> {
        if let State::Inactive(_) = self {
            trace!(class = msg.class(), "Inactive, ignoring message");
            return Ok(None);
        }

        match msg {
            Message::Forward(forward) => {
                self.core().manager().handle(forward);
                Ok(None)
            }

            Message::Leader(leader) => {
                let assignments = match leader.assignments {
                    Some(asgn) if !asgn.is_empty() => asgn,
                    _ => {
                        warn!(source = %leader.source, "Leader message without assignments");
                        return Ok(None);
                    }
                };
                // an Active node keeps serving its own view against a
                // Leader that does not outrank it
                if let State::Active(s) = self {
                    if !s.accepts_leader(&leader.source, &assignments) {
                        return Ok(s.process_leader(&leader.source, assignments));
                    }
                }
                self.core()
                    .manager()
                    .start_distributing(Some(assignments.clone()));

                match self {
                    State::Query(s) => s.process_leader(&leader.source, assignments),
                    State::Active(s) => Ok(s.process_leader(&leader.source, assignments)),
                    _ => Ok(None),
                }
            }

            Message::Heartbeat(heartbeat) => match self {
                State::Start(s) => Ok(s.process_heartbeat(&heartbeat)),
                State::Active(s) => {
                    s.process_heartbeat(&heartbeat);
                    Ok(None)
                }
                _ => Ok(None),
            },

            Message::Offline(offline) => match self {
                State::Query(s) => s.process_offline(&offline.source),
                State::Active(s) => s.process_offline(&offline.source),
                _ => Ok(None),
            },

            Message::Query(query) => match self {
                State::Query(s) => {
                    s.process_query(&query.source);
                    Ok(None)
                }
                State::Active(s) => Ok(Some(s.process_query(&query.source))),
                _ => Ok(None),
            },

            Message::Identification(ident) => match self {
                State::Query(s) => {
                    s.process_identification(ident);
                    Ok(None)
                }
                _ => Ok(None),
            },
        }
    }

    /// Handle a timer expiry.
    pub fn timer_fired(&mut self, id: TimerId) -> Result<Transition> {
        let kind = match self.core_mut().timers_mut().fire(id) {
            Some(kind) => kind,
            None => {
                trace!(timer = id, state = self.name(), "Ignoring timer not armed by this state");
                return Ok(None);
            }
        };

        debug!(timer = id, %kind, state = self.name(), "Timer fired");

        match self {
            State::Start(s) => Ok(s.on_timer(kind)),
            State::Idle(_) => Ok(None),
            State::Query(s) => s.on_timer(kind),
            State::Active(s) => Ok(s.on_timer(kind)),
            State::Inactive(s) => Ok(s.on_timer(kind)),
        }
    }
}

/// Plumbing shared by every state: identity, publishing, timers and
/// access to the factory for the next state.
#[derive(Debug)]
pub struct StateCore {
    ctx: Context,
    host: Host,
    timers: Timers,
}

impl StateCore {
    /// Create the core for a new state.
    pub fn new(ctx: Context) -> Self {
        let host = ctx.host();
        Self {
            ctx,
            host,
            timers: Timers::default(),
        }
    }

    /// This node's host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The state's context.
    pub fn ctx(&self) -> &Context {
        &self.ctx
    }

    /// The manager.
    pub fn manager(&self) -> &dyn PoolingManager {
        self.ctx.manager()
    }

    /// Timing constants.
    pub fn properties(&self) -> &PoolingProperties {
        self.ctx.manager().properties()
    }

    /// Timers armed by this state.
    pub fn timers(&self) -> &Timers {
        &self.timers
    }

    fn timers_mut(&mut self) -> &mut Timers {
        &mut self.timers
    }

    /// Publish on a channel.
    pub fn publish(&self, channel: &str, msg: impl Into<Message>) {
        self.manager().publish(channel, msg.into());
    }

    /// Publish on the admin channel.
    pub fn publish_admin(&self, msg: impl Into<Message>) {
        self.manager().publish_admin(msg.into());
    }

    /// Arm a one-shot timer owned by this state.
    pub fn schedule(&mut self, delay: Duration, kind: TimerKind) {
        let handle = self.ctx.manager().schedule(delay, kind);
        self.timers.add(handle);
    }

    /// Arm a repeating timer owned by this state.
    pub fn schedule_with_fixed_delay(&mut self, initial: Duration, period: Duration, kind: TimerKind) {
        let handle = self
            .ctx
            .manager()
            .schedule_with_fixed_delay(initial, period, kind);
        self.timers.add(handle);
    }

    /// Cancel every timer owned by this state.
    pub fn cancel_timers(&mut self) {
        self.timers.cancel_all();
    }

    /// Notify the manager that the topic failed and move to Inactive.
    pub fn internal_topic_failed(&self) -> State {
        warn!(host = %self.host, "Internal topic failed");
        self.manager().internal_topic_failed();
        self.go_inactive()
    }

    pub fn go_start(&self) -> State {
        self.ctx.factory().go_start(&self.ctx)
    }

    pub fn go_idle(&self) -> State {
        self.ctx.factory().go_idle(&self.ctx)
    }

    pub fn go_query(&self, assignments: Option<Arc<BucketAssignments>>) -> State {
        self.ctx.factory().go_query(&self.ctx, assignments)
    }

    pub fn go_active(&self, assignments: Arc<BucketAssignments>) -> State {
        self.ctx.factory().go_active(&self.ctx, assignments)
    }

    pub fn go_inactive(&self) -> State {
        self.ctx.factory().go_inactive(&self.ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Forward, Leader};
    use crate::testing::RecordingManager;

    #[test]
    fn test_forward_always_handled() {
        let mgr = RecordingManager::new("my.host");
        let mut state = mgr.factory_state(|ctx| State::Idle(IdleState::new(ctx)));

        let fwd = Forward::new("z.host.1", "kafka", "events", "{}", "req-1", 1);
        assert!(state.process(fwd.into()).unwrap().is_none());
        assert_eq!(mgr.forwards().len(), 1);
    }

    #[test]
    fn test_leader_always_distributed() {
        let mgr = RecordingManager::new("my.host");
        let mut state = mgr.factory_state(|ctx| State::Idle(IdleState::new(ctx)));

        let asgn = Arc::new(BucketAssignments::from_hosts(["a.host", "my.host"]));
        assert!(state
            .process(Leader::new("a.host", asgn.clone()).into())
            .unwrap()
            .is_none());
        assert_eq!(mgr.distributed(), vec![Some(asgn)]);
    }

    #[test]
    fn test_inactive_ignores_everything() {
        let mgr = RecordingManager::new("my.host");
        let mut state = mgr.factory_state(|ctx| State::Inactive(InactiveState::new(ctx)));

        let asgn = Arc::new(BucketAssignments::from_hosts(["a.host"]));
        let fwd = Forward::new("z.host.1", "kafka", "events", "{}", "req-1", 1);
        assert!(state.process(Leader::new("a.host", asgn).into()).unwrap().is_none());
        assert!(state.process(fwd.into()).unwrap().is_none());
        assert!(mgr.distributed().is_empty());
        assert!(mgr.forwards().is_empty());
    }

    #[test]
    fn test_stop_announces_offline_except_idle() {
        let mgr = RecordingManager::new("my.host");

        let mut idle = mgr.factory_state(|ctx| State::Idle(IdleState::new(ctx)));
        idle.stop();
        assert!(mgr.published().is_empty());

        let mut inactive = mgr.factory_state(|ctx| State::Inactive(InactiveState::new(ctx)));
        inactive.stop();
        let published = mgr.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, crate::types::ADMIN_CHANNEL);
        assert_eq!(published[0].1.class(), "Offline");
        assert_eq!(published[0].1.source(), "my.host");
    }

    #[test]
    fn test_stale_timer_ignored() {
        let mgr = RecordingManager::new("my.host");
        let mut start = mgr.factory_state(|ctx| State::Start(StartState::new(ctx)));
        start.start();
        let stale = mgr.timer_id(TimerKind::StartHeartbeat).unwrap();

        let mut inactive = mgr.factory_state(|ctx| State::Inactive(InactiveState::new(ctx)));
        inactive.start();

        // a timer armed by another state has no effect
        assert!(inactive.timer_fired(stale).unwrap().is_none());
        assert_eq!(inactive.timer_count(), 1);
    }

    #[test]
    fn test_cancel_timers_cancels_all() {
        let mgr = RecordingManager::new("my.host");
        let asgn = Arc::new(BucketAssignments::from_hosts(["my.host", "z.host.1"]));
        let mut active = mgr.factory_state(|ctx| State::Active(ActiveState::new(ctx, asgn)));
        active.start();
        assert_eq!(active.timer_count(), 3);
        assert_eq!(mgr.active_timer_count(), 3);

        active.cancel_timers();
        assert_eq!(active.timer_count(), 0);
        assert_eq!(mgr.active_timer_count(), 0);
    }

    #[test]
    fn test_dropping_state_cancels_timers() {
        let mgr = RecordingManager::new("my.host");
        let mut query = mgr.factory_state(|ctx| State::Query(QueryState::new(ctx, None)));
        query.start();
        assert_eq!(mgr.active_timer_count(), 1);

        drop(query);
        assert_eq!(mgr.active_timer_count(), 0);
    }
}
