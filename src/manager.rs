//! The runtime contract the state machine drives.
//!
//! States never talk to the transport, the clock or each other directly.
//! Everything goes through a [`Context`]:
//!
//! - [`PoolingManager`]: publishing, timers, and callbacks into the
//!   surrounding system.
//! - [`StateFactory`]: construction of the next state on a transition.
//!
//! The runtime in [`crate::runtime`] implements the manager over tokio;
//! tests use [`crate::testing::RecordingManager`].

use crate::assignments::BucketAssignments;
use crate::config::PoolingProperties;
use crate::message::{Forward, Message};
use crate::state::{ActiveState, IdleState, InactiveState, QueryState, StartState, State};
use crate::types::{Host, ADMIN_CHANNEL};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Identifier of a scheduled timer, unique per manager.
pub type TimerId = u64;

/// What a timer means to the state that armed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Start gave up waiting for its own heartbeat.
    StartHeartbeat,
    /// Inactive is done waiting and restarts the node.
    Reactivate,
    /// Query stops collecting identifications.
    AwaitIdentification,
    /// Query stops waiting for a leader.
    AwaitLeader,
    /// Active sends its next round of heartbeats.
    GenerateHeartbeat,
    /// Active checks that its own heartbeat came back.
    CheckSelfHeartbeat,
    /// Active checks that its predecessor is still beating.
    CheckPredecessorHeartbeat,
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimerKind::StartHeartbeat => "start_heartbeat",
            TimerKind::Reactivate => "reactivate",
            TimerKind::AwaitIdentification => "await_identification",
            TimerKind::AwaitLeader => "await_leader",
            TimerKind::GenerateHeartbeat => "generate_heartbeat",
            TimerKind::CheckSelfHeartbeat => "check_self_heartbeat",
            TimerKind::CheckPredecessorHeartbeat => "check_predecessor_heartbeat",
        };
        write!(f, "{}", name)
    }
}

/// Something that can be cancelled, typically a pending timer task.
pub trait Cancellable: Send + Sync {
    fn cancel(&self);
}

impl Cancellable for tokio::task::AbortHandle {
    fn cancel(&self) {
        self.abort();
    }
}

/// A scheduled timer.
///
/// When the timer fires the manager delivers its id back to whichever state
/// is current; only the state holding the handle acts on it.
pub struct TimerHandle {
    id: TimerId,
    kind: TimerKind,
    repeating: bool,
    cancel: Box<dyn Cancellable>,
}

impl TimerHandle {
    /// Create a handle.
    pub fn new(id: TimerId, kind: TimerKind, repeating: bool, cancel: Box<dyn Cancellable>) -> Self {
        Self {
            id,
            kind,
            repeating,
            cancel,
        }
    }

    /// Get the timer id.
    pub fn id(&self) -> TimerId {
        self.id
    }

    /// Get the timer kind.
    pub fn kind(&self) -> TimerKind {
        self.kind
    }

    /// Whether the timer fires more than once.
    pub fn is_repeating(&self) -> bool {
        self.repeating
    }

    /// Cancel the timer.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("repeating", &self.repeating)
            .finish()
    }
}

/// Services a node's states rely on.
///
/// Implementations must deliver messages and timer expirations to the node's
/// state machine one at a time.
pub trait PoolingManager: Send + Sync {
    /// This node's host identifier.
    fn host(&self) -> &str;

    /// The internal topic.
    fn topic(&self) -> &str;

    /// Timing constants.
    fn properties(&self) -> &PoolingProperties;

    /// Publish a message on a channel. Fire and forget.
    fn publish(&self, channel: &str, msg: Message);

    /// Publish a message on the admin channel.
    fn publish_admin(&self, msg: Message) {
        self.publish(ADMIN_CHANNEL, msg);
    }

    /// Arm a one-shot timer.
    fn schedule(&self, delay: Duration, kind: TimerKind) -> TimerHandle;

    /// Arm a repeating timer.
    fn schedule_with_fixed_delay(
        &self,
        initial_delay: Duration,
        period: Duration,
        kind: TimerKind,
    ) -> TimerHandle;

    /// Tell the surrounding system which buckets this node now serves.
    /// `None` means none.
    fn start_distributing(&self, assignments: Option<Arc<BucketAssignments>>);

    /// Hand forwarded work to the surrounding system.
    fn handle(&self, forward: Forward);

    /// Report that the internal topic is not working.
    fn internal_topic_failed(&self);
}

/// Builds the state a node moves to.
///
/// The default methods construct the standard states; override them to
/// observe or substitute transitions.
pub trait StateFactory: Send + Sync {
    /// Initial state: prove the topic works.
    fn go_start(&self, ctx: &Context) -> State {
        State::Start(StartState::new(ctx.clone()))
    }

    /// Passive state entered on shutdown.
    fn go_idle(&self, ctx: &Context) -> State {
        State::Idle(IdleState::new(ctx.clone()))
    }

    /// Election round, seeded with the assignments known so far.
    fn go_query(&self, ctx: &Context, assignments: Option<Arc<BucketAssignments>>) -> State {
        State::Query(QueryState::new(ctx.clone(), assignments))
    }

    /// Serving buckets under the given assignments.
    fn go_active(&self, ctx: &Context, assignments: Arc<BucketAssignments>) -> State {
        ctx.manager().start_distributing(Some(assignments.clone()));
        State::Active(ActiveState::new(ctx.clone(), assignments))
    }

    /// Standing down until the reactivation timer fires.
    fn go_inactive(&self, ctx: &Context) -> State {
        ctx.manager().start_distributing(None);
        State::Inactive(InactiveState::new(ctx.clone()))
    }
}

/// The stock state factory.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultStateFactory;

impl StateFactory for DefaultStateFactory {}

/// What a state holds on to: the manager and the factory for its successor.
#[derive(Clone)]
pub struct Context {
    manager: Arc<dyn PoolingManager>,
    factory: Arc<dyn StateFactory>,
}

impl Context {
    /// Create a context with the default state factory.
    pub fn new(manager: Arc<dyn PoolingManager>) -> Self {
        Self::with_factory(manager, Arc::new(DefaultStateFactory))
    }

    /// Create a context with a custom state factory.
    pub fn with_factory(manager: Arc<dyn PoolingManager>, factory: Arc<dyn StateFactory>) -> Self {
        Self { manager, factory }
    }

    /// Get the manager.
    pub fn manager(&self) -> &dyn PoolingManager {
        self.manager.as_ref()
    }

    /// Get the state factory.
    pub fn factory(&self) -> &dyn StateFactory {
        self.factory.as_ref()
    }

    /// This node's host.
    pub fn host(&self) -> Host {
        self.manager.host().to_string()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("host", &self.manager.host())
            .field("topic", &self.manager.topic())
            .finish()
    }
}
