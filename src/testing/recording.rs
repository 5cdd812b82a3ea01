//! A [`PoolingManager`] that records instead of acting.

use crate::assignments::BucketAssignments;
use crate::config::PoolingProperties;
use crate::manager::{
    Cancellable, Context, DefaultStateFactory, PoolingManager, StateFactory, TimerHandle, TimerId,
    TimerKind,
};
use crate::message::{Forward, Message};
use crate::state::State;
use crate::types::Host;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A timer the manager was asked to arm.
#[derive(Debug, Clone)]
pub struct RecordedTimer {
    pub id: TimerId,
    pub kind: TimerKind,
    pub delay: Duration,
    /// Set for repeating timers.
    pub period: Option<Duration>,
    cancelled: Arc<AtomicBool>,
}

impl RecordedTimer {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

struct CancelFlag(Arc<AtomicBool>);

impl Cancellable for CancelFlag {
    fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Records everything a state asks of its manager and factory.
///
/// Timers never fire on their own; tests look them up with
/// [`RecordingManager::timer_id`] and deliver them with
/// [`State::timer_fired`].
pub struct RecordingManager {
    host: Host,
    topic: String,
    properties: PoolingProperties,
    next_timer_id: AtomicU64,
    published: Mutex<Vec<(String, Message)>>,
    timers: Mutex<Vec<RecordedTimer>>,
    distributed: Mutex<Vec<Option<Arc<BucketAssignments>>>>,
    forwards: Mutex<Vec<Forward>>,
    transitions: Mutex<Vec<&'static str>>,
    topic_failures: AtomicUsize,
}

impl RecordingManager {
    pub fn new(host: &str) -> Arc<Self> {
        Self::with_properties(host, PoolingProperties::default())
    }

    pub fn with_properties(host: &str, properties: PoolingProperties) -> Arc<Self> {
        Arc::new(Self {
            host: host.to_string(),
            topic: "pooling-test".to_string(),
            properties,
            next_timer_id: AtomicU64::new(1),
            published: Mutex::new(Vec::new()),
            timers: Mutex::new(Vec::new()),
            distributed: Mutex::new(Vec::new()),
            forwards: Mutex::new(Vec::new()),
            transitions: Mutex::new(Vec::new()),
            topic_failures: AtomicUsize::new(0),
        })
    }

    /// A context using this recorder as both manager and factory.
    pub fn ctx(self: &Arc<Self>) -> Context {
        Context::with_factory(self.clone(), self.clone())
    }

    /// Build a state directly, without recording a factory call.
    pub fn factory_state(self: &Arc<Self>, build: impl FnOnce(Context) -> State) -> State {
        build(self.ctx())
    }

    pub fn properties_ref(&self) -> &PoolingProperties {
        &self.properties
    }

    /// Every `(channel, message)` published so far.
    pub fn published(&self) -> Vec<(String, Message)> {
        self.published.lock().clone()
    }

    /// Published messages of one class.
    pub fn published_of(&self, class: &str) -> Vec<(String, Message)> {
        self.published
            .lock()
            .iter()
            .filter(|(_, msg)| msg.class() == class)
            .cloned()
            .collect()
    }

    pub fn clear_published(&self) {
        self.published.lock().clear();
    }

    pub fn timers(&self) -> Vec<RecordedTimer> {
        self.timers.lock().clone()
    }

    /// Kinds of every timer armed, in order.
    pub fn timer_kinds(&self) -> Vec<TimerKind> {
        self.timers.lock().iter().map(|t| t.kind).collect()
    }

    /// Id of the most recent timer of a kind.
    pub fn timer_id(&self, kind: TimerKind) -> Option<TimerId> {
        self.timers
            .lock()
            .iter()
            .rev()
            .find(|t| t.kind == kind)
            .map(|t| t.id)
    }

    /// Timers armed and not cancelled.
    pub fn active_timer_count(&self) -> usize {
        self.timers
            .lock()
            .iter()
            .filter(|t| !t.is_cancelled())
            .count()
    }

    /// Arguments of every `start_distributing` call.
    pub fn distributed(&self) -> Vec<Option<Arc<BucketAssignments>>> {
        self.distributed.lock().clone()
    }

    pub fn forwards(&self) -> Vec<Forward> {
        self.forwards.lock().clone()
    }

    /// Factory methods called, by name.
    pub fn transitions(&self) -> Vec<&'static str> {
        self.transitions.lock().clone()
    }

    pub fn topic_failures(&self) -> usize {
        self.topic_failures.load(Ordering::SeqCst)
    }

    fn record_timer(&self, kind: TimerKind, delay: Duration, period: Option<Duration>) -> TimerHandle {
        let id = self.next_timer_id.fetch_add(1, Ordering::SeqCst);
        let cancelled = Arc::new(AtomicBool::new(false));
        self.timers.lock().push(RecordedTimer {
            id,
            kind,
            delay,
            period,
            cancelled: cancelled.clone(),
        });
        TimerHandle::new(id, kind, period.is_some(), Box::new(CancelFlag(cancelled)))
    }
}

impl PoolingManager for RecordingManager {
    fn host(&self) -> &str {
        &self.host
    }

    fn topic(&self) -> &str {
        &self.topic
    }

    fn properties(&self) -> &PoolingProperties {
        &self.properties
    }

    fn publish(&self, channel: &str, mut msg: Message) {
        msg.set_channel(channel);
        self.published.lock().push((channel.to_string(), msg));
    }

    fn schedule(&self, delay: Duration, kind: TimerKind) -> TimerHandle {
        self.record_timer(kind, delay, None)
    }

    fn schedule_with_fixed_delay(
        &self,
        initial_delay: Duration,
        period: Duration,
        kind: TimerKind,
    ) -> TimerHandle {
        self.record_timer(kind, initial_delay, Some(period))
    }

    fn start_distributing(&self, assignments: Option<Arc<BucketAssignments>>) {
        self.distributed.lock().push(assignments);
    }

    fn handle(&self, forward: Forward) {
        self.forwards.lock().push(forward);
    }

    fn internal_topic_failed(&self) {
        self.topic_failures.fetch_add(1, Ordering::SeqCst);
    }
}

impl StateFactory for RecordingManager {
    fn go_start(&self, ctx: &Context) -> State {
        self.transitions.lock().push("go_start");
        DefaultStateFactory.go_start(ctx)
    }

    fn go_idle(&self, ctx: &Context) -> State {
        self.transitions.lock().push("go_idle");
        DefaultStateFactory.go_idle(ctx)
    }

    fn go_query(&self, ctx: &Context, assignments: Option<Arc<BucketAssignments>>) -> State {
        self.transitions.lock().push("go_query");
        DefaultStateFactory.go_query(ctx, assignments)
    }

    fn go_active(&self, ctx: &Context, assignments: Arc<BucketAssignments>) -> State {
        self.transitions.lock().push("go_active");
        DefaultStateFactory.go_active(ctx, assignments)
    }

    fn go_inactive(&self, ctx: &Context) -> State {
        self.transitions.lock().push("go_inactive");
        DefaultStateFactory.go_inactive(ctx)
    }
}
