//! The per-node event loop and its [`PoolingManager`].

use super::{PoolingListener, RouteDecision, Transport};
use crate::assignments::BucketAssignments;
use crate::config::{PoolingConfig, PoolingProperties};
use crate::error::{Error, Result};
use crate::manager::{Context, PoolingManager, TimerHandle, TimerId, TimerKind};
use crate::message::{Forward, JsonCodec, Message, MessageCodec};
use crate::metrics::{MetricsSnapshot, PoolingMetrics};
use crate::state::State;
use crate::types::{now_ms, Host};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// What the event loop is doing, as seen from outside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    /// Name of the current state.
    pub state: &'static str,
    /// Leader believed by the current state, if it tracks one.
    pub leader: Option<Host>,
}

enum Event {
    Timer(TimerId, TimerKind),
}

/// Manager shared by the event loop and the node handle.
struct NodeInner {
    host: Host,
    topic: String,
    properties: PoolingProperties,
    transport: Arc<dyn Transport>,
    codec: Arc<dyn MessageCodec>,
    listener: Arc<dyn PoolingListener>,
    metrics: Arc<PoolingMetrics>,
    events_tx: mpsc::UnboundedSender<Event>,
    next_timer_id: AtomicU64,
    distributing: RwLock<Option<Arc<BucketAssignments>>>,
    status: RwLock<NodeStatus>,
}

impl NodeInner {
    fn next_timer_id(&self) -> TimerId {
        self.next_timer_id.fetch_add(1, Ordering::Relaxed)
    }

    fn handle_forward(&self, mut forward: Forward) {
        let expiration = self.properties.forward_expiration.as_millis() as u64;
        if forward.is_expired(now_ms().saturating_sub(expiration)) {
            warn!(request_id = %forward.request_id, "Dropping expired forward");
            self.metrics.forwards_dropped.inc();
            return;
        }

        let assignments = self.distributing.read().clone();
        let owner = assignments
            .as_ref()
            .and_then(|asgn| asgn.owner_of(forward.request_id.as_bytes()))
            .map(str::to_string);

        match owner {
            Some(owner) if owner == self.host => {
                debug!(request_id = %forward.request_id, hops = forward.num_hops, "Handling forward");
                self.metrics.forwards_handled.inc();
                self.listener.on_forward(forward);
            }
            Some(owner) => {
                if forward.num_hops >= self.properties.max_hops {
                    warn!(
                        request_id = %forward.request_id,
                        hops = forward.num_hops,
                        "Dropping forward over hop limit"
                    );
                    self.metrics.forwards_dropped.inc();
                    return;
                }
                forward.bump_num_hops();
                forward.source = self.host.clone();
                debug!(request_id = %forward.request_id, to = %owner, "Re-forwarding");
                self.publish(&owner, forward.into());
                self.metrics.forwards_sent.inc();
            }
            None => {
                warn!(request_id = %forward.request_id, "No assignments, dropping forward");
                self.metrics.forwards_dropped.inc();
            }
        }
    }
}

impl PoolingManager for NodeInner {
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
        if let Err(e) = msg.check_validity() {
            warn!(class = msg.class(), error = %e, "Refusing to publish invalid message");
            return;
        }

        let data = match self.codec.encode(&msg) {
            Ok(data) => data,
            Err(e) => {
                warn!(class = msg.class(), error = %e, "Failed to encode message");
                return;
            }
        };

        if let Message::Leader(leader) = &msg {
            if leader.source == self.host {
                self.metrics.leader_accessions.inc();
            }
        }

        trace!(channel = %channel, class = msg.class(), "Publishing");
        if let Err(e) = self.transport.publish(data) {
            warn!(channel = %channel, class = msg.class(), error = %e, "Publish failed");
        }
    }

    fn schedule(&self, delay: Duration, kind: TimerKind) -> TimerHandle {
        let id = self.next_timer_id();
        let tx = self.events_tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Event::Timer(id, kind));
        });
        TimerHandle::new(id, kind, false, Box::new(task.abort_handle()))
    }

    fn schedule_with_fixed_delay(
        &self,
        initial_delay: Duration,
        period: Duration,
        kind: TimerKind,
    ) -> TimerHandle {
        let id = self.next_timer_id();
        let tx = self.events_tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(initial_delay).await;
            loop {
                if tx.send(Event::Timer(id, kind)).is_err() {
                    break;
                }
                tokio::time::sleep(period).await;
            }
        });
        TimerHandle::new(id, kind, true, Box::new(task.abort_handle()))
    }

    fn start_distributing(&self, assignments: Option<Arc<BucketAssignments>>) {
        {
            let mut current = self.distributing.write();
            if *current == assignments {
                return;
            }
            *current = assignments.clone();
        }

        let owned = assignments
            .as_ref()
            .map_or(0, |asgn| asgn.buckets_of(&self.host).len());
        self.metrics.owned_buckets.set(owned as i64);
        info!(host = %self.host, owned, "Distributing buckets");
        self.listener.on_assignments(assignments.as_ref());
    }

    fn handle(&self, forward: Forward) {
        self.handle_forward(forward);
    }

    fn internal_topic_failed(&self) {
        error!(host = %self.host, topic = %self.topic, "Internal topic failed");
        self.listener.on_topic_failed();
    }
}

/// A running pooling node.
///
/// Starting a node spawns its event loop on the current tokio runtime, with
/// the node in the Start state.
pub struct PoolingNode {
    inner: Arc<NodeInner>,
    shutdown_tx: mpsc::Sender<()>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PoolingNode {
    /// Start a node. Must be called from within a tokio runtime.
    pub fn start(
        config: PoolingConfig,
        transport: Arc<dyn Transport>,
        listener: Arc<dyn PoolingListener>,
    ) -> Result<Self> {
        config.validate()?;
        let inbound = transport.subscribe()?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let inner = Arc::new(NodeInner {
            host: config.host,
            topic: config.topic,
            properties: config.properties,
            transport,
            codec: Arc::new(JsonCodec),
            listener,
            metrics: Arc::new(PoolingMetrics::new()),
            events_tx,
            next_timer_id: AtomicU64::new(1),
            distributing: RwLock::new(None),
            status: RwLock::new(NodeStatus {
                state: "start",
                leader: None,
            }),
        });

        info!(host = %inner.host, topic = %inner.topic, "Starting pooling node");

        let event_loop = EventLoop::new(inner.clone());
        let task = tokio::spawn(event_loop.run(events_rx, inbound, shutdown_rx));

        Ok(Self {
            inner,
            shutdown_tx,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn host(&self) -> &str {
        &self.inner.host
    }

    /// Name of the current state.
    pub fn current_state(&self) -> &'static str {
        self.inner.status.read().state
    }

    /// State name and believed leader.
    pub fn status(&self) -> NodeStatus {
        self.inner.status.read().clone()
    }

    /// The assignments this node is serving under.
    pub fn assignments(&self) -> Option<Arc<BucketAssignments>> {
        self.inner.distributing.read().clone()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Decide who handles a work item, forwarding it when another host owns
    /// its bucket.
    pub fn route(
        &self,
        protocol: &str,
        topic: &str,
        payload: &str,
        request_id: &str,
    ) -> RouteDecision {
        let assignments = self.inner.distributing.read().clone();
        let owner = match assignments
            .as_ref()
            .and_then(|asgn| asgn.owner_of(request_id.as_bytes()))
        {
            Some(owner) => owner.to_string(),
            None => return RouteDecision::NoAssignments,
        };

        if owner == self.inner.host {
            return RouteDecision::Local;
        }

        let forward = Forward::new(
            self.inner.host.as_str(),
            protocol,
            topic,
            payload,
            request_id,
            now_ms(),
        );
        self.inner.publish(&owner, forward.into());
        self.inner.metrics.forwards_sent.inc();
        RouteDecision::Forwarded(owner)
    }

    /// Announce departure, go Idle and end the event loop.
    pub async fn stop(&self) -> Result<()> {
        let task = self.task.lock().take();
        let task = match task {
            Some(task) => task,
            None => return Err(Error::Stopped),
        };

        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = task.await {
            warn!(host = %self.inner.host, error = %e, "Event loop ended abnormally");
        }
        Ok(())
    }
}

impl std::fmt::Debug for PoolingNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolingNode")
            .field("host", &self.inner.host)
            .field("status", &*self.inner.status.read())
            .finish()
    }
}

/// Serializes messages and timer expirations onto one state machine.
struct EventLoop {
    inner: Arc<NodeInner>,
    ctx: Context,
}

impl EventLoop {
    fn new(inner: Arc<NodeInner>) -> Self {
        let ctx = Context::new(inner.clone());
        Self { inner, ctx }
    }

    async fn run(
        self,
        mut events_rx: mpsc::UnboundedReceiver<Event>,
        mut inbound: mpsc::UnboundedReceiver<Bytes>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        let mut state = self.ctx.factory().go_start(&self.ctx);
        self.enter(&mut state);
        let mut topic_open = true;

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(host = %self.inner.host, state = state.name(), "Stopping pooling node");
                    state.stop();
                    let idle = self.ctx.factory().go_idle(&self.ctx);
                    self.transition(&mut state, idle);
                    self.inner.start_distributing(None);
                    break;
                }
                Some(event) = events_rx.recv() => {
                    let Event::Timer(id, kind) = event;
                    let result = state.timer_fired(id);
                    if matches!(result, Ok(Some(_)))
                        && matches!(kind, TimerKind::CheckSelfHeartbeat | TimerKind::CheckPredecessorHeartbeat)
                    {
                        self.inner.metrics.heartbeats_missed.inc();
                    }
                    self.apply(&mut state, result);
                }
                data = inbound.recv(), if topic_open => match data {
                    Some(data) => {
                        let result = self.on_data(&mut state, &data);
                        self.apply(&mut state, result);
                    }
                    None => {
                        topic_open = false;
                        let next = state.internal_topic_failed();
                        self.transition(&mut state, next);
                    }
                },
            }
        }
    }

    fn on_data(&self, state: &mut State, data: &[u8]) -> Result<Option<State>> {
        self.inner.metrics.messages_received.inc();
        let msg = match self.inner.codec.decode(data) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(host = %self.inner.host, error = %e, "Discarding undecodable message");
                self.inner.metrics.messages_discarded.inc();
                return Ok(None);
            }
        };

        if !state.filter().matches(&msg) {
            trace!(class = msg.class(), channel = ?msg.channel(), "Filtered out");
            self.inner.metrics.messages_discarded.inc();
            return Ok(None);
        }

        trace!(class = msg.class(), source = %msg.source(), state = state.name(), "Processing");
        state.process(msg)
    }

    fn apply(&self, state: &mut State, result: Result<Option<State>>) {
        match result {
            Ok(None) => {}
            Ok(Some(next)) => self.transition(state, next),
            Err(e) => error!(host = %self.inner.host, state = state.name(), error = %e, "State handler failed"),
        }
    }

    fn transition(&self, state: &mut State, next: State) {
        state.cancel_timers();
        info!(host = %self.inner.host, from = state.name(), to = next.name(), "State transition");

        *state = next;
        self.inner.metrics.record_transition(state.name());
        *self.inner.status.write() = NodeStatus {
            state: state.name(),
            leader: state.leader().map(str::to_string),
        };
        state.start();
    }

    fn enter(&self, state: &mut State) {
        self.inner.metrics.record_transition(state.name());
        *self.inner.status.write() = NodeStatus {
            state: state.name(),
            leader: state.leader().map(str::to_string),
        };
        state.start();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::LocalBus;
    use crate::testing::RecordingListener;

    const ME: &str = "pdp-1";
    const OTHER: &str = "pdp-2";

    struct Harness {
        inner: Arc<NodeInner>,
        listener: Arc<RecordingListener>,
        // what OTHER sees on the topic
        observed: mpsc::UnboundedReceiver<Bytes>,
        _events: mpsc::UnboundedReceiver<Event>,
    }

    impl Harness {
        fn new() -> Self {
            let bus = LocalBus::new();
            let observed = bus.endpoint(OTHER).subscribe().unwrap();
            let listener = RecordingListener::new();
            let (events_tx, events) = mpsc::unbounded_channel();

            let inner = Arc::new(NodeInner {
                host: ME.to_string(),
                topic: "pooling-test".to_string(),
                properties: PoolingProperties::default().with_max_hops(2),
                transport: bus.endpoint(ME),
                codec: Arc::new(JsonCodec),
                listener: listener.clone(),
                metrics: Arc::new(PoolingMetrics::new()),
                events_tx,
                next_timer_id: AtomicU64::new(1),
                distributing: RwLock::new(None),
                status: RwLock::new(NodeStatus {
                    state: "active",
                    leader: None,
                }),
            });

            Self {
                inner,
                listener,
                observed,
                _events: events,
            }
        }

        fn serve(&self, hosts: &[&str]) {
            let asgn = BucketAssignments::from_hosts(hosts.iter().copied());
            self.inner.start_distributing(Some(Arc::new(asgn)));
        }

        fn published(&mut self) -> Vec<Message> {
            let mut out = Vec::new();
            while let Ok(data) = self.observed.try_recv() {
                out.push(JsonCodec.decode(&data).unwrap());
            }
            out
        }
    }

    fn fresh_forward(source: &str) -> Forward {
        Forward::new(source, "dmaap", "events", "{}", "req-7", now_ms())
    }

    #[test]
    fn test_owned_forward_handled() {
        let mut h = Harness::new();
        h.serve(&[ME]);

        h.inner.handle(fresh_forward(OTHER));

        assert_eq!(h.listener.forwards().len(), 1);
        assert!(h.published().is_empty());
        let metrics = h.inner.metrics.snapshot();
        assert_eq!(metrics.forwards_handled, 1);
        assert_eq!(metrics.forwards_dropped, 0);
    }

    #[test]
    fn test_forward_resent_to_owner() {
        let mut h = Harness::new();
        h.serve(&[OTHER]);

        let mut forward = fresh_forward("pdp-3");
        forward.num_hops = 1;
        h.inner.handle(forward);

        let published = h.published();
        assert_eq!(published.len(), 1);
        match &published[0] {
            Message::Forward(resent) => {
                assert_eq!(resent.channel.as_deref(), Some(OTHER));
                assert_eq!(resent.source, ME);
                assert_eq!(resent.num_hops, 2);
                assert_eq!(resent.request_id, "req-7");
            }
            other => panic!("unexpected {}", other.class()),
        }
        assert!(h.listener.forwards().is_empty());
        assert_eq!(h.inner.metrics.snapshot().forwards_sent, 1);
    }

    #[test]
    fn test_forward_over_hop_limit_dropped() {
        let mut h = Harness::new();
        h.serve(&[OTHER]);

        let mut forward = fresh_forward("pdp-3");
        forward.num_hops = 2;
        h.inner.handle(forward);

        assert!(h.published().is_empty());
        let metrics = h.inner.metrics.snapshot();
        assert_eq!(metrics.forwards_dropped, 1);
        assert_eq!(metrics.forwards_sent, 0);
    }

    #[test]
    fn test_expired_forward_dropped() {
        let mut h = Harness::new();
        h.serve(&[ME]);

        let expiration = h.inner.properties.forward_expiration.as_millis() as u64;
        let stale = Forward::new(OTHER, "dmaap", "events", "{}", "req-7", now_ms() - expiration - 1_000);
        h.inner.handle(stale);

        assert!(h.listener.forwards().is_empty());
        assert!(h.published().is_empty());
        assert_eq!(h.inner.metrics.snapshot().forwards_dropped, 1);
    }

    #[test]
    fn test_forward_without_assignments_dropped() {
        let mut h = Harness::new();

        h.inner.handle(fresh_forward(OTHER));

        assert!(h.listener.forwards().is_empty());
        assert!(h.published().is_empty());
        let metrics = h.inner.metrics.snapshot();
        assert_eq!(metrics.forwards_dropped, 1);
        assert_eq!(metrics.forwards_handled, 0);
    }

    #[test]
    fn test_undecodable_message_counts_as_received() {
        let h = Harness::new();
        let event_loop = EventLoop::new(h.inner.clone());
        let mut state = event_loop.ctx.factory().go_idle(&event_loop.ctx);

        assert!(event_loop.on_data(&mut state, b"not json").unwrap().is_none());

        let metrics = h.inner.metrics.snapshot();
        assert_eq!(metrics.messages_received, 1);
        assert_eq!(metrics.messages_discarded, 1);
        assert!(metrics.discard_rate() <= 1.0);
    }
}
