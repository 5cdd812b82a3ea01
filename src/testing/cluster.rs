//! Multi-node harness over a [`LocalBus`].

use crate::assignments::BucketAssignments;
use crate::config::{PoolingConfig, PoolingProperties};
use crate::error::Result;
use crate::message::Forward;
use crate::runtime::{LocalBus, PoolingListener, PoolingNode};
use crate::types::Host;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Listener that keeps what it is told.
#[derive(Debug, Default)]
pub struct RecordingListener {
    assignments: Mutex<Vec<Option<Arc<BucketAssignments>>>>,
    forwards: Mutex<Vec<Forward>>,
    topic_failures: AtomicUsize,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every assignment update, in order.
    pub fn assignments(&self) -> Vec<Option<Arc<BucketAssignments>>> {
        self.assignments.lock().clone()
    }

    pub fn forwards(&self) -> Vec<Forward> {
        self.forwards.lock().clone()
    }

    pub fn topic_failures(&self) -> usize {
        self.topic_failures.load(Ordering::SeqCst)
    }
}

impl PoolingListener for RecordingListener {
    fn on_assignments(&self, assignments: Option<&Arc<BucketAssignments>>) {
        self.assignments.lock().push(assignments.cloned());
    }

    fn on_forward(&self, forward: Forward) {
        self.forwards.lock().push(forward);
    }

    fn on_topic_failed(&self) {
        self.topic_failures.fetch_add(1, Ordering::SeqCst);
    }
}

struct ClusterNode {
    node: PoolingNode,
    listener: Arc<RecordingListener>,
}

/// A set of nodes sharing one in-process topic.
pub struct TestCluster {
    bus: LocalBus,
    properties: PoolingProperties,
    nodes: BTreeMap<Host, ClusterNode>,
}

impl TestCluster {
    /// Timings short enough for tests on a paused clock.
    pub fn fast_properties() -> PoolingProperties {
        PoolingProperties::default()
            .with_max_buckets(32)
            .with_start_heartbeat(Duration::from_millis(100))
            .with_reactivate(Duration::from_millis(500))
            .with_identification(Duration::from_millis(200))
            .with_leader(Duration::from_millis(300))
            .with_active_heartbeat(Duration::from_millis(50))
            .with_inter_heartbeat(Duration::from_millis(150))
    }

    /// An empty cluster.
    pub fn new(properties: PoolingProperties) -> Self {
        Self {
            bus: LocalBus::new(),
            properties,
            nodes: BTreeMap::new(),
        }
    }

    /// Start one node per host.
    pub fn start(hosts: &[&str], properties: PoolingProperties) -> Result<Self> {
        let mut cluster = Self::new(properties);
        for host in hosts {
            cluster.add_node(host)?;
        }
        Ok(cluster)
    }

    /// Start a node and attach it to the bus.
    pub fn add_node(&mut self, host: &str) -> Result<()> {
        let listener = RecordingListener::new();
        let config = PoolingConfig::new(host, "pooling-test").with_properties(self.properties.clone());
        let node = PoolingNode::start(config, self.bus.endpoint(host), listener.clone())?;
        self.nodes
            .insert(host.to_string(), ClusterNode { node, listener });
        Ok(())
    }

    pub fn bus(&self) -> &LocalBus {
        &self.bus
    }

    pub fn hosts(&self) -> Vec<Host> {
        self.nodes.keys().cloned().collect()
    }

    pub fn node(&self, host: &str) -> Option<&PoolingNode> {
        self.nodes.get(host).map(|n| &n.node)
    }

    pub fn listener(&self, host: &str) -> Option<&Arc<RecordingListener>> {
        self.nodes.get(host).map(|n| &n.listener)
    }

    /// Cut a host off the topic.
    pub fn isolate(&self, host: &str) {
        self.bus.mute(host);
    }

    /// Reconnect an isolated host.
    pub fn heal(&self, host: &str) {
        self.bus.unmute(host);
    }

    /// Stop a node gracefully and remove it from the cluster.
    pub async fn stop_node(&mut self, host: &str) -> Result<()> {
        if let Some(entry) = self.nodes.remove(host) {
            entry.node.stop().await?;
        }
        Ok(())
    }

    /// Stop every node.
    pub async fn shutdown(&mut self) {
        for (_, entry) in std::mem::take(&mut self.nodes) {
            let _ = entry.node.stop().await;
        }
    }

    /// Current state name of every node.
    pub fn states(&self) -> BTreeMap<Host, &'static str> {
        self.nodes
            .iter()
            .map(|(host, n)| (host.clone(), n.node.current_state()))
            .collect()
    }

    /// Whether every listed host is Active under the same assignments,
    /// and those assignments cover exactly the listed hosts.
    pub fn converged_on(&self, hosts: &[&str]) -> bool {
        let expected: BTreeSet<Host> = hosts.iter().map(|h| h.to_string()).collect();
        let mut seen: Option<Arc<BucketAssignments>> = None;

        for host in hosts {
            let node = match self.node(host) {
                Some(node) => node,
                None => return false,
            };
            if node.current_state() != "active" {
                return false;
            }
            let asgn = match node.assignments() {
                Some(asgn) => asgn,
                None => return false,
            };
            if asgn.all_hosts() != expected {
                return false;
            }
            match &seen {
                Some(prev) if prev != &asgn => return false,
                _ => seen = Some(asgn),
            }
        }
        true
    }

    /// Poll `condition` until it holds or `timeout` passes.
    pub async fn wait_for<F>(&self, condition: F, timeout: Duration) -> bool
    where
        F: Fn(&Self) -> bool,
    {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition(self) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition(self)
    }
}
