//! Running a pooling node over a transport.
//!
//! ```text
//!              ┌────────────────────────── PoolingNode ───────────────────────────┐
//!   route() ──►│ owner_of(request_id) ── local ──► caller handles it              │
//!              │          │                                                       │
//!              │          └── remote ──► Forward on owner's channel ──┐           │
//!              │                                                      ▼           │
//!              │  ┌────────────┐  decode + filter  ┌───────┐  publish ┌───────────┐│
//!              │  │ event loop │ ◄──────────────── │ State │ ───────► │ Transport ││
//!              │  └────────────┘ ◄── timer ids ─── └───────┘          └───────────┘│
//!              └──────────────────────────────────────────────────────────────────┘
//! ```

mod node;
mod transport;

pub use node::{NodeStatus, PoolingNode};
pub use transport::{LocalBus, LocalEndpoint, Transport};

use crate::assignments::BucketAssignments;
use crate::message::Forward;
use crate::types::Host;
use std::sync::Arc;

/// Callbacks from a node into the application using it.
pub trait PoolingListener: Send + Sync + 'static {
    /// The assignments this node serves changed. `None` means it serves
    /// nothing.
    fn on_assignments(&self, _assignments: Option<&Arc<BucketAssignments>>) {}

    /// A forwarded work item arrived for a bucket this node owns.
    fn on_forward(&self, forward: Forward);

    /// The internal topic stopped working.
    fn on_topic_failed(&self) {}
}

/// A listener that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl PoolingListener for NoopListener {
    fn on_forward(&self, _forward: Forward) {}
}

/// Where [`PoolingNode::route`] sent a work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// This node owns the bucket.
    Local,
    /// Forwarded to the owning host.
    Forwarded(Host),
    /// No assignments are known yet; the item was not routed.
    NoAssignments,
}
