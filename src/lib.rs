//! Peer coordination for a pool of identical nodes sharing one topic.
//!
//! Nodes that consume from the same internal topic use this crate to agree on
//! a leader and on which node serves which bucket of the work-key space:
//! - **Heartbeats** over the topic are the only failure detector
//! - **Lowest host wins** leader election
//! - **Deterministic rebalancing** of a fixed array of buckets over the
//!   live hosts
//!
//! # Features
//!
//! - Per-node state machine: Start, Query, Active, Inactive and Idle
//! - Ring heartbeats between Active nodes, each watching its predecessor
//! - Work routing by key hash with forwarding to the bucket owner
//! - In-process transport for tests and embedding
//!
//! # Example
//!
//! ```rust,no_run
//! use pooling::{LocalBus, NoopListener, PoolingConfig, PoolingNode, RouteDecision};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bus = LocalBus::new();
//!     let config = PoolingConfig::new("pdp-1", "pooling");
//!     let node = PoolingNode::start(config, bus.endpoint("pdp-1"), Arc::new(NoopListener))?;
//!
//!     // Once Active, work is either ours or forwarded to its owner
//!     match node.route("dmaap", "events", "{}", "request-42") {
//!         RouteDecision::Local => println!("handle locally"),
//!         RouteDecision::Forwarded(host) => println!("sent to {}", host),
//!         RouteDecision::NoAssignments => println!("not ready yet"),
//!     }
//!
//!     node.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │            Application Layer                │
//! │        (PoolingListener callbacks)          │
//! └─────────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────────┐
//! │              PoolingNode                    │
//! │  • route(request) -> RouteDecision          │
//! │  • assignments() / status() / metrics()     │
//! │  • stop()                                   │
//! └─────────────────────────────────────────────┘
//!                     │
//!     ┌───────────────┼───────────────┐
//!     ▼               ▼               ▼
//! ┌─────────┐   ┌───────────┐   ┌───────────┐
//! │  State  │   │  Bucket   │   │ Transport │
//! │ Machine │   │Assignments│   │  + Codec  │
//! └─────────┘   └───────────┘   └───────────┘
//! ```
//!
//! # Consistency Model
//!
//! - **Leader**: the lowest host in the assignments it published
//! - **Assignments**: eventually consistent; during an election nodes may
//!   briefly disagree and the lowest leader's assignments win
//! - **Routing**: best effort; forwards expire and are bounded in hops

pub mod assignments;
pub mod config;
pub mod designation;
pub mod error;
pub mod manager;
pub mod message;
pub mod metrics;
pub mod runtime;
pub mod state;
pub mod testing;
pub mod types;

pub use assignments::{rebalance, BucketAssignments};
pub use config::{PoolingConfig, PoolingProperties};
pub use designation::{most_recent_primary, HostRecord};
pub use error::{Error, Result};
pub use manager::{Context, DefaultStateFactory, PoolingManager, StateFactory, TimerHandle, TimerKind};
pub use message::{Filter, JsonCodec, Message, MessageCodec};
pub use metrics::{MetricsSnapshot, PoolingMetrics};
pub use runtime::{
    LocalBus, LocalEndpoint, NodeStatus, NoopListener, PoolingListener, PoolingNode, RouteDecision,
    Transport,
};
pub use state::State;
pub use types::{Host, ADMIN_CHANNEL, UNKNOWN_CHANNEL};
