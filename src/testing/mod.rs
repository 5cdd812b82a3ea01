//! Testing utilities for pooling nodes.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Testing Framework                          │
//! │                                                                 │
//! │  ┌───────────────────────────────────────────────────────────┐  │
//! │  │                  RecordingManager                         │  │
//! │  │  - Drives a single State by hand                          │  │
//! │  │  - Records publishes, timers, distribution, transitions   │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! │                                                                 │
//! │  ┌───────────────────────────────────────────────────────────┐  │
//! │  │                    TestCluster                            │  │
//! │  │  - Real PoolingNodes over a LocalBus                      │  │
//! │  │  - Isolate / heal / stop individual hosts                 │  │
//! │  │  - Convergence checks                                     │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use pooling::testing::TestCluster;
//!
//! let cluster = TestCluster::start(&["pdp-1", "pdp-2"], TestCluster::fast_properties())?;
//! cluster.wait_for(|c| c.converged_on(&["pdp-1", "pdp-2"]), Duration::from_secs(5)).await;
//! ```

mod cluster;
mod recording;


pub use cluster::{RecordingListener, TestCluster};
pub use recording::{RecordedTimer, RecordingManager};

use crate::message::Message;

/// Host used as "this node" in state tests. Sorts before the other hosts.
pub const MY_HOST: &str = "my.host";
pub const HOST1: &str = "z.host.1";
pub const HOST2: &str = "z.host.2";
pub const HOST3: &str = "z.host.3";
pub const HOST4: &str = "z.host.4";

/// A message as delivered on `channel`.
pub fn on_channel(msg: impl Into<Message>, channel: &str) -> Message {
    let mut msg = msg.into();
    msg.set_channel(channel);
    msg
}
