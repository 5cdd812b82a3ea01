//! Messages exchanged between pool members over the internal topic.
//!
//! Every message names its `source` host and the `channel` it was published
//! on. The admin channel reaches every member; a host's own name as channel
//! reaches just that host.
//!
//! | Message          | Channel        | Purpose                                   |
//! |------------------|----------------|-------------------------------------------|
//! | `Heartbeat`      | target host    | liveness beacon to self and successor     |
//! | `Offline`        | admin          | the source is leaving                     |
//! | `Query`          | admin          | starts an election round                  |
//! | `Identification` | admin          | reply to `Query` with the sender's view   |
//! | `Leader`         | admin          | authoritative bucket assignments          |
//! | `Forward`        | bucket owner   | work item routed to the host that owns it |
//!
//! On the wire a message is a JSON object tagged with its `class`:
//!
//! ```text
//! {"class":"Heartbeat","source":"host-a","channel":"host-a","timestampMs":1700000000000}
//! ```

mod codec;
mod filter;

pub use codec::{JsonCodec, MessageCodec};
pub use filter::{Filter, FIELD_CHANNEL, FIELD_CLASS, FIELD_SOURCE, FIELD_TIMESTAMP};

use crate::assignments::BucketAssignments;
use crate::error::ValidationError;
use crate::types::Host;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Any message that travels over the internal topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class")]
pub enum Message {
    /// Liveness beacon.
    Heartbeat(Heartbeat),
    /// Departure announcement.
    Offline(Offline),
    /// "Who is alive, who leads" broadcast.
    Query(Query),
    /// Response to a query.
    Identification(Identification),
    /// New authoritative assignments.
    Leader(Leader),
    /// Work item re-routed to its bucket owner.
    Forward(Forward),
}

impl Message {
    /// Name of the message type, as it appears in the `class` field.
    pub fn class(&self) -> &'static str {
        match self {
            Message::Heartbeat(_) => "Heartbeat",
            Message::Offline(_) => "Offline",
            Message::Query(_) => "Query",
            Message::Identification(_) => "Identification",
            Message::Leader(_) => "Leader",
            Message::Forward(_) => "Forward",
        }
    }

    /// The host that sent the message.
    pub fn source(&self) -> &str {
        match self {
            Message::Heartbeat(m) => &m.source,
            Message::Offline(m) => &m.source,
            Message::Query(m) => &m.source,
            Message::Identification(m) => &m.source,
            Message::Leader(m) => &m.source,
            Message::Forward(m) => &m.source,
        }
    }

    /// The channel the message was published on.
    pub fn channel(&self) -> Option<&str> {
        match self {
            Message::Heartbeat(m) => m.channel.as_deref(),
            Message::Offline(m) => m.channel.as_deref(),
            Message::Query(m) => m.channel.as_deref(),
            Message::Identification(m) => m.channel.as_deref(),
            Message::Leader(m) => m.channel.as_deref(),
            Message::Forward(m) => m.channel.as_deref(),
        }
    }

    /// Set the channel before publishing.
    pub fn set_channel(&mut self, channel: impl Into<String>) {
        let channel = Some(channel.into());
        match self {
            Message::Heartbeat(m) => m.channel = channel,
            Message::Offline(m) => m.channel = channel,
            Message::Query(m) => m.channel = channel,
            Message::Identification(m) => m.channel = channel,
            Message::Leader(m) => m.channel = channel,
            Message::Forward(m) => m.channel = channel,
        }
    }

    /// Check that required fields are present.
    pub fn check_validity(&self) -> Result<(), ValidationError> {
        if self.source().is_empty() {
            return Err(ValidationError::MissingSource);
        }

        match self {
            Message::Heartbeat(_) | Message::Offline(_) | Message::Query(_) => Ok(()),
            Message::Identification(m) => check_assignments(m.assignments.as_deref()),
            Message::Leader(m) => match m.assignments.as_deref() {
                Some(asgn) => asgn.check_validity(),
                None => Err(ValidationError::MissingField("assignments")),
            },
            Message::Forward(m) => m.check_validity(),
        }
    }
}

fn check_assignments(assignments: Option<&BucketAssignments>) -> Result<(), ValidationError> {
    match assignments {
        Some(asgn) => asgn.check_validity(),
        None => Ok(()),
    }
}

/// Liveness beacon, sent by an active host to itself and its successor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub source: Host,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    pub timestamp_ms: u64,
}

impl Heartbeat {
    pub fn new(source: impl Into<Host>, timestamp_ms: u64) -> Self {
        Self {
            source: source.into(),
            channel: None,
            timestamp_ms,
        }
    }
}

/// Announces that the source host is leaving the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offline {
    pub source: Host,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

impl Offline {
    pub fn new(source: impl Into<Host>) -> Self {
        Self {
            source: source.into(),
            channel: None,
        }
    }
}

/// Asks every member to identify itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub source: Host,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

impl Query {
    pub fn new(source: impl Into<Host>) -> Self {
        Self {
            source: source.into(),
            channel: None,
        }
    }
}

/// A member's reply to a query, carrying its current view of the buckets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identification {
    pub source: Host,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default)]
    pub assignments: Option<Arc<BucketAssignments>>,
}

impl Identification {
    pub fn new(source: impl Into<Host>, assignments: Option<Arc<BucketAssignments>>) -> Self {
        Self {
            source: source.into(),
            channel: None,
            assignments,
        }
    }
}

/// Assignments published by the host that believes it leads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leader {
    pub source: Host,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default)]
    pub assignments: Option<Arc<BucketAssignments>>,
}

impl Leader {
    pub fn new(source: impl Into<Host>, assignments: Arc<BucketAssignments>) -> Self {
        Self {
            source: source.into(),
            channel: None,
            assignments: Some(assignments),
        }
    }
}

/// A unit of application work sent to the host that owns its bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Forward {
    pub source: Host,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Infrastructure the work arrived on (e.g. "kafka", "noop").
    pub protocol: String,
    /// Topic the work arrived on.
    pub topic: String,
    /// Opaque work payload.
    pub payload: String,
    /// Request identifier; its hash selects the bucket.
    pub request_id: String,
    /// Number of times the work has been forwarded so far.
    #[serde(default)]
    pub num_hops: u32,
    /// When the work was first received, in milliseconds since the epoch.
    pub create_time_ms: u64,
}

impl Forward {
    pub fn new(
        source: impl Into<Host>,
        protocol: impl Into<String>,
        topic: impl Into<String>,
        payload: impl Into<String>,
        request_id: impl Into<String>,
        create_time_ms: u64,
    ) -> Self {
        Self {
            source: source.into(),
            channel: None,
            protocol: protocol.into(),
            topic: topic.into(),
            payload: payload.into(),
            request_id: request_id.into(),
            num_hops: 0,
            create_time_ms,
        }
    }

    /// Whether the work was created before `min_create_time_ms`.
    pub fn is_expired(&self, min_create_time_ms: u64) -> bool {
        min_create_time_ms > self.create_time_ms
    }

    /// Count one more forwarding hop.
    pub fn bump_num_hops(&mut self) {
        self.num_hops = self.num_hops.saturating_add(1);
    }

    fn check_validity(&self) -> Result<(), ValidationError> {
        if self.protocol.is_empty() {
            return Err(ValidationError::MissingField("protocol"));
        }
        if self.topic.is_empty() {
            return Err(ValidationError::MissingField("topic"));
        }
        if self.request_id.is_empty() {
            return Err(ValidationError::MissingField("requestId"));
        }
        Ok(())
    }
}

macro_rules! impl_from_variant {
    ($($variant:ident),*) => {
        $(
            impl From<$variant> for Message {
                fn from(msg: $variant) -> Self {
                    Message::$variant(msg)
                }
            }
        )*
    };
}

impl_from_variant!(Heartbeat, Offline, Query, Identification, Leader, Forward);
