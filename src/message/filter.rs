//! Routing filters selecting which inbound messages a state wants to see.
//!
//! A filter is a small expression tree evaluated against message metadata:
//!
//! ```text
//! or
//! ├── equals(channel, "@admin")
//! └── and
//!     ├── equals(channel, "host-a")
//!     └── equals(timestamp, "1700000000000")
//! ```

use super::Message;
use serde::{Deserialize, Serialize};

/// Field holding the channel a message was published on.
pub const FIELD_CHANNEL: &str = "channel";
/// Field holding the message type name.
pub const FIELD_CLASS: &str = "class";
/// Field holding the sending host.
pub const FIELD_SOURCE: &str = "source";
/// Field holding a heartbeat's timestamp.
pub const FIELD_TIMESTAMP: &str = "timestamp";

/// Expression over message metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Filter {
    /// The field is present and equal to the value.
    Equals { field: String, value: String },
    /// Every child matches. An empty conjunction matches everything.
    And(Vec<Filter>),
    /// Some child matches. An empty disjunction matches nothing.
    Or(Vec<Filter>),
}

impl Filter {
    /// Build an equality test.
    pub fn equals(field: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Equals {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Build a conjunction.
    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And(filters)
    }

    /// Build a disjunction.
    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Or(filters)
    }

    /// Evaluate the filter against a message.
    pub fn matches(&self, msg: &Message) -> bool {
        match self {
            Filter::Equals { field, value } => field_value(msg, field).as_deref() == Some(value),
            Filter::And(children) => children.iter().all(|f| f.matches(msg)),
            Filter::Or(children) => children.iter().any(|f| f.matches(msg)),
        }
    }
}

fn field_value(msg: &Message, field: &str) -> Option<String> {
    match field {
        FIELD_CHANNEL => msg.channel().map(str::to_string),
        FIELD_CLASS => Some(msg.class().to_string()),
        FIELD_SOURCE => Some(msg.source().to_string()),
        FIELD_TIMESTAMP => match msg {
            Message::Heartbeat(hb) => Some(hb.timestamp_ms.to_string()),
            _ => None,
        },
        _ => None,
    }
}
