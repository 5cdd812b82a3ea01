//! Error types for the pooling coordinator.

use crate::types::Host;
use thiserror::Error;

/// Result type alias for pooling operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the pooling coordinator.
#[derive(Error, Debug)]
pub enum Error {
    /// A message failed its validity check.
    #[error("invalid message: {0}")]
    Validation(#[from] ValidationError),

    /// A state handler was asked to do something its invariants forbid.
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// Encoding or decoding a message failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The pub/sub transport rejected an operation.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),

    /// The node's event loop is no longer running.
    #[error("node stopped")]
    Stopped,
}

/// Reasons a message fails `check_validity`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Every message needs a non-empty source host.
    #[error("missing source")]
    MissingSource,

    /// A required field is absent or empty.
    #[error("missing {0}")]
    MissingField(&'static str),

    /// Assignments were supplied but name no host at all.
    #[error("assignments contain no hosts")]
    EmptyAssignments,

    /// Assignments mix assigned and unassigned buckets.
    #[error("bucket {0} is unassigned")]
    UnassignedBucket(usize),
}

/// Violations of local state-machine invariants.
///
/// These indicate a bug in the caller rather than a runtime condition and
/// are never recovered from inside the state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// `become_leader` was called by a host that is not the lowest alive host.
    #[error("{host} cannot lead, first alive host is {first:?}")]
    NotFirstAlive { host: Host, first: Option<Host> },
}

/// Message codec errors.
#[derive(Error, Debug)]
pub enum CodecError {
    /// Failed to encode a message.
    #[error("encode failed: {0}")]
    Encode(String),

    /// Failed to decode a message.
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Transport errors.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The host already holds a live subscription.
    #[error("{0} is already subscribed")]
    AlreadySubscribed(Host),
}
