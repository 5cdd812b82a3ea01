//! Message encoding for the internal topic.

use super::Message;
use crate::error::{CodecError, Result};
use bytes::Bytes;

/// Converts messages to and from their wire form.
///
/// Decoding also validates: a message that fails `check_validity` is a
/// decode failure and never reaches the state machine.
pub trait MessageCodec: Send + Sync + 'static {
    /// Encode a message.
    fn encode(&self, msg: &Message) -> Result<Bytes>;

    /// Decode and validate a message.
    fn decode(&self, data: &[u8]) -> Result<Message>;
}

/// JSON codec producing `{"class": ..., "source": ..., ...}` objects.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn encode(&self, msg: &Message) -> Result<Bytes> {
        let data = serde_json::to_vec(msg).map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(Bytes::from(data))
    }

    fn decode(&self, data: &[u8]) -> Result<Message> {
        let msg: Message =
            serde_json::from_slice(data).map_err(|e| CodecError::Decode(e.to_string()))?;
        msg.check_validity()?;
        Ok(msg)
    }
}
