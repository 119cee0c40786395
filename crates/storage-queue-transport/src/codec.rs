//! Wire codec turning transport messages into queue payload text and back.
//!
//! The queue service only stores text, so the default codec writes a JSON
//! document holding the header map and the base64-encoded body.

use crate::error::SerializationError;
use crate::message::TransportMessage;

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;

/// Encodes and decodes the payload stored in a queue message
pub trait MessageCodec: Send + Sync {
    /// Encode headers and body into payload text
    fn encode(&self, message: &TransportMessage) -> Result<String, SerializationError>;

    /// Decode payload text into headers and body
    fn decode(&self, payload: &str) -> Result<TransportMessage, SerializationError>;
}

/// JSON envelope codec: `{"headers":{...},"body":"<base64>"}`
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMessageCodec;

impl JsonMessageCodec {
    /// Create the codec
    pub fn new() -> Self {
        Self
    }
}

impl MessageCodec for JsonMessageCodec {
    fn encode(&self, message: &TransportMessage) -> Result<String, SerializationError> {
        Ok(serde_json::to_string(message)?)
    }

    fn decode(&self, payload: &str) -> Result<TransportMessage, SerializationError> {
        Ok(serde_json::from_str(payload)?)
    }
}
