//! Stream Codec Module
//!
//! Decodes Binance WebSocket text frames.
//!
//! Frames arrive either as raw event objects (`/ws/...` endpoints) or
//! wrapped in a `{"stream": ..., "data": ...}` envelope (`/stream?streams=`
//! endpoints). Both shapes decode to the same [`BinanceMessage`].

use crate::infrastructure::binance::messages::{
    AggTradeMessage, BinanceMessage, CombinedStreamMessage,
};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is not a JSON object.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// JSON codec for Binance market streams.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not JSON, is not an object, or is an
    /// aggregate trade with malformed fields.
    pub fn decode(&self, text: &str) -> Result<BinanceMessage, CodecError> {
        let trimmed = text.trim();
        if !trimmed.starts_with('{') {
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {}",
                trimmed.chars().take(50).collect::<String>()
            )));
        }

        let value: serde_json::Value = serde_json::from_str(trimmed)?;
        self.decode_value(value)
    }

    fn decode_value(&self, value: serde_json::Value) -> Result<BinanceMessage, CodecError> {
        if value.get("stream").is_some() && value.get("data").is_some() {
            let envelope: CombinedStreamMessage = serde_json::from_value(value)?;
            return self.decode_value(envelope.data);
        }

        if value.get("id").is_some() && value.get("e").is_none() {
            return Ok(BinanceMessage::CommandResponse);
        }

        match value.get("e").and_then(|v| v.as_str()) {
            Some("aggTrade") => {
                let m: AggTradeMessage = serde_json::from_value(value)?;
                Ok(BinanceMessage::AggTrade(m))
            }
            Some(other) => Ok(BinanceMessage::Other(other.to_string())),
            None => Err(CodecError::InvalidFormat("missing event type".to_string())),
        }
    }
}
