//! Pub/sub message record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::Payload;
use crate::codec;
use crate::error::CodecError;

/// Record name used when encoding and decoding messages.
pub const MESSAGE_RECORD: &str = "message";

/// Key under which an undecodable payload is carried in a fallback message.
pub const RAW_KEY: &str = "raw";

/// A message delivered on a channel.
///
/// There is no schema enforcement: subscribers may receive payloads they did
/// not expect, in which case they get a fallback message (see
/// [`Message::decode_or_fallback`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub channel: String,
    pub data: Payload,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Wrap `data` for publication on `channel`, stamped with the current time.
    pub fn new(channel: impl Into<String>, data: Payload) -> Self {
        Self {
            channel: channel.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    /// Synthesize a message for a payload that is not a well-formed `Message`.
    ///
    /// The undecoded payload is kept verbatim (lossy UTF-8) under [`RAW_KEY`].
    pub fn fallback(channel: impl Into<String>, payload: &[u8]) -> Self {
        let mut data = Payload::new();
        data.insert(
            RAW_KEY.to_string(),
            JsonValue::String(String::from_utf8_lossy(payload).into_owned()),
        );
        Self::new(channel, data)
    }

    /// Decode a payload received on `channel`.
    ///
    /// Never fails: every payload yields exactly one message.
    pub fn decode_or_fallback(channel: &str, payload: &[u8]) -> Self {
        Self::decode_or_else(channel, payload, |_| {})
    }

    /// Like [`Message::decode_or_fallback`], calling `on_fallback` with the
    /// decode error before a fallback message is built.
    pub fn decode_or_else(
        channel: &str,
        payload: &[u8],
        on_fallback: impl FnOnce(&CodecError),
    ) -> Self {
        match codec::decode::<Message>(MESSAGE_RECORD, payload) {
            Ok(message) => message,
            Err(e) => {
                on_fallback(&e);
                Self::fallback(channel, payload)
            }
        }
    }

    /// The undecoded payload text, if this is a fallback message.
    pub fn raw(&self) -> Option<&str> {
        self.data.get(RAW_KEY).and_then(JsonValue::as_str)
    }
}
