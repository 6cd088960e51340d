//! Typed SSE event envelope.
//!
//! Every event on the agent server's `/event` stream is a JSON object with a
//! `type` discriminator and a `properties` payload. The relay consumes four
//! kinds; the rest of the stream is noise to it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::parts::MessagePart;

/// An event from the agent server, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    /// The SSE endpoint accepted the subscription.
    #[serde(rename = "server.connected")]
    ServerConnected,

    /// A message part was created or updated. Redelivered as the part
    /// evolves; the nested part carries its own completion markers.
    #[serde(rename = "message.part.updated")]
    MessagePartUpdated { properties: PartUpdatedProperties },

    /// The session finished its current turn. Terminal success signal for a
    /// listener.
    #[serde(rename = "session.idle")]
    SessionIdle { properties: SessionIdleProperties },

    /// The session reported an error.
    #[serde(rename = "session.error")]
    SessionError {
        #[serde(default)]
        properties: Value,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartUpdatedProperties {
    pub part: MessagePart,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionIdleProperties {
    #[serde(default, rename = "sessionId", alias = "sessionID")]
    pub session_id: String,
}

/// Decode one SSE data payload.
///
/// Returns `Ok(None)` for event kinds the relay does not consume, so callers
/// can skip them without treating the stream as broken. Malformed payloads of
/// a known kind are a real decode error.
pub fn decode_event(data: &str) -> Result<Option<AgentEvent>, serde_json::Error> {
    let value: Value = serde_json::from_str(data)?;
    let known = matches!(
        value.get("type").and_then(Value::as_str),
        Some("server.connected" | "message.part.updated" | "session.idle" | "session.error")
    );
    if !known {
        return Ok(None);
    }
    serde_json::from_value(value).map(Some)
}
