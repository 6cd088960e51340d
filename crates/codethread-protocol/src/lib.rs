//! Wire contract for the agent server.
//!
//! This crate defines the typed shapes codethread exchanges with an
//! opencode-compatible agent server:
//!
//! ```text
//! Chat thread <--[codethread]--> Agent server
//!                                  POST /session            (create)
//!                                  POST /session/{id}/message (prompt)
//!                                  GET  /event               (SSE stream)
//! ```
//!
//! Events arrive on the SSE stream as one JSON envelope per event, tagged by
//! a `type` field. [`events::decode_event`] turns an envelope into the
//! [`events::AgentEvent`] sum type; event kinds the relay does not consume
//! decode to `None` rather than an error, since the stream mixes many kinds
//! and new ones appear without notice.

pub mod events;
pub mod parts;
pub mod prompt;

pub use events::{AgentEvent, decode_event};
pub use parts::{MessagePart, PartType, TimeRange, ToolState, ToolStatus};
pub use prompt::{ModelSelector, PromptPart, PromptRequest, PromptResponse, Session};
