//! Incremental message parts delivered by the event stream.
//!
//! A part is one fragment of agent output (text, reasoning, or a tool
//! invocation). Parts are redelivered as they evolve: the same logical part
//! arrives repeatedly with updated state until it carries an end timestamp.
//! Field names follow the agent server's wire casing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One incremental fragment of agent output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePart {
    #[serde(default)]
    pub id: String,

    #[serde(default, rename = "messageID")]
    pub message_id: String,

    #[serde(default, rename = "sessionID")]
    pub session_id: String,

    #[serde(rename = "type")]
    pub part_type: PartType,

    /// Free text, present for `text` and `reasoning` parts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Tool name, present for `tool` parts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,

    #[serde(default, rename = "callID", skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,

    /// Execution state, present for `tool` parts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ToolState>,

    /// The part's own time range. Not authoritative for tool parts; see
    /// [`ToolState::time`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<TimeRange>,

    /// Token accounting, present for `step-finish` parts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenUsage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

/// Part type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PartType {
    Text,
    Reasoning,
    Tool,
    StepStart,
    StepFinish,
    #[serde(other)]
    Unknown,
}

/// Execution state of a tool part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolState {
    pub status: ToolStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// The state's own time range. For tool parts this, not the part-level
    /// range, decides whether the invocation has finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<TimeRange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Pending,
    Running,
    Completed,
    #[serde(other)]
    Unknown,
}

/// Start/end pair in unix milliseconds. `end` stays absent until the
/// producing step has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    #[serde(default)]
    pub start: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
}

/// Token accounting attached to `step-finish` parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input: u64,
    #[serde(default)]
    pub output: u64,
    #[serde(default)]
    pub reasoning: u64,
    #[serde(default)]
    pub cache: CacheUsage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheUsage {
    #[serde(default)]
    pub write: u64,
    #[serde(default)]
    pub read: u64,
}
