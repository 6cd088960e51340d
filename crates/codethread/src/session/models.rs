//! Session and commit records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ModelConfig;

/// Everything known about one chat thread's coding session.
///
/// The serialized fields are the durable representation written by the
/// session store. The `#[serde(skip)]` fields exist only in memory and reset
/// to their zero values when a record is reloaded from disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Chat thread id. Globally unique, immutable once assigned.
    pub thread_id: String,

    /// Remote agent session id.
    pub session_id: String,

    pub model: ModelRef,

    /// Absolute path to the session's worktree.
    pub worktree_path: String,

    pub repository_path: String,
    pub repository_name: String,

    pub created_at: DateTime<Utc>,

    /// Append-only; only the tail element's status/hash may be rewritten,
    /// immediately after the append.
    #[serde(default)]
    pub commits: Vec<CommitRecord>,

    // -- in-memory only --
    /// Whether the session currently has agent activity pending.
    #[serde(skip)]
    pub active: bool,

    /// Whether the event stream is currently connected.
    #[serde(skip)]
    pub is_streaming: bool,

    /// Id of the live, in-place-edited status message, if one exists.
    #[serde(skip)]
    pub status_message_id: Option<String>,

    /// Last composed body of the live status message.
    #[serde(skip)]
    pub status_content: String,

    /// Running tool/thinking history for the current turn. Grows
    /// monotonically until the next turn.
    #[serde(skip)]
    pub tool_history: String,

    /// Latest text response for the current turn; replaced, never appended.
    #[serde(skip)]
    pub current_response: String,

    /// User who started the session; mentioned on completion.
    #[serde(skip)]
    pub user_id: String,
}

impl SessionRecord {
    pub fn new(
        thread_id: impl Into<String>,
        session_id: impl Into<String>,
        model: ModelRef,
        worktree_path: impl Into<String>,
        repository_path: impl Into<String>,
        repository_name: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            session_id: session_id.into(),
            model,
            worktree_path: worktree_path.into(),
            repository_path: repository_path.into(),
            repository_name: repository_name.into(),
            created_at: Utc::now(),
            commits: Vec::new(),
            active: false,
            is_streaming: false,
            status_message_id: None,
            status_content: String::new(),
            tool_history: String::new(),
            current_response: String::new(),
            user_id: user_id.into(),
        }
    }

    /// Append a commit record in `Pending` state, before any git mutation.
    pub fn push_pending_commit(&mut self, summary: impl Into<String>) {
        self.commits.push(CommitRecord {
            hash: String::new(),
            summary: summary.into(),
            timestamp: Utc::now(),
            status: CommitStatus::Pending,
        });
    }

    /// Rewrite the tail commit's terminal status (and hash, when known).
    /// The only mutation permitted on historical elements.
    pub fn finish_tail_commit(&mut self, status: CommitStatus, hash: Option<&str>) {
        if let Some(tail) = self.commits.last_mut() {
            tail.status = status;
            if let Some(hash) = hash {
                tail.hash = hash.to_string();
            }
        }
    }

}

/// Persisted model selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRef {
    pub provider_id: String,
    pub model_id: String,
}

impl ModelRef {
    pub fn display_name(&self) -> String {
        format!("{}/{}", self.provider_id, self.model_id)
    }
}

impl From<&ModelConfig> for ModelRef {
    fn from(model: &ModelConfig) -> Self {
        Self {
            provider_id: model.provider_id.clone(),
            model_id: model.model_id.clone(),
        }
    }
}

impl From<ModelRef> for codethread_protocol::ModelSelector {
    fn from(model: ModelRef) -> Self {
        Self {
            provider_id: model.provider_id,
            model_id: model.model_id,
        }
    }
}

/// One git commit made from a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    /// Empty until the commit succeeded locally.
    #[serde(default)]
    pub hash: String,

    pub summary: String,
    pub timestamp: DateTime<Utc>,
    pub status: CommitStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitStatus {
    Pending,
    Success,
    Failed,
    NoChanges,
}
