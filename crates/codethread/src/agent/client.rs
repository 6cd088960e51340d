//! HTTP + SSE client for an opencode-compatible agent server.
//!
//! One client is constructed at bootstrap and shared process-wide behind an
//! `Arc`; it is stateless across calls apart from reqwest's connection pool,
//! so concurrent use needs no locking. Every call is scoped to a workspace
//! directory via the `directory` query parameter.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use log::debug;
use reqwest_eventsource::EventSource;
use thiserror::Error;

use codethread_protocol::{ModelSelector, PromptPart, PromptRequest, PromptResponse, Session};

/// Result type for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

/// Errors from the agent server boundary.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The request never completed (connection refused, timeout, body read).
    #[error("agent transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("agent returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    /// The event stream request could not be prepared.
    #[error("failed to open agent event stream: {0}")]
    EventStream(#[from] reqwest_eventsource::CannotCloneRequestError),
}

/// Session-scoped client for the agent server.
pub struct AgentClient {
    base_url: String,
    http: reqwest::Client,
}

impl AgentClient {
    pub fn new(base_url: impl Into<String>) -> AgentResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            base_url: base_url.into(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Create a new session scoped to `directory`.
    pub async fn create_session(&self, directory: &Path) -> AgentResult<Session> {
        let url = format!(
            "{}/session?directory={}",
            self.base_url,
            urlencoding::encode(&directory.to_string_lossy())
        );
        debug!("creating agent session, directory={}", directory.display());

        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({}))
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        Ok(response.json().await?)
    }

    /// Send one prompt turn to an existing session.
    ///
    /// `tools` selectively disables tools for this turn (`None` keeps the
    /// server defaults).
    pub async fn prompt(
        &self,
        session_id: &str,
        directory: &Path,
        model: ModelSelector,
        text: impl Into<String>,
        tools: Option<HashMap<String, bool>>,
    ) -> AgentResult<PromptResponse> {
        let url = format!(
            "{}/session/{}/message?directory={}",
            self.base_url,
            session_id,
            urlencoding::encode(&directory.to_string_lossy())
        );
        let body = PromptRequest {
            parts: vec![PromptPart::text(text)],
            model,
            tools,
        };
        debug!(
            "prompting agent session, session_id={session_id}, directory={}",
            directory.display()
        );

        let response = self.http.post(&url).json(&body).send().await?;
        let response = Self::check_status(response).await?;
        Ok(response.json().await?)
    }

    /// Open the SSE event stream for one workspace.
    ///
    /// Consuming the stream is a long-lived suspending operation; callers
    /// own cancellation (dropping the stream closes the connection).
    pub fn open_event_stream(&self, directory: &Path) -> AgentResult<EventSource> {
        let url = format!(
            "{}/event?directory={}",
            self.base_url,
            urlencoding::encode(&directory.to_string_lossy())
        );
        debug!("opening agent event stream, directory={}", directory.display());

        let request = self
            .http
            .get(&url)
            .header("Accept", "text/event-stream");
        Ok(EventSource::new(request)?)
    }

    async fn check_status(response: reqwest::Response) -> AgentResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(AgentError::Status { status, body })
    }
}
