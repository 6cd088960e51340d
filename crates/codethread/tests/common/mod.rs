//! Shared fixtures: a mock agent server, a recording chat double, and git
//! repo scaffolding.

use std::net::SocketAddr;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};

use codethread::chat::{ChannelKind, ChatApi, ChatThread, IncomingMessage};

// ============================================================================
// Mock agent server
// ============================================================================

#[derive(Clone)]
pub struct MockAgentState {
    pub sessions_created: Arc<AtomicUsize>,
    pub prompts: Arc<Mutex<Vec<Value>>>,
    pub summary_text: Arc<Mutex<String>>,
}

pub struct MockAgent {
    pub addr: SocketAddr,
    pub state: MockAgentState,
}

impl MockAgent {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn sessions_created(&self) -> usize {
        self.state.sessions_created.load(Ordering::SeqCst)
    }
}

/// Spawn an in-process agent server speaking just enough of the wire
/// contract for session creation and prompting.
pub async fn spawn_mock_agent() -> MockAgent {
    let state = MockAgentState {
        sessions_created: Arc::new(AtomicUsize::new(0)),
        prompts: Arc::new(Mutex::new(Vec::new())),
        summary_text: Arc::new(Mutex::new("feat(core): session changes".to_string())),
    };

    async fn create_session(State(state): State<MockAgentState>) -> Json<Value> {
        let n = state.sessions_created.fetch_add(1, Ordering::SeqCst);
        Json(json!({ "id": format!("ses_mock_{n}") }))
    }

    async fn prompt(State(state): State<MockAgentState>, Json(body): Json<Value>) -> Json<Value> {
        state.prompts.lock().unwrap().push(body);
        let text = state.summary_text.lock().unwrap().clone();
        Json(json!({
            "info": { "id": "msg_1" },
            "parts": [ { "type": "text", "text": text } ]
        }))
    }

    let app = Router::new()
        .route("/session", post(create_session))
        .route("/session/{id}/message", post(prompt))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockAgent { addr, state }
}

// ============================================================================
// Recording chat double
// ============================================================================

/// Chat double recording sends and edits; message ids are sequential.
#[derive(Default)]
pub struct RecordingChat {
    pub sent: Mutex<Vec<(String, String)>>,
    pub edits: Mutex<Vec<(String, String, String)>>,
    next_id: Mutex<u64>,
}

impl RecordingChat {
    pub fn messages_for(&self, channel_id: &str) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(channel, _)| channel == channel_id)
            .map(|(_, content)| content.clone())
            .collect()
    }
}

#[async_trait]
impl ChatApi for RecordingChat {
    fn user_id(&self) -> String {
        "bot-user".to_string()
    }

    async fn send_message(&self, channel_id: &str, content: &str) -> Result<String> {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        self.sent
            .lock()
            .unwrap()
            .push((channel_id.to_string(), content.to_string()));
        Ok(format!("msg-{next}"))
    }

    async fn edit_message(&self, channel_id: &str, message_id: &str, content: &str) -> Result<()> {
        self.edits.lock().unwrap().push((
            channel_id.to_string(),
            message_id.to_string(),
            content.to_string(),
        ));
        Ok(())
    }

    async fn create_thread(&self, _channel_id: &str, name: &str) -> Result<ChatThread> {
        Ok(ChatThread {
            id: "thread-new".to_string(),
            name: name.to_string(),
        })
    }

    async fn channel_kind(&self, channel_id: &str) -> Result<ChannelKind> {
        // channels named thread-* behave as threads
        if channel_id.starts_with("thread-") {
            Ok(ChannelKind::PublicThread)
        } else {
            Ok(ChannelKind::Text)
        }
    }

    async fn receive_messages(&self) -> Result<Vec<IncomingMessage>> {
        Ok(Vec::new())
    }
}

// ============================================================================
// Git scaffolding
// ============================================================================

pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

pub fn run_git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap_or_else(|err| panic!("running git {args:?}: {err}"));
    assert!(
        output.status.success(),
        "git {args:?} failed: {}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr),
    );
}

/// Initialize a repository with one commit.
pub fn init_repo(dir: &Path) {
    run_git(dir, &["init", "-b", "main"]);
    run_git(dir, &["config", "user.name", "Test User"]);
    run_git(dir, &["config", "user.email", "test@example.com"]);
    std::fs::write(dir.join("README.md"), "# test repo\n").unwrap();
    run_git(dir, &["add", "README.md"]);
    run_git(dir, &["commit", "-m", "initial commit"]);
}
