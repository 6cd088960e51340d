//! Per-thread event listeners.
//!
//! One listener task runs per thread while that thread has agent activity
//! pending. It consumes the workspace-scoped SSE stream in order, decides
//! which parts become chat updates, and drives the session through
//! active → idle. [`ListenerSet`] tracks a cancellation handle per task so
//! a session cleanup or process shutdown can stop listeners and wait for
//! them to actually exit.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use futures::StreamExt;
use log::{debug, error, warn};
use reqwest_eventsource::Event as SseEvent;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;

use codethread_protocol::{AgentEvent, MessagePart, PartType, ToolStatus, decode_event};

use crate::agent::AgentClient;
use crate::chat::mention;
use crate::messaging::MessageComposer;
use crate::session::SessionRegistry;

/// Cancellation handle and join handle for one running listener.
struct ListenerHandle {
    cancel: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Registry of running listener tasks, keyed by thread id.
///
/// Locked independently of the session registry so that cancelling a
/// listener never contends with session-state mutation.
#[derive(Default)]
pub struct ListenerSet {
    listeners: Mutex<HashMap<String, ListenerHandle>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically check-and-insert a listener for `thread_id`. Returns
    /// false (and does not call `start`) when one is already registered, so
    /// concurrent triggers spawn at most one task.
    pub async fn spawn_if_absent<F, Fut>(&self, thread_id: &str, start: F) -> bool
    where
        F: FnOnce(oneshot::Receiver<()>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut listeners = self.listeners.lock().await;
        if listeners.contains_key(thread_id) {
            return false;
        }
        let (cancel, cancel_rx) = oneshot::channel();
        let task = tokio::spawn(start(cancel_rx));
        listeners.insert(thread_id.to_string(), ListenerHandle { cancel, task });
        debug!("spawned session event listener, thread_id={thread_id}");
        true
    }

    /// Deregister without cancelling. Called by a listener for itself on
    /// the way out; the task keeps running to completion.
    pub async fn remove(&self, thread_id: &str) {
        let mut listeners = self.listeners.lock().await;
        listeners.remove(thread_id);
    }

    /// Cancel the listener for `thread_id` and wait for it to exit.
    pub async fn stop(&self, thread_id: &str) {
        let handle = {
            let mut listeners = self.listeners.lock().await;
            listeners.remove(thread_id)
        };
        if let Some(handle) = handle {
            let _ = handle.cancel.send(());
            if let Err(err) = handle.task.await {
                warn!("listener task for thread {thread_id} panicked: {err}");
            }
            debug!("stopped active listener, thread_id={thread_id}");
        }
    }

    /// Cancel every listener and wait for all of them. Nothing is written
    /// to chat or disk by a listener after this returns.
    pub async fn shutdown_all(&self) {
        let handles: Vec<(String, ListenerHandle)> = {
            let mut listeners = self.listeners.lock().await;
            listeners.drain().collect()
        };
        for (thread_id, handle) in handles {
            let _ = handle.cancel.send(());
            if let Err(err) = handle.task.await {
                warn!("listener task for thread {thread_id} panicked: {err}");
            }
        }
        debug!("stopped all active listeners");
    }

    pub async fn contains(&self, thread_id: &str) -> bool {
        self.listeners.lock().await.contains_key(thread_id)
    }

    pub async fn len(&self) -> usize {
        self.listeners.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Shared dependencies of every listener, bundled for spawning.
#[derive(Clone)]
pub struct ListenerEnv {
    pub registry: Arc<SessionRegistry>,
    pub agent: Arc<AgentClient>,
    pub composer: Arc<MessageComposer>,
    pub listeners: Arc<ListenerSet>,
}

impl ListenerEnv {
    /// Start a listener for `thread_id` unless one is already running.
    /// The only way a listener is ever started.
    pub async fn spawn_listener_if_absent(&self, thread_id: &str) -> bool {
        let env = self.clone();
        let thread_id_owned = thread_id.to_string();
        self.listeners
            .spawn_if_absent(thread_id, move |cancel| async move {
                EventListener::new(env, thread_id_owned).run(cancel).await;
            })
            .await
    }
}

/// Outcome of processing one event.
#[derive(Debug, PartialEq, Eq)]
enum ListenerFlow {
    Continue,
    Stop,
}

/// The per-thread stream consumer.
pub struct EventListener {
    env: ListenerEnv,
    thread_id: String,
}

impl EventListener {
    pub fn new(env: ListenerEnv, thread_id: String) -> Self {
        Self { env, thread_id }
    }

    /// Consume the thread's event stream until idle, cancellation, or a
    /// transport error.
    pub async fn run(self, mut cancel: oneshot::Receiver<()>) {
        let thread_id = self.thread_id.clone();

        let worktree_path = match self
            .env
            .registry
            .read(&thread_id, |record| record.worktree_path.clone())
            .await
        {
            Some(path) => path,
            None => {
                // should not happen: listeners are only spawned for
                // existing sessions
                error!("session not found for thread, thread_id={thread_id}");
                self.env.listeners.remove(&thread_id).await;
                return;
            }
        };

        let mut stream = match self.env.agent.open_event_stream(Path::new(&worktree_path)) {
            Ok(stream) => stream,
            Err(err) => {
                error!("failed to open event stream, thread_id={thread_id}, error={err}");
                self.env.listeners.remove(&thread_id).await;
                return;
            }
        };

        loop {
            tokio::select! {
                _ = &mut cancel => {
                    // the canceller already removed our registration
                    debug!("listener cancelled, thread_id={thread_id}");
                    return;
                }
                next = stream.next() => match next {
                    Some(Ok(SseEvent::Open)) => {
                        debug!("event stream opened, thread_id={thread_id}");
                    }
                    Some(Ok(SseEvent::Message(message))) => {
                        let event = match decode_event(&message.data) {
                            Ok(Some(event)) => event,
                            Ok(None) => continue,
                            Err(err) => {
                                error!(
                                    "failed to decode agent event, thread_id={thread_id}, error={err}"
                                );
                                continue;
                            }
                        };
                        if self.handle_event(event).await == ListenerFlow::Stop {
                            self.env.listeners.remove(&thread_id).await;
                            return;
                        }
                    }
                    Some(Err(err)) => {
                        // transport failure: nothing further is posted to
                        // chat; the session stays registered but inactive,
                        // and the next mention resumes it with a fresh
                        // listener
                        error!("error in agent event stream, thread_id={thread_id}, error={err}");
                        self.env.registry.set_active(&thread_id, false).await;
                        self.env.listeners.remove(&thread_id).await;
                        return;
                    }
                    None => {
                        debug!("agent event stream ended, thread_id={thread_id}");
                        self.env.registry.set_active(&thread_id, false).await;
                        self.env.listeners.remove(&thread_id).await;
                        return;
                    }
                }
            }
        }
    }

    async fn handle_event(&self, event: AgentEvent) -> ListenerFlow {
        let thread_id = &self.thread_id;
        match event {
            AgentEvent::ServerConnected => {
                let _ = self
                    .env
                    .registry
                    .update(thread_id, |record| record.is_streaming = true)
                    .await;
                debug!("confirmed session as streaming, thread_id={thread_id}");
                ListenerFlow::Continue
            }
            AgentEvent::MessagePartUpdated { properties } => {
                self.handle_part(properties.part).await;
                ListenerFlow::Continue
            }
            AgentEvent::SessionIdle { properties } => {
                debug!(
                    "session idle detected, thread_id={thread_id}, session_id={}",
                    properties.session_id
                );
                let _ = self
                    .env
                    .registry
                    .update(thread_id, |record| record.is_streaming = false)
                    .await;

                if let Err(err) = self.env.composer.finalize(thread_id).await {
                    warn!("failed to finalize status message, thread_id={thread_id}, error={err}");
                }

                // a separate message, never folded into the status chain,
                // so it survives later truncation
                let user_id = self
                    .env
                    .registry
                    .read(thread_id, |record| record.user_id.clone())
                    .await
                    .unwrap_or_default();
                if !user_id.is_empty() {
                    let completion = format!("{} Task completed!", mention(&user_id));
                    if let Err(err) = self.env.composer.send_plain(thread_id, &completion).await {
                        warn!(
                            "failed to send completion mention, thread_id={thread_id}, error={err}"
                        );
                    }
                }

                self.env.registry.set_active(thread_id, false).await;
                ListenerFlow::Stop
            }
            AgentEvent::SessionError { properties } => {
                warn!("agent session error, thread_id={thread_id}, properties={properties}");
                ListenerFlow::Continue
            }
        }
    }

    /// Classify one part and surface it if it is ready. Parts that are not
    /// ready are dropped; the same logical part arrives again, updated.
    async fn handle_part(&self, part: MessagePart) {
        if !part_is_ready(&part) {
            return;
        }
        let thread_id = &self.thread_id;
        debug!(
            "processing message part, thread_id={thread_id}, part_type={:?}",
            part.part_type
        );

        let result = match part.part_type {
            PartType::Tool => match part.tool.as_deref() {
                Some(tool) if !tool.is_empty() => {
                    self.env
                        .composer
                        .update_tool_status(thread_id, &format!("tool: {tool}"))
                        .await
                }
                _ => Ok(()),
            },
            PartType::Reasoning => match part.text.as_deref() {
                Some(text) if !text.is_empty() => {
                    self.env
                        .composer
                        .update_tool_status(thread_id, &format!("thinking: {text}"))
                        .await
                }
                _ => Ok(()),
            },
            PartType::Text => match part.text.as_deref() {
                Some(text) if !text.is_empty() => {
                    self.env.composer.update_text_response(thread_id, text).await
                }
                _ => Ok(()),
            },
            PartType::StepStart | PartType::StepFinish | PartType::Unknown => Ok(()),
        };

        if let Err(err) = result {
            warn!("failed to publish part update, thread_id={thread_id}, error={err}");
        }
    }
}

/// Whether a part has finished evolving and may be surfaced.
///
/// Tool parts complete only when the nested tool state says so — completed
/// status AND an end timestamp in the state's own time range; the part-level
/// range is not authoritative for them. Everything else completes when its
/// own time range has an end.
pub fn part_is_ready(part: &MessagePart) -> bool {
    if part.part_type == PartType::Tool {
        return part.state.as_ref().is_some_and(|state| {
            state.status == ToolStatus::Completed
                && state.time.is_some_and(|time| time.end.is_some())
        });
    }
    part.time.is_some_and(|time| time.end.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::test_support::MockChat;
    use crate::config::ModelConfig;
    use crate::session::{ModelRef, SessionRecord, SessionStore};
    use codethread_protocol::{TimeRange, ToolState};
    use codethread_protocol::events::{PartUpdatedProperties, SessionIdleProperties};

    fn tool_part(status: ToolStatus, state_end: Option<i64>) -> MessagePart {
        MessagePart {
            id: "prt_1".to_string(),
            message_id: "msg_1".to_string(),
            session_id: "ses_1".to_string(),
            part_type: PartType::Tool,
            text: None,
            tool: Some("bash".to_string()),
            call_id: None,
            state: Some(ToolState {
                status,
                input: None,
                output: None,
                metadata: None,
                title: None,
                time: Some(TimeRange {
                    start: 1,
                    end: state_end,
                }),
            }),
            time: None,
            tokens: None,
            cost: None,
        }
    }

    fn text_part(kind: PartType, text: &str, end: Option<i64>) -> MessagePart {
        MessagePart {
            id: "prt_2".to_string(),
            message_id: "msg_1".to_string(),
            session_id: "ses_1".to_string(),
            part_type: kind,
            text: Some(text.to_string()),
            tool: None,
            call_id: None,
            state: None,
            time: Some(TimeRange { start: 1, end }),
            tokens: None,
            cost: None,
        }
    }

    #[test]
    fn tool_readiness_follows_the_nested_state() {
        // running, no end: not ready
        assert!(!part_is_ready(&tool_part(ToolStatus::Running, None)));
        // completed but no end timestamp yet: not ready
        assert!(!part_is_ready(&tool_part(ToolStatus::Completed, None)));
        // completed with an end: ready
        assert!(part_is_ready(&tool_part(ToolStatus::Completed, Some(9))));

        // the part-level time range must not make a tool part ready
        let mut part = tool_part(ToolStatus::Running, None);
        part.time = Some(TimeRange {
            start: 1,
            end: Some(9),
        });
        assert!(!part_is_ready(&part));
    }

    #[test]
    fn non_tool_readiness_follows_the_part_time_range() {
        assert!(!part_is_ready(&text_part(PartType::Text, "hi", None)));
        assert!(part_is_ready(&text_part(PartType::Text, "hi", Some(5))));
        assert!(part_is_ready(&text_part(PartType::Reasoning, "hmm", Some(5))));
    }

    async fn listener_fixture() -> (Arc<MockChat>, ListenerEnv, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let model = ModelConfig {
            provider_id: "p".to_string(),
            model_id: "m".to_string(),
        };
        let record = SessionRecord::new(
            "t1",
            "ses_1",
            ModelRef::from(&model),
            "/tmp/wt",
            "/srv/repo",
            "repo",
            "",
        );
        store.save(&record).unwrap();

        let agent = Arc::new(AgentClient::new("http://127.0.0.1:1").unwrap());
        let registry = Arc::new(SessionRegistry::new(store, agent.clone()));
        registry.lazy_load("t1").await.unwrap();
        let _ = registry
            .update("t1", |record| record.user_id = "user-7".to_string())
            .await;
        registry.set_active("t1", true).await;

        let chat = Arc::new(MockChat::default());
        let composer = Arc::new(MessageComposer::new(registry.clone(), chat.clone()));
        let env = ListenerEnv {
            registry,
            agent,
            composer,
            listeners: Arc::new(ListenerSet::new()),
        };
        (chat, env, dir)
    }

    #[tokio::test]
    async fn running_tool_part_produces_no_chat_update() {
        let (chat, env, _dir) = listener_fixture().await;
        let listener = EventListener::new(env, "t1".to_string());

        let flow = listener
            .handle_event(AgentEvent::MessagePartUpdated {
                properties: PartUpdatedProperties {
                    part: tool_part(ToolStatus::Running, None),
                },
            })
            .await;

        assert_eq!(flow, ListenerFlow::Continue);
        assert_eq!(chat.sent_count(), 0);
        assert_eq!(chat.edit_count(), 0);
    }

    #[tokio::test]
    async fn completed_tool_part_produces_exactly_one_update() {
        let (chat, env, _dir) = listener_fixture().await;
        let listener = EventListener::new(env, "t1".to_string());

        listener
            .handle_event(AgentEvent::MessagePartUpdated {
                properties: PartUpdatedProperties {
                    part: tool_part(ToolStatus::Completed, Some(9)),
                },
            })
            .await;

        assert_eq!(chat.sent_count() + chat.edit_count(), 1);
        let sent = chat.sent.lock().unwrap();
        assert!(sent[0].1.contains("> tool: bash"));
    }

    #[tokio::test]
    async fn session_idle_mentions_user_and_deactivates() {
        let (chat, env, _dir) = listener_fixture().await;
        let registry = env.registry.clone();
        let listener = EventListener::new(env, "t1".to_string());

        registry
            .update("t1", |record| record.is_streaming = true)
            .await;

        let flow = listener
            .handle_event(AgentEvent::SessionIdle {
                properties: SessionIdleProperties {
                    session_id: "ses_1".to_string(),
                },
            })
            .await;

        assert_eq!(flow, ListenerFlow::Stop);
        assert!(!registry.is_active("t1").await);
        assert!(
            !registry
                .read("t1", |record| record.is_streaming)
                .await
                .unwrap()
        );

        let sent = chat.sent.lock().unwrap();
        assert_eq!(sent.last().unwrap().1, "<@user-7> Task completed!");
    }

    #[tokio::test]
    async fn concurrent_spawns_start_exactly_one_listener() {
        let set = Arc::new(ListenerSet::new());

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let set = set.clone();
            tasks.push(tokio::spawn(async move {
                set.spawn_if_absent("t1", |mut cancel| async move {
                    let _ = (&mut cancel).await;
                })
                .await
            }));
        }

        let mut spawned = 0;
        for task in tasks {
            if task.await.unwrap() {
                spawned += 1;
            }
        }
        assert_eq!(spawned, 1);
        assert_eq!(set.len().await, 1);

        set.shutdown_all().await;
        assert!(set.is_empty().await);
    }

    #[tokio::test]
    async fn stop_waits_for_the_task_to_exit() {
        let set = Arc::new(ListenerSet::new());
        let (done_tx, done_rx) = oneshot::channel::<()>();

        set.spawn_if_absent("t1", move |mut cancel| async move {
            let _ = (&mut cancel).await;
            let _ = done_tx.send(());
        })
        .await;

        set.stop("t1").await;
        // the task must have finished by the time stop returns
        done_rx.await.unwrap();
        assert!(!set.contains("t1").await);
    }
}
