//! Outbound message composition.
//!
//! Each thread has at most one live status message, edited in place as the
//! agent works. The body is a fixed header, the blockquoted tool/thinking
//! history, and the current response. When the body would blow the chat
//! platform's hard length limit, the live message gets a final "continued
//! below" marker and a new message takes over, seeded with the most recent
//! suffix of the buffers — an unbounded chain of bounded messages where
//! only the newest is ever edited again.

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, warn};

use crate::chat::ChatApi;
use crate::session::SessionRegistry;

/// Discord's hard message length limit.
pub const MESSAGE_LIMIT: usize = 2000;

/// Headroom kept under the limit when composing.
const SAFETY_MARGIN: usize = 50;

/// Header of every live status message.
pub const STATUS_HEADER: &str = "**Agent activity**\n";

/// Header of continuation messages in a chain.
pub const CONTINUED_HEADER: &str = "**Agent activity (continued)**\n";

const CONTINUED_BELOW_MARKER: &str = "\n*(continued below)*";

/// Builds and maintains the live status message per thread.
///
/// Only the thread's own event listener calls into this for a given thread,
/// so edits to one live message never race each other.
pub struct MessageComposer {
    registry: Arc<SessionRegistry>,
    chat: Arc<dyn ChatApi>,
}

impl MessageComposer {
    pub fn new(registry: Arc<SessionRegistry>, chat: Arc<dyn ChatApi>) -> Self {
        Self { registry, chat }
    }

    /// Append a tool/thinking fragment to the thread's history and refresh
    /// the status message. Fragments are blockquoted; history only grows
    /// within a turn.
    pub async fn update_tool_status(&self, thread_id: &str, fragment: &str) -> Result<()> {
        let quoted = format_blockquote(fragment);
        if quoted.is_empty() {
            return Ok(());
        }
        self.registry
            .update(thread_id, |record| {
                append_history(&mut record.tool_history, &quoted);
            })
            .await
            .context("session disappeared while appending status")?;
        self.rebuild(thread_id).await
    }

    /// Replace the thread's current response and refresh the status
    /// message. A later text part supersedes an earlier one — the agent
    /// emits growing partial completions.
    pub async fn update_text_response(&self, thread_id: &str, text: &str) -> Result<()> {
        let formatted = format!("Response:\n{}", collapse_newlines(text));
        self.registry
            .update(thread_id, |record| {
                record.current_response = formatted;
            })
            .await
            .context("session disappeared while updating response")?;
        self.rebuild(thread_id).await
    }

    /// Recompute the status message body and push it to chat, editing the
    /// live message when possible and rolling over to a continuation
    /// message when the limit is hit.
    pub async fn rebuild(&self, thread_id: &str) -> Result<()> {
        let (history, response, live_id) = self
            .registry
            .read(thread_id, |record| {
                (
                    record.tool_history.clone(),
                    record.current_response.clone(),
                    record.status_message_id.clone(),
                )
            })
            .await
            .context("session disappeared during rebuild")?;

        let combined = join_segments(&history, &response);
        let body = format!("{STATUS_HEADER}{combined}");
        let budget = MESSAGE_LIMIT - SAFETY_MARGIN;

        if body.len() <= budget {
            match live_id {
                Some(message_id) => {
                    if let Err(err) = self.chat.edit_message(thread_id, &message_id, &body).await {
                        warn!("failed to edit status message, thread_id={thread_id}, error={err}");
                    }
                }
                None => {
                    let message_id = self.chat.send_message(thread_id, &body).await?;
                    let _ = self
                        .registry
                        .update(thread_id, |record| {
                            record.status_message_id = Some(message_id);
                        })
                        .await;
                }
            }
            let _ = self
                .registry
                .update(thread_id, |record| record.status_content = body)
                .await;
            return Ok(());
        }

        // Over the limit: close out the old message, then start a fresh one
        // carrying the most recent content.
        if let Some(message_id) = live_id {
            let previous = self
                .registry
                .read(thread_id, |record| record.status_content.clone())
                .await
                .unwrap_or_default();
            let closing = closing_body(&previous, budget);
            if let Err(err) = self.chat.edit_message(thread_id, &message_id, &closing).await {
                warn!(
                    "failed to mark status message as continued, thread_id={thread_id}, error={err}"
                );
            }
        }

        let available = budget.saturating_sub(CONTINUED_HEADER.len());
        let tail = tail_on_line_boundary(&combined, available);
        let continued = format!("{CONTINUED_HEADER}{tail}");

        let message_id = self.chat.send_message(thread_id, &continued).await?;
        debug!("rolled status message over, thread_id={thread_id}");
        let _ = self
            .registry
            .update(thread_id, |record| {
                record.status_message_id = Some(message_id);
                record.status_content = continued;
            })
            .await;
        Ok(())
    }

    /// Final refresh when a turn completes. Does nothing unless a status
    /// message is live.
    pub async fn finalize(&self, thread_id: &str) -> Result<()> {
        let live = self
            .registry
            .read(thread_id, |record| record.status_message_id.is_some())
            .await
            .unwrap_or(false);
        if !live {
            return Ok(());
        }
        self.rebuild(thread_id).await
    }

    /// Post a standalone message to the thread. Used for completion
    /// mentions, which must never be folded into the status chain.
    pub async fn send_plain(&self, thread_id: &str, content: &str) -> Result<()> {
        self.chat.send_message(thread_id, content).await?;
        Ok(())
    }
}

/// Append the "continued below" marker, dropping whole lines from the top
/// if the marker would not fit.
fn closing_body(previous: &str, budget: usize) -> String {
    let available = budget.saturating_sub(CONTINUED_BELOW_MARKER.len());
    let mut kept = previous;
    while kept.len() > available {
        match kept.find('\n') {
            Some(i) => kept = &kept[i + 1..],
            None => {
                kept = "";
                break;
            }
        }
    }
    format!("{kept}{CONTINUED_BELOW_MARKER}")
}

/// Join history and response, skipping whichever is empty.
fn join_segments(history: &str, response: &str) -> String {
    match (history.is_empty(), response.is_empty()) {
        (true, true) => String::new(),
        (false, true) => history.to_string(),
        (true, false) => response.to_string(),
        (false, false) => format!("{history}\n\n{response}"),
    }
}

/// Prefix every non-blank line with a quote marker; blank lines are
/// dropped.
pub fn format_blockquote(text: &str) -> String {
    text.trim_end_matches('\n')
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| format!("> {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Collapse runs of newlines to a single newline and trim surrounding
/// newlines.
pub fn collapse_newlines(text: &str) -> String {
    text.trim_matches('\n')
        .split('\n')
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Append with a single separating newline.
pub fn append_history(existing: &mut String, fragment: &str) {
    if existing.is_empty() {
        existing.push_str(fragment);
        return;
    }
    if !existing.ends_with('\n') {
        existing.push('\n');
    }
    existing.push_str(fragment);
}

/// The largest suffix of `text` that fits in `max` bytes without cutting a
/// line in half. Most recent content wins when truncating for space. A
/// single line longer than `max` falls back to a character-boundary suffix.
pub fn tail_on_line_boundary(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    match text[start..].find('\n') {
        Some(newline) if start + newline + 1 < text.len() => &text[start + newline + 1..],
        _ => &text[start..],
    }
}

/// Split `content` into fenced code blocks, each within `limit`, breaking
/// only on line boundaries. Stripping the fences and concatenating the
/// chunks reproduces `content` exactly.
pub fn chunk_fenced(content: &str, lang: &str, limit: usize) -> Vec<String> {
    let open = format!("```{lang}\n");
    let close = "```";
    let overhead = open.len() + close.len();
    let capacity = limit.saturating_sub(overhead).max(1);

    fn push_chunk(chunks: &mut Vec<String>, open: &str, close: &str, body: &str) {
        chunks.push(format!("{open}{body}{close}"));
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for piece in content.split_inclusive('\n') {
        let mut piece = piece;
        // a single oversized line is hard-split at character boundaries
        while piece.len() > capacity {
            if !current.is_empty() {
                push_chunk(&mut chunks, &open, close, &current);
                current.clear();
            }
            let mut cut = capacity;
            while !piece.is_char_boundary(cut) {
                cut -= 1;
            }
            push_chunk(&mut chunks, &open, close, &piece[..cut]);
            piece = &piece[cut..];
        }
        if current.len() + piece.len() > capacity {
            push_chunk(&mut chunks, &open, close, &current);
            current.clear();
        }
        current.push_str(piece);
    }
    if !current.is_empty() || chunks.is_empty() {
        push_chunk(&mut chunks, &open, close, &current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentClient;
    use crate::chat::test_support::MockChat;
    use crate::config::ModelConfig;
    use crate::session::{ModelRef, SessionRecord, SessionStore};

    async fn composer_with_session() -> (Arc<MockChat>, MessageComposer, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let model = ModelConfig {
            provider_id: "p".to_string(),
            model_id: "m".to_string(),
        };
        store
            .save(&SessionRecord::new(
                "t1",
                "ses_1",
                ModelRef::from(&model),
                "/tmp/wt",
                "/srv/repo",
                "repo",
                "user",
            ))
            .unwrap();

        let agent = Arc::new(AgentClient::new("http://127.0.0.1:1").unwrap());
        let registry = Arc::new(SessionRegistry::new(store, agent));
        registry.lazy_load("t1").await.unwrap();

        let chat = Arc::new(MockChat::default());
        let composer = MessageComposer::new(registry, chat.clone());
        (chat, composer, dir)
    }

    #[test]
    fn blockquote_prefixes_non_blank_lines() {
        assert_eq!(format_blockquote("tool: bash"), "> tool: bash");
        assert_eq!(format_blockquote("a\n\nb\n"), "> a\n> b");
        assert_eq!(format_blockquote(""), "");
    }

    #[test]
    fn collapse_newlines_removes_runs() {
        assert_eq!(collapse_newlines("\n\na\n\n\nb\n"), "a\nb");
        assert_eq!(collapse_newlines("plain"), "plain");
    }

    #[test]
    fn append_history_joins_with_single_newline() {
        let mut history = String::new();
        append_history(&mut history, "> one");
        append_history(&mut history, "> two");
        assert_eq!(history, "> one\n> two");
    }

    #[test]
    fn tail_keeps_most_recent_lines_and_boundary() {
        let text = "line one\nline two\nline three";
        let tail = tail_on_line_boundary(text, 15);
        assert_eq!(tail, "line three");
        assert!(tail.len() <= 15);

        // everything fits
        assert_eq!(tail_on_line_boundary("short", 100), "short");

        // one giant line still gets bounded
        let giant = "x".repeat(500);
        assert!(tail_on_line_boundary(&giant, 100).len() <= 100);
    }

    #[test]
    fn chunk_fenced_round_trips_content() {
        let diff: String = (0..200)
            .map(|i| format!("+ line number {i}\n"))
            .collect();
        assert!(diff.len() > 5000);

        let chunks = chunk_fenced(&diff, "diff", MESSAGE_LIMIT);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= MESSAGE_LIMIT);
            assert!(chunk.starts_with("```diff\n"));
            assert!(chunk.ends_with("```"));
        }

        let reassembled: String = chunks
            .iter()
            .map(|c| &c["```diff\n".len()..c.len() - "```".len()])
            .collect();
        assert_eq!(reassembled, diff);
    }

    #[tokio::test]
    async fn rebuild_creates_then_edits_one_live_message() {
        let (chat, composer, _dir) = composer_with_session().await;

        composer.update_tool_status("t1", "tool: bash").await.unwrap();
        composer.update_tool_status("t1", "tool: read").await.unwrap();
        composer
            .update_text_response("t1", "All done.\n\n\nBye.")
            .await
            .unwrap();

        let sent = chat.sent.lock().unwrap();
        let edits = chat.edits.lock().unwrap();
        assert_eq!(sent.len(), 1, "exactly one live message");
        assert_eq!(edits.len(), 2, "subsequent rebuilds edit in place");

        let final_body = &edits.last().unwrap().2;
        assert!(final_body.starts_with(STATUS_HEADER));
        let bash = final_body.find("> tool: bash").unwrap();
        let read = final_body.find("> tool: read").unwrap();
        assert!(bash < read, "fragments stay in append order");
        assert!(final_body.contains("Response:\nAll done.\nBye."));
        assert!(!final_body.contains("> Response"));
    }

    #[tokio::test]
    async fn later_text_part_supersedes_earlier_one() {
        let (chat, composer, _dir) = composer_with_session().await;

        composer.update_text_response("t1", "partial").await.unwrap();
        composer
            .update_text_response("t1", "partial then complete")
            .await
            .unwrap();

        let edits = chat.edits.lock().unwrap();
        let body = &edits.last().unwrap().2;
        assert!(body.contains("Response:\npartial then complete"));
        assert_eq!(body.matches("Response:").count(), 1);
    }

    #[tokio::test]
    async fn overflow_rolls_over_to_continuation_message() {
        let (chat, composer, _dir) = composer_with_session().await;

        // first a small status message so a live message exists
        composer.update_tool_status("t1", "tool: bash").await.unwrap();

        // then enough fragments to blow the limit
        for i in 0..200 {
            composer
                .update_tool_status("t1", &format!("thinking: step number {i}"))
                .await
                .unwrap();
        }

        let sent = chat.sent.lock().unwrap();
        let edits = chat.edits.lock().unwrap();
        assert!(sent.len() >= 2, "continuation messages were posted");

        for (_, content) in sent.iter() {
            assert!(content.len() <= MESSAGE_LIMIT);
        }
        for (_, _, content) in edits.iter() {
            assert!(content.len() <= MESSAGE_LIMIT);
        }

        // the message edited right before a rollover carries the marker
        assert!(
            edits
                .iter()
                .any(|(_, _, content)| content.ends_with("*(continued below)*")),
            "old live message marked as continued"
        );

        // continuation bodies start with the continued header and unbroken lines
        let continuation = &sent.last().unwrap().1;
        assert!(continuation.starts_with(CONTINUED_HEADER));
        let after_header = &continuation[CONTINUED_HEADER.len()..];
        assert!(after_header.starts_with("> "), "truncated on a line boundary");
    }

    #[tokio::test]
    async fn completion_mention_is_a_separate_message() {
        let (chat, composer, _dir) = composer_with_session().await;
        composer.update_tool_status("t1", "tool: bash").await.unwrap();
        composer.send_plain("t1", "<@user> Task completed!").await.unwrap();

        let sent = chat.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent.last().unwrap().1, "<@user> Task completed!");
    }
}
