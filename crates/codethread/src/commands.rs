//! Chat command dispatch and handlers.
//!
//! Commands are mention-driven: a message that mentions the bot is either a
//! command word (`start`, `commit`, `diff`, `cleanup`, `ping`) or, inside a
//! session thread, a prompt forwarded to the agent. Only a small fixed set
//! of failure strings ever crosses the chat boundary; internal errors are
//! logged with the thread id. Git failure output is the one exception,
//! shown verbatim in a code block to aid debugging.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use log::{debug, error, info, warn};

use crate::agent::AgentClient;
use crate::chat::{ChatApi, IncomingMessage, strip_mention};
use crate::config::AppConfig;
use crate::git::{GitError, GitOps};
use crate::listener::{ListenerEnv, ListenerSet};
use crate::messaging::{MESSAGE_LIMIT, MessageComposer, chunk_fenced};
use crate::session::{CommitStatus, ModelRef, SessionRegistry};
use crate::wordlist;

/// Appended to every user prompt so the agent keeps to its checkout.
const WORKTREE_BOUNDARY_NOTE: &str =
    "\n\nImportant: Stay within the current worktree directory for all file operations.";

/// Commit summaries are clipped to this many characters.
const SUMMARY_MAX_CHARS: usize = 50;

const NO_SESSION_MSG: &str =
    "No session found for this thread. Start one by mentioning me with `start <repository>` in a channel.";

/// Everything the command surface needs, wired once at startup.
pub struct Relay {
    pub config: AppConfig,
    pub chat: Arc<dyn ChatApi>,
    pub registry: Arc<SessionRegistry>,
    pub composer: Arc<MessageComposer>,
    pub agent: Arc<AgentClient>,
    pub git: GitOps,
    pub listeners: Arc<ListenerSet>,
}

impl Relay {
    fn listener_env(&self) -> ListenerEnv {
        ListenerEnv {
            registry: self.registry.clone(),
            agent: self.agent.clone(),
            composer: self.composer.clone(),
            listeners: self.listeners.clone(),
        }
    }

    /// Route one inbound message. Messages that do not mention the bot are
    /// ignored.
    pub async fn dispatch(&self, message: &IncomingMessage) -> Result<()> {
        let bot_id = self.chat.user_id();
        if bot_id.is_empty() || !message.mentions.iter().any(|id| *id == bot_id) {
            return Ok(());
        }

        let content = strip_mention(&message.content, &bot_id);
        let channel_id = &message.channel_id;

        let kind = match self.chat.channel_kind(channel_id).await {
            Ok(kind) => kind,
            Err(err) => {
                error!("failed to get channel info, channel_id={channel_id}, error={err}");
                self.reply(channel_id, "Failed to get channel information.")
                    .await;
                return Ok(());
            }
        };

        let (word, rest) = split_command(&content);

        if kind.is_thread() {
            match word {
                "ping" => self.reply(channel_id, "Pong!").await,
                "commit" => self.handle_commit(channel_id).await,
                "diff" => self.handle_diff(channel_id).await,
                "cleanup" => self.handle_cleanup(channel_id).await,
                "" => {
                    self.reply(channel_id, "Please provide a message to send to the agent.")
                        .await
                }
                _ => self.handle_prompt(channel_id, &content).await,
            }
        } else {
            match word {
                "ping" => self.reply(channel_id, "Pong!").await,
                "start" => {
                    self.handle_start(channel_id, &message.author_id, rest)
                        .await
                }
                _ => self.reply(channel_id, &self.usage()).await,
            }
        }
        Ok(())
    }

    fn usage(&self) -> String {
        let repositories: Vec<&str> = self
            .config
            .repositories
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        let models: Vec<String> = self.config.models.iter().map(|m| m.display_name()).collect();
        format!(
            "Mention me with `start <repository> [model]` to begin a session, or mention me \
             inside a session thread to talk to the agent.\nRepositories: {}\nModels: {}",
            repositories.join(", "),
            models.join(", ")
        )
    }

    async fn reply(&self, channel_id: &str, content: &str) {
        if let Err(err) = self.chat.send_message(channel_id, content).await {
            error!("failed to send chat message, channel_id={channel_id}, error={err}");
        }
    }

    /// `start <repository> [model]` — provision a worktree, create the
    /// session, open the thread.
    pub async fn handle_start(&self, channel_id: &str, user_id: &str, args: &str) {
        let mut words = args.split_whitespace();
        let repo_name = match words.next() {
            Some(name) => name,
            None => {
                self.reply(channel_id, &self.usage()).await;
                return;
            }
        };

        let repository = match self.config.repository_by_name(repo_name) {
            Some(repository) => repository.clone(),
            None => {
                self.reply(channel_id, "Invalid repository selection.").await;
                return;
            }
        };

        let model = match words.next() {
            Some(name) => match self.config.model_by_name(name) {
                Some(model) => model.clone(),
                None => {
                    self.reply(channel_id, "Invalid model selection.").await;
                    return;
                }
            },
            None => match self.config.models.first() {
                Some(model) => model.clone(),
                None => {
                    self.reply(channel_id, "No models configured.").await;
                    return;
                }
            },
        };

        let thread_name = format!("codethread: {}", wordlist::generate_name());
        debug!("creating thread, thread_name={thread_name}, channel_id={channel_id}");
        let thread = match self.chat.create_thread(channel_id, &thread_name).await {
            Ok(thread) => thread,
            Err(err) => {
                error!("failed to create thread, channel_id={channel_id}, error={err}");
                self.reply(channel_id, "Failed to create thread.").await;
                return;
            }
        };

        // worktree first; a session is only ever registered against an
        // existing checkout
        let worktree_path = self.config.worktrees_dir().join(&thread.id);
        let branch = format!("codethread/{}", thread.id);
        if let Err(err) = self
            .git
            .create_worktree(Path::new(&repository.path), &worktree_path, &branch)
            .await
        {
            error!(
                "failed to create git worktree, thread_id={}, error={err}",
                thread.id
            );
            self.reply(channel_id, "Failed to create git worktree.").await;
            return;
        }

        let record = match self
            .registry
            .get_or_create(
                &thread.id,
                &worktree_path,
                &repository.path,
                &repository.name,
                ModelRef::from(&model),
                user_id,
            )
            .await
        {
            Ok(record) => record,
            Err(err) => {
                error!("failed to create session, thread_id={}, error={err:#}", thread.id);
                self.reply(channel_id, "Failed to create session.").await;
                return;
            }
        };

        let welcome = format!(
            "```\nSession started\nRepository: {}\nModel: {}\nWorktree: {}\nSession: {}\n```",
            repository.name,
            model.display_name(),
            display_worktree(&worktree_path, &self.config.state_dir),
            id_tail(&record.session_id),
        );
        self.reply(&thread.id, &welcome).await;
        self.reply(
            channel_id,
            &format!("Session created! Check the thread: <#{}>", thread.id),
        )
        .await;
        info!(
            "session started, thread_id={}, repository={}, model={}",
            thread.id,
            repository.name,
            model.display_name()
        );
    }

    /// A mention with free text inside a session thread: forward to the
    /// agent and make sure a listener is streaming events back.
    pub async fn handle_prompt(&self, thread_id: &str, content: &str) {
        let record = match self.registry.lazy_load(thread_id).await {
            Some(record) => record,
            None => {
                self.reply(thread_id, NO_SESSION_MSG).await;
                return;
            }
        };

        let worktree_path = PathBuf::from(&record.worktree_path);
        if !worktree_path.exists() {
            error!(
                "worktree path does not exist, thread_id={thread_id}, worktree_path={}",
                worktree_path.display()
            );
            self.reply(thread_id, "Worktree directory not found. Please start a new session.")
                .await;
            return;
        }

        // at most one listener per thread, whatever the trigger ordering
        self.listener_env().spawn_listener_if_absent(thread_id).await;
        self.registry.set_active(thread_id, true).await;

        let _ = self.chat.trigger_typing(thread_id).await;

        let text = format!("{content}{WORKTREE_BOUNDARY_NOTE}");
        if let Err(err) = self
            .agent
            .prompt(
                &record.session_id,
                &worktree_path,
                record.model.clone().into(),
                text,
                None,
            )
            .await
        {
            error!("failed to send prompt, thread_id={thread_id}, error={err}");
            self.reply(thread_id, "Failed to send message to the agent.")
                .await;
        }
    }

    /// `commit` — summarize the session, then stage/commit/push the
    /// worktree. The commit record transitions pending → terminal and is
    /// persisted at every exit so history is never lost.
    pub async fn handle_commit(&self, thread_id: &str) {
        let record = match self.registry.lazy_load(thread_id).await {
            Some(record) => record,
            None => {
                self.reply(thread_id, NO_SESSION_MSG).await;
                return;
            }
        };

        let worktree_path = PathBuf::from(&record.worktree_path);
        if !worktree_path.exists() {
            error!(
                "worktree directory does not exist, thread_id={thread_id}, worktree_path={}",
                worktree_path.display()
            );
            self.reply(thread_id, "Worktree directory not found. Please start a new session.")
                .await;
            return;
        }

        // ask the agent for a summary; mutating tools are disabled so
        // drafting the message cannot touch the checkout
        let tool_overrides =
            HashMap::from([("write".to_string(), false), ("edit".to_string(), false)]);
        let summary = match self
            .agent
            .prompt(
                &record.session_id,
                &worktree_path,
                record.model.clone().into(),
                self.config.summarizer_instruction(),
                Some(tool_overrides),
            )
            .await
        {
            Ok(response) => extract_summary(&response),
            Err(err) => {
                error!("failed to generate summary, thread_id={thread_id}, error={err}");
                self.reply(thread_id, "Failed to generate summary.").await;
                return;
            }
        };
        debug!("commit summary prepared, thread_id={thread_id}, summary={summary}");

        let _ = self
            .registry
            .update(thread_id, |record| record.push_pending_commit(&summary))
            .await;

        let status = match self.git.status(&worktree_path).await {
            Ok(status) => status,
            Err(err) => {
                self.fail_commit(thread_id, "status", &err, None).await;
                return;
            }
        };
        if status.is_clean {
            debug!("no changes detected in worktree, thread_id={thread_id}");
            let _ = self
                .registry
                .update(thread_id, |record| {
                    record.finish_tail_commit(CommitStatus::NoChanges, None)
                })
                .await;
            self.persist(thread_id).await;
            self.reply(thread_id, "No changes to commit.").await;
            return;
        }

        if let Err(err) = self.git.add_all(&worktree_path).await {
            self.fail_commit(thread_id, "add", &err, None).await;
            return;
        }

        if let Err(err) = self.git.commit(&worktree_path, &summary).await {
            self.fail_commit(thread_id, "commit", &err, None).await;
            return;
        }

        let hash = match self.git.head_hash(&worktree_path).await {
            Ok(hash) => hash,
            Err(err) => {
                warn!("failed to read commit hash, thread_id={thread_id}, error={err}");
                String::new()
            }
        };

        let branch = match self.git.current_branch(&worktree_path).await {
            Ok(branch) if !branch.is_empty() => branch,
            Ok(_) | Err(_) => "main".to_string(),
        };

        let push_output = match self.git.push(&worktree_path, &branch).await {
            Ok(output) => output,
            Err(err) => {
                // the local commit stands; record its hash with the failure
                self.fail_commit(thread_id, "push", &err, Some(&hash)).await;
                return;
            }
        };

        let _ = self
            .registry
            .update(thread_id, |record| {
                record.finish_tail_commit(CommitStatus::Success, Some(&hash))
            })
            .await;
        self.persist(thread_id).await;

        let mut message = format!(
            "**Commit & Push Successful**\n\n**Summary:** {summary}\n**Hash:** {hash}\n**Branch:** {branch}"
        );
        if let Ok(remote_url) = self.git.remote_url(&worktree_path).await {
            if let Some(link) = construct_pr_link(&remote_url, &branch) {
                message.push_str(&format!("\n\n**Pull Request:** {link}"));
            }
        }
        message.push_str(&format!(
            "\n\n**Git Push Output:**\n```\n{}\n```",
            push_output.trim()
        ));
        self.reply(thread_id, &message).await;
        info!("commit completed, thread_id={thread_id}, hash={hash}");
    }

    /// Mark the tail commit failed, persist, and report the failed
    /// operation with its output fenced.
    async fn fail_commit(
        &self,
        thread_id: &str,
        operation: &str,
        err: &GitError,
        hash: Option<&str>,
    ) {
        error!("git {operation} failed, thread_id={thread_id}, error={err}");
        let _ = self
            .registry
            .update(thread_id, |record| {
                record.finish_tail_commit(CommitStatus::Failed, hash)
            })
            .await;
        self.persist(thread_id).await;

        let mut message = match operation {
            "status" => "Failed to check git status.".to_string(),
            "add" => "Failed to stage changes.".to_string(),
            "commit" => "Failed to commit changes.".to_string(),
            "push" => "Failed to push changes.".to_string(),
            _ => format!("Git {operation} failed."),
        };
        if let GitError::CommandFailed { output, .. } = err {
            if !output.is_empty() {
                message.push_str(&format!("\n```\n{output}\n```"));
            }
        }
        self.reply(thread_id, &message).await;
    }

    async fn persist(&self, thread_id: &str) {
        if let Err(err) = self.registry.save(thread_id).await {
            error!("failed to save session data, thread_id={thread_id}, error={err:#}");
        }
    }

    /// `diff` — show the worktree diff, chunked under the message limit.
    pub async fn handle_diff(&self, thread_id: &str) {
        let record = match self.registry.lazy_load(thread_id).await {
            Some(record) => record,
            None => {
                self.reply(thread_id, NO_SESSION_MSG).await;
                return;
            }
        };

        let diff = match self.git.diff(Path::new(&record.worktree_path)).await {
            Ok(diff) => diff,
            Err(err) => {
                error!("failed to get diff, thread_id={thread_id}, error={err}");
                let mut message = "Failed to get diff.".to_string();
                if let GitError::CommandFailed { output, .. } = &err {
                    if !output.is_empty() {
                        message.push_str(&format!("\n```\n{output}\n```"));
                    }
                }
                self.reply(thread_id, &message).await;
                return;
            }
        };

        for chunk in chunk_fenced(&diff, "diff", MESSAGE_LIMIT) {
            self.reply(thread_id, &chunk).await;
        }
    }

    /// `cleanup` — stop the listener, remove the worktree, drop the session.
    pub async fn handle_cleanup(&self, thread_id: &str) {
        let record = match self.registry.lazy_load(thread_id).await {
            Some(record) => record,
            None => {
                self.reply(thread_id, NO_SESSION_MSG).await;
                return;
            }
        };

        // listener first, so nothing streams into a dying thread
        self.listeners.stop(thread_id).await;

        if let Err(err) = self
            .git
            .remove_worktree(
                Path::new(&record.repository_path),
                Path::new(&record.worktree_path),
            )
            .await
        {
            error!("failed to remove worktree, thread_id={thread_id}, error={err}");
            self.reply(thread_id, "Failed to remove worktree.").await;
            return;
        }

        if let Err(err) = self.registry.cleanup(thread_id).await {
            error!("failed to clean up session, thread_id={thread_id}, error={err:#}");
            self.reply(thread_id, "Failed to clean up session.").await;
            return;
        }

        self.reply(thread_id, "Session cleaned up. This thread is no longer connected.")
            .await;
        info!("session cleaned up, thread_id={thread_id}");
    }
}

fn split_command(content: &str) -> (&str, &str) {
    let trimmed = content.trim();
    match trimmed.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (trimmed, ""),
    }
}

/// First non-empty text part of the summarizer response, clipped to
/// [`SUMMARY_MAX_CHARS`].
fn extract_summary(response: &codethread_protocol::PromptResponse) -> String {
    for part in &response.parts {
        if part.part_type == codethread_protocol::PartType::Text {
            if let Some(text) = part.text.as_deref() {
                if !text.is_empty() {
                    return text.chars().take(SUMMARY_MAX_CHARS).collect();
                }
            }
        }
    }
    "Changes made during session".to_string()
}

/// Worktree path as shown to users: relative to the state dir when
/// possible.
fn display_worktree(worktree_path: &Path, state_dir: &str) -> String {
    worktree_path
        .strip_prefix(state_dir)
        .unwrap_or(worktree_path)
        .display()
        .to_string()
}

fn id_tail(id: &str) -> String {
    let chars: Vec<char> = id.chars().collect();
    let start = chars.len().saturating_sub(8);
    chars[start..].iter().collect()
}

/// Build a compare/merge-request link for github/gitlab remotes, in both
/// https and ssh forms. Unknown hosts yield no link.
pub fn construct_pr_link(remote_url: &str, branch: &str) -> Option<String> {
    let remote_url = remote_url.trim().trim_end_matches(".git");

    let (host, repo_path) = if let Some(rest) = remote_url.strip_prefix("https://") {
        rest.split_once('/')?
    } else if let Some(rest) = remote_url.strip_prefix("git@") {
        rest.split_once(':')?
    } else {
        return None;
    };

    match host {
        "github.com" => Some(format!(
            "https://github.com/{repo_path}/compare/{branch}?expand=1"
        )),
        "gitlab.com" => Some(format!(
            "https://gitlab.com/{repo_path}/-/merge_requests/new?merge_request[source_branch]={branch}"
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codethread_protocol::{MessagePart, PartType, PromptResponse};

    fn text_part(text: &str) -> MessagePart {
        MessagePart {
            id: String::new(),
            message_id: String::new(),
            session_id: String::new(),
            part_type: PartType::Text,
            text: Some(text.to_string()),
            tool: None,
            call_id: None,
            state: None,
            time: None,
            tokens: None,
            cost: None,
        }
    }

    #[test]
    fn pr_link_for_github_https_and_ssh() {
        assert_eq!(
            construct_pr_link("https://github.com/acme/widgets.git", "codethread/1").unwrap(),
            "https://github.com/acme/widgets/compare/codethread/1?expand=1"
        );
        assert_eq!(
            construct_pr_link("git@github.com:acme/widgets.git", "fix").unwrap(),
            "https://github.com/acme/widgets/compare/fix?expand=1"
        );
    }

    #[test]
    fn pr_link_for_gitlab_and_unknown_hosts() {
        assert_eq!(
            construct_pr_link("https://gitlab.com/acme/widgets", "fix").unwrap(),
            "https://gitlab.com/acme/widgets/-/merge_requests/new?merge_request[source_branch]=fix"
        );
        assert!(construct_pr_link("https://example.org/acme/widgets", "fix").is_none());
        assert!(construct_pr_link("/srv/git/widgets", "fix").is_none());
    }

    #[test]
    fn summary_takes_first_text_part_and_clips() {
        let mut response = PromptResponse::default();
        let mut step = text_part("");
        step.part_type = PartType::StepStart;
        response.parts.push(step);
        response.parts.push(text_part(&"x".repeat(80)));
        response.parts.push(text_part("second"));

        let summary = extract_summary(&response);
        assert_eq!(summary.chars().count(), SUMMARY_MAX_CHARS);
    }

    #[test]
    fn summary_falls_back_when_no_text_parts() {
        let response = PromptResponse::default();
        assert_eq!(extract_summary(&response), "Changes made during session");
    }

    #[test]
    fn split_command_separates_word_and_args() {
        assert_eq!(split_command("start repo model"), ("start", "repo model"));
        assert_eq!(split_command("commit"), ("commit", ""));
        assert_eq!(split_command("  "), ("", ""));
    }

    #[test]
    fn id_tail_keeps_last_eight_chars() {
        assert_eq!(id_tail("ses_0123456789"), "23456789");
        assert_eq!(id_tail("short"), "short");
    }
}
