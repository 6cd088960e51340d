//! Git operations, shelled out to the `git` binary.
//!
//! Commits are authored by a fixed bot identity with hooks bypassed, and a
//! push is always preceded by deferring to remote state when the remote
//! branch already exists. Failures carry the operation name and the
//! combined command output so they can be shown to the user verbatim.

use std::path::Path;

use log::{debug, warn};
use thiserror::Error;
use tokio::process::Command;

/// Fixed author identity for session commits.
const BOT_AUTHOR_NAME: &str = "Codethread Bot";
const BOT_AUTHOR_EMAIL: &str = "bot@codethread.dev";

/// Result type for git operations.
pub type GitResult<T> = Result<T, GitError>;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("invalid branch name: {0:?}")]
    InvalidBranch(String),

    /// The git command ran and exited nonzero. `output` is the combined
    /// stdout/stderr, suitable for a fenced chat block.
    #[error("git {operation} failed: {output}")]
    CommandFailed { operation: String, output: String },

    #[error("failed to run git {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },
}

/// Status summary of a worktree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeStatus {
    /// True when `status --porcelain` printed nothing.
    pub is_clean: bool,
    /// Raw porcelain output.
    pub raw: String,
}

/// Wrapper around git sub-processes.
#[derive(Debug, Clone, Default)]
pub struct GitOps;

impl GitOps {
    pub fn new() -> Self {
        Self
    }

    async fn run(&self, dir: &Path, operation: &str, args: &[&str]) -> GitResult<String> {
        debug!("git {operation}, dir={}, args={args:?}", dir.display());
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .await
            .map_err(|source| GitError::Io {
                operation: operation.to_string(),
                source,
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let combined = combined.trim().to_string();

        if !output.status.success() {
            return Err(GitError::CommandFailed {
                operation: operation.to_string(),
                output: combined,
            });
        }
        Ok(combined)
    }

    /// Create a worktree on a fresh branch.
    pub async fn create_worktree(
        &self,
        repo_path: &Path,
        worktree_path: &Path,
        branch: &str,
    ) -> GitResult<()> {
        validate_branch_name(branch)?;
        if let Some(parent) = worktree_path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| GitError::Io {
                operation: "worktree add".to_string(),
                source,
            })?;
        }
        self.run(
            repo_path,
            "worktree add",
            &[
                "worktree",
                "add",
                "-b",
                branch,
                &worktree_path.to_string_lossy(),
            ],
        )
        .await?;
        Ok(())
    }

    /// Remove a worktree. A path that no longer exists is not an error.
    pub async fn remove_worktree(&self, repo_path: &Path, worktree_path: &Path) -> GitResult<()> {
        if !worktree_path.exists() {
            debug!(
                "worktree already gone, worktree_path={}",
                worktree_path.display()
            );
            return Ok(());
        }
        self.run(
            repo_path,
            "worktree remove",
            &[
                "worktree",
                "remove",
                "--force",
                &worktree_path.to_string_lossy(),
            ],
        )
        .await?;
        // drop any stale administrative entries
        if let Err(err) = self.run(repo_path, "worktree prune", &["worktree", "prune"]).await {
            warn!("git worktree prune failed: {err}");
        }
        Ok(())
    }

    pub async fn status(&self, worktree_path: &Path) -> GitResult<WorktreeStatus> {
        let raw = self
            .run(worktree_path, "status", &["status", "--porcelain"])
            .await?;
        Ok(WorktreeStatus {
            is_clean: raw.is_empty(),
            raw,
        })
    }

    pub async fn add_all(&self, worktree_path: &Path) -> GitResult<()> {
        self.run(worktree_path, "add", &["add", "."]).await?;
        Ok(())
    }

    /// Commit staged changes as the bot identity, bypassing hooks.
    pub async fn commit(&self, worktree_path: &Path, message: &str) -> GitResult<()> {
        self.run(
            worktree_path,
            "commit",
            &[
                "-c",
                &format!("user.name={BOT_AUTHOR_NAME}"),
                "-c",
                &format!("user.email={BOT_AUTHOR_EMAIL}"),
                "commit",
                "--no-verify",
                "-m",
                message,
            ],
        )
        .await?;
        Ok(())
    }

    pub async fn head_hash(&self, worktree_path: &Path) -> GitResult<String> {
        self.run(worktree_path, "rev-parse", &["rev-parse", "HEAD"])
            .await
    }

    pub async fn current_branch(&self, worktree_path: &Path) -> GitResult<String> {
        self.run(
            worktree_path,
            "branch --show-current",
            &["branch", "--show-current"],
        )
        .await
    }

    /// Push `branch` to origin, deferring to remote state first: after a
    /// fetch, if the remote branch has work the local branch does not (it
    /// advanced underneath us), the worktree is hard-reset to the remote
    /// tip before the push — remote always wins a divergence. Fresh session
    /// branches have no remote counterpart and strictly-ahead branches
    /// contain the remote tip already, so in both cases the local commits
    /// go up as-is.
    ///
    /// Returns the push output for the success message.
    pub async fn push(&self, worktree_path: &Path, branch: &str) -> GitResult<String> {
        if let Err(err) = self
            .run(worktree_path, "fetch", &["fetch", "origin", branch])
            .await
        {
            debug!("fetch of origin/{branch} failed (likely a new branch): {err}");
        } else {
            let remote_ref = format!("origin/{branch}");
            let remote_is_ancestor = self
                .run(
                    worktree_path,
                    "merge-base",
                    &["merge-base", "--is-ancestor", &remote_ref, "HEAD"],
                )
                .await
                .is_ok();
            if !remote_is_ancestor {
                self.run(worktree_path, "reset", &["reset", "--hard", &remote_ref])
                    .await?;
            }
        }

        self.run(worktree_path, "push", &["push", "origin", branch])
            .await
    }

    /// Diff of added/copied/modified/renamed files, whitespace-insensitive.
    pub async fn diff(&self, worktree_path: &Path) -> GitResult<String> {
        let output = self
            .run(
                worktree_path,
                "diff",
                &["diff", "--minimal", "--ignore-all-space", "--diff-filter=ACMR"],
            )
            .await?;
        if output.is_empty() {
            return Ok("No changes to show.".to_string());
        }
        Ok(output)
    }

    pub async fn remote_url(&self, worktree_path: &Path) -> GitResult<String> {
        self.run(
            worktree_path,
            "remote get-url",
            &["remote", "get-url", "origin"],
        )
        .await
    }
}

/// Reject branch names git would refuse, before shelling out.
pub fn validate_branch_name(branch: &str) -> GitResult<()> {
    let invalid = branch.is_empty()
        || branch.contains(char::is_whitespace)
        || branch.contains("..")
        || branch.contains("@{")
        || branch.starts_with('-')
        || branch.ends_with('.')
        || branch.ends_with('/')
        || branch.ends_with(".lock")
        || branch
            .chars()
            .any(|c| matches!(c, '~' | '^' | ':' | '?' | '*' | '[' | '\\') || c.is_control());
    if invalid {
        if branch.is_empty() {
            return Err(GitError::InvalidBranch("branch name cannot be empty".to_string()));
        }
        return Err(GitError::InvalidBranch(branch.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_reasonable_branch_names() {
        for branch in ["main", "feature/test-branch", "feature123", "threads/12345"] {
            assert!(validate_branch_name(branch).is_ok(), "rejected {branch:?}");
        }
    }

    #[test]
    fn rejects_names_git_would_refuse() {
        for branch in [
            "",
            "invalid branch",
            "invalid..branch",
            "-invalid",
            "invalid.",
            "invalid~branch",
            "invalid^branch",
            "invalid:branch",
            "invalid?",
            "invalid*",
            "invalid[",
            "invalid\\branch",
            "invalid/",
            "invalid@{branch",
            "invalid.lock",
        ] {
            assert!(validate_branch_name(branch).is_err(), "accepted {branch:?}");
        }
    }
}
