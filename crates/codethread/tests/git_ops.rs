//! Git operation tests against real repositories. Skipped when the git
//! binary is unavailable.

mod common;

use codethread::git::GitOps;

use common::{git_available, init_repo, run_git};

#[tokio::test]
async fn worktree_add_and_remove() {
    if !git_available() {
        eprintln!("skipping: git not available");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().join("repo");
    std::fs::create_dir_all(&repo).unwrap();
    init_repo(&repo);

    let git = GitOps::new();
    let worktree = dir.path().join("worktrees/t1");

    git.create_worktree(&repo, &worktree, "codethread/t1")
        .await
        .unwrap();
    assert!(worktree.join("README.md").exists());

    let branch = git.current_branch(&worktree).await.unwrap();
    assert_eq!(branch, "codethread/t1");

    git.remove_worktree(&repo, &worktree).await.unwrap();
    assert!(!worktree.exists());
    // removing again is fine
    git.remove_worktree(&repo, &worktree).await.unwrap();
}

#[tokio::test]
async fn create_worktree_rejects_bad_branch_names() {
    let git = GitOps::new();
    let dir = tempfile::tempdir().unwrap();
    let err = git
        .create_worktree(dir.path(), &dir.path().join("wt"), "bad name")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("invalid branch name"));
}

#[tokio::test]
async fn status_reflects_worktree_changes() {
    if !git_available() {
        eprintln!("skipping: git not available");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());

    let git = GitOps::new();
    assert!(git.status(dir.path()).await.unwrap().is_clean);

    std::fs::write(dir.path().join("new.txt"), "hello\n").unwrap();
    let status = git.status(dir.path()).await.unwrap();
    assert!(!status.is_clean);
    assert!(status.raw.contains("new.txt"));
}

#[tokio::test]
async fn add_commit_and_hash() {
    if !git_available() {
        eprintln!("skipping: git not available");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    let before = GitOps::new().head_hash(dir.path()).await.unwrap();

    std::fs::write(dir.path().join("feature.txt"), "work\n").unwrap();
    let git = GitOps::new();
    git.add_all(dir.path()).await.unwrap();
    git.commit(dir.path(), "feat: add feature").await.unwrap();

    let after = git.head_hash(dir.path()).await.unwrap();
    assert_ne!(before, after);
    assert_eq!(after.len(), 40);

    // commits carry the fixed bot identity
    let output = std::process::Command::new("git")
        .args(["log", "-1", "--format=%an <%ae>"])
        .current_dir(dir.path())
        .output()
        .unwrap();
    let author = String::from_utf8_lossy(&output.stdout);
    assert_eq!(author.trim(), "Codethread Bot <bot@codethread.dev>");
}

#[tokio::test]
async fn diff_filters_and_reports_no_changes() {
    if !git_available() {
        eprintln!("skipping: git not available");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());

    let git = GitOps::new();
    assert_eq!(git.diff(dir.path()).await.unwrap(), "No changes to show.");

    std::fs::write(dir.path().join("README.md"), "# test repo\nmore\n").unwrap();
    let diff = git.diff(dir.path()).await.unwrap();
    assert!(diff.contains("+more"));
}

#[tokio::test]
async fn push_defers_to_remote_state() {
    if !git_available() {
        eprintln!("skipping: git not available");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let origin = dir.path().join("origin.git");
    std::fs::create_dir_all(&origin).unwrap();
    run_git(&origin, &["init", "--bare", "-b", "main"]);

    let clone = dir.path().join("clone");
    run_git(dir.path(), &["clone", "origin.git", "clone"]);
    run_git(&clone, &["config", "user.name", "Test User"]);
    run_git(&clone, &["config", "user.email", "test@example.com"]);
    std::fs::write(clone.join("README.md"), "# repo\n").unwrap();
    run_git(&clone, &["add", "."]);
    run_git(&clone, &["commit", "-m", "initial commit"]);
    run_git(&clone, &["push", "origin", "main"]);

    let git = GitOps::new();
    std::fs::write(clone.join("work.txt"), "work\n").unwrap();
    git.add_all(&clone).await.unwrap();
    git.commit(&clone, "feat: work").await.unwrap();
    let local = git.head_hash(&clone).await.unwrap();

    // remote has not advanced: the local commit survives and is pushed
    git.push(&clone, "main").await.unwrap();
    assert_eq!(git.head_hash(&clone).await.unwrap(), local);

    // second clone advances the remote underneath the first
    let other = dir.path().join("other");
    run_git(dir.path(), &["clone", "origin.git", "other"]);
    run_git(&other, &["config", "user.name", "Test User"]);
    run_git(&other, &["config", "user.email", "test@example.com"]);
    std::fs::write(other.join("upstream.txt"), "upstream\n").unwrap();
    run_git(&other, &["add", "."]);
    run_git(&other, &["commit", "-m", "upstream work"]);
    run_git(&other, &["push", "origin", "main"]);

    // diverge locally; on push, remote state wins
    std::fs::write(clone.join("local.txt"), "local\n").unwrap();
    git.add_all(&clone).await.unwrap();
    git.commit(&clone, "feat: local").await.unwrap();
    let diverged = git.head_hash(&clone).await.unwrap();

    git.push(&clone, "main").await.unwrap();
    let after = git.head_hash(&clone).await.unwrap();
    assert_ne!(after, diverged, "remote state won the divergence");
    assert!(clone.join("upstream.txt").exists());
}
