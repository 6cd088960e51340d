//! Codethread pairs chat threads with sessions on a remote coding agent.
//!
//! A user mentions the bot to start a session against a configured
//! repository; the bot provisions a git worktree on a fresh branch, creates
//! an agent session scoped to it, and opens a chat thread. Prompts in the
//! thread go to the agent; the agent's incremental output streams back as a
//! single in-place-edited status message; a `commit` command turns the
//! worktree's changes into a git commit and push.

pub mod agent;
pub mod bot;
pub mod chat;
pub mod commands;
pub mod config;
pub mod git;
pub mod listener;
pub mod messaging;
pub mod session;
pub mod wordlist;
