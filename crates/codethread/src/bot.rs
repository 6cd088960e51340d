//! Long-lived background tasks: agent server supervision and the chat poll
//! loop.
//!
//! `serve` runs both under one shutdown broadcast. The poll loop drains
//! every listener before returning, so no listener writes to chat or disk
//! after shutdown begins.

use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use tokio::process::Command;
use tokio::sync::broadcast;
use tokio::time::{Duration, interval};

use crate::commands::Relay;
use crate::config::AppConfig;

/// Launch and supervise the agent server child process. Runs until
/// shutdown, then kills the child and waits for it to exit.
pub async fn run_agent_server(
    config: AppConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let port = config.agent_port.to_string();
    let mut child = Command::new(&config.agent_command)
        .args(["serve", "-p", &port])
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .with_context(|| format!("starting agent server `{} serve -p {port}`", config.agent_command))?;

    info!("agent server started, port={port}");

    tokio::select! {
        _ = shutdown.recv() => {
            if let Err(err) = child.start_kill() {
                error!("failed to kill agent server: {err}");
            }
            let _ = child.wait().await;
            info!("agent server stopped");
        }
        status = child.wait() => {
            match status {
                Ok(status) => warn!("agent server exited unexpectedly, status={status}"),
                Err(err) => error!("failed to wait for agent server: {err}"),
            }
        }
    }
    Ok(())
}

/// Connect the chat adapter and poll for messages until shutdown.
///
/// On the way out every per-thread listener is cancelled and awaited, which
/// guarantees nothing touches chat or the session store afterwards.
pub async fn run_bot(relay: Arc<Relay>, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
    relay
        .chat
        .initialize()
        .await
        .context("connecting to the chat platform")?;
    info!("chat bot started, user_id={}", relay.chat.user_id());

    let mut poll = interval(Duration::from_millis(relay.config.poll_interval_ms));

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = poll.tick() => {
                let messages = match relay.chat.receive_messages().await {
                    Ok(messages) => messages,
                    Err(err) => {
                        warn!("failed to poll chat messages: {err}");
                        continue;
                    }
                };
                for message in messages {
                    debug!(
                        "dispatching message, channel_id={}, author_id={}",
                        message.channel_id, message.author_id
                    );
                    if let Err(err) = relay.dispatch(&message).await {
                        error!(
                            "failed to handle message, channel_id={}, error={err:#}",
                            message.channel_id
                        );
                    }
                }
            }
        }
    }

    relay.listeners.shutdown_all().await;
    info!("chat bot stopped");
    Ok(())
}
