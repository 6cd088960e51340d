//! Client for the agent server.

mod client;

pub use client::{AgentClient, AgentError};
