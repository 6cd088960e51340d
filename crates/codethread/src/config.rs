//! Configuration loading.
//!
//! Settings come from a TOML file (default `config.toml`, overridable on the
//! command line) layered under `CODETHREAD_*` environment variables. Missing
//! settings fall back to defaults where a default is safe; the bot token has
//! none and is checked at startup.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

/// Default agent server port, matching `codethread serve`'s child process.
const DEFAULT_AGENT_PORT: u16 = 41999;

/// Instruction sent to the agent when drafting a commit message and the
/// operator did not configure one.
pub const DEFAULT_SUMMARIZER_INSTRUCTION: &str = "Generate a git commit message in conventional \
     commit format. The first line should be in the format 'type(scope): description'. Follow \
     with a bullet-point list of key changes made in the session. Keep the entire message \
     concise.";

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Discord bot token. Required to run `serve`.
    #[serde(default)]
    pub bot_token: String,

    /// Port the agent server listens on (and is spawned with).
    #[serde(default = "default_agent_port")]
    pub agent_port: u16,

    /// Binary used to launch the agent server.
    #[serde(default = "default_agent_command")]
    pub agent_command: String,

    /// Directory holding `.worktrees/` and `.sessions/`. Defaults to the
    /// working directory.
    #[serde(default = "default_state_dir")]
    pub state_dir: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Overrides [`DEFAULT_SUMMARIZER_INSTRUCTION`] when set.
    #[serde(default)]
    pub summarizer_instruction: Option<String>,

    /// How often the bot polls the chat surface for new messages, in
    /// milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub repositories: Vec<Repository>,

    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

/// A repository users may start sessions against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub path: String,
    pub name: String,
}

/// A selectable model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider_id: String,
    pub model_id: String,
}

impl ModelConfig {
    /// Display form users type and see: `provider/model`.
    pub fn display_name(&self) -> String {
        format!("{}/{}", self.provider_id, self.model_id)
    }
}

fn default_agent_port() -> u16 {
    DEFAULT_AGENT_PORT
}

fn default_agent_command() -> String {
    "opencode".to_string()
}

fn default_state_dir() -> String {
    ".".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

impl AppConfig {
    /// Load configuration from `path` (when given) or `./config.toml`,
    /// layered under `CODETHREAD_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        builder = match path {
            Some(explicit) => {
                let resolved = shellexpand::tilde(&explicit.to_string_lossy()).into_owned();
                builder.add_source(File::new(&resolved, FileFormat::Toml))
            }
            None => builder.add_source(File::new("config.toml", FileFormat::Toml).required(false)),
        };

        let settings = builder
            .add_source(Environment::with_prefix("CODETHREAD").separator("__"))
            .build()
            .context("building configuration")?;

        let mut config: AppConfig = settings
            .try_deserialize()
            .context("deserializing configuration")?;

        config.state_dir = shellexpand::tilde(&config.state_dir).into_owned();
        for repository in &mut config.repositories {
            repository.path = shellexpand::tilde(&repository.path).into_owned();
        }

        Ok(config)
    }

    /// Verify every configured repository exists and is a git repository.
    /// Configuration errors are fatal at startup.
    pub fn validate_repositories(&self) -> Result<()> {
        if self.repositories.is_empty() {
            bail!("no repositories configured");
        }
        for repository in &self.repositories {
            let path = Path::new(&repository.path);
            if !path.is_dir() {
                bail!("repository directory not found: {}", repository.path);
            }
            if !path.join(".git").exists() {
                bail!("not a git repository: {}", repository.path);
            }
        }
        Ok(())
    }

    pub fn repository_by_name(&self, name: &str) -> Option<&Repository> {
        self.repositories
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(name))
    }

    pub fn model_by_name(&self, name: &str) -> Option<&ModelConfig> {
        self.models
            .iter()
            .find(|m| m.display_name().eq_ignore_ascii_case(name))
    }

    pub fn summarizer_instruction(&self) -> &str {
        self.summarizer_instruction
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SUMMARIZER_INSTRUCTION)
    }

    pub fn agent_base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.agent_port)
    }

    pub fn worktrees_dir(&self) -> PathBuf {
        Path::new(&self.state_dir).join(".worktrees")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        Path::new(&self.state_dir).join(".sessions")
    }
}

/// Commented sample written by `codethread init`.
pub const SAMPLE_CONFIG: &str = r#"# codethread configuration

# Discord bot token (required).
bot_token = ""

# Agent server binary and the port `codethread serve` spawns it on.
agent_command = "opencode"
agent_port = 41999

# Directory holding .worktrees/ and .sessions/ state.
state_dir = "."

# debug | info | warn | error
log_level = "info"

# How often the bot polls Discord for new messages (milliseconds).
poll_interval_ms = 2000

# Instruction used when asking the agent to draft a commit message.
# Leave unset for the built-in default.
# summarizer_instruction = ""

[[repositories]]
path = "~/src/example"
name = "example"

[[models]]
provider_id = "anthropic"
model_id = "claude-sonnet-4"
"#;
