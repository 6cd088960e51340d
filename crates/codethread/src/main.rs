use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use log::{LevelFilter, info};
use tokio::signal;
use tokio::sync::broadcast;

use codethread::agent::AgentClient;
use codethread::bot::{run_agent_server, run_bot};
use codethread::chat::{ChatApi, DiscordChat};
use codethread::commands::Relay;
use codethread::config::{AppConfig, SAMPLE_CONFIG};
use codethread::git::GitOps;
use codethread::listener::ListenerSet;
use codethread::messaging::MessageComposer;
use codethread::session::{SessionRegistry, SessionStore};

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let config = AppConfig::load(cli.common.config.as_deref())?;
            init_logging(&cli.common, &config);
            async_serve(config)
        }
        Command::Init { force } => handle_init(force),
        Command::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "codethread",
                &mut io::stdout(),
            );
            Ok(())
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Codethread - chat-driven relay for a remote coding agent.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Enable debug logging (equivalent to -vv)
    #[arg(long, global = true)]
    debug: bool,
    /// Enable trace logging (overrides other levels)
    #[arg(long, global = true)]
    trace: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the relay (default)
    Serve,
    /// Write a sample config.toml
    Init {
        /// Overwrite an existing config.toml
        #[arg(long)]
        force: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn init_logging(common: &CommonOpts, config: &AppConfig) {
    let level = if common.trace {
        LevelFilter::Trace
    } else if common.debug || common.verbose >= 2 {
        LevelFilter::Debug
    } else if common.verbose == 1 {
        LevelFilter::Info
    } else if common.quiet {
        LevelFilter::Error
    } else {
        match config.log_level.as_str() {
            "trace" => LevelFilter::Trace,
            "debug" => LevelFilter::Debug,
            "warn" => LevelFilter::Warn,
            "error" => LevelFilter::Error,
            _ => LevelFilter::Info,
        }
    };

    let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
    builder.filter_level(level);
    builder.try_init().ok();
}

fn handle_init(force: bool) -> Result<()> {
    let path = PathBuf::from("config.toml");
    if path.exists() && !force {
        bail!("config.toml already exists (use --force to overwrite)");
    }
    std::fs::write(&path, SAMPLE_CONFIG).context("writing config.toml")?;
    println!("wrote {}", path.display());
    Ok(())
}

#[tokio::main]
async fn async_serve(config: AppConfig) -> Result<()> {
    if config.bot_token.is_empty() {
        bail!("bot_token is not set in the configuration");
    }
    config.validate_repositories()?;

    std::fs::create_dir_all(config.worktrees_dir()).context("creating worktrees directory")?;
    std::fs::create_dir_all(config.sessions_dir()).context("creating sessions directory")?;

    let agent = Arc::new(AgentClient::new(config.agent_base_url())?);
    let store = SessionStore::new(config.sessions_dir());
    let registry = Arc::new(SessionRegistry::new(store, agent.clone()));
    let chat: Arc<dyn ChatApi> = Arc::new(DiscordChat::new(config.bot_token.clone()));
    let composer = Arc::new(MessageComposer::new(registry.clone(), chat.clone()));
    let listeners = Arc::new(ListenerSet::new());

    let relay = Arc::new(Relay {
        config: config.clone(),
        chat,
        registry,
        composer,
        agent,
        git: GitOps::new(),
        listeners,
    });

    let (shutdown_tx, _) = broadcast::channel(1);

    #[cfg(unix)]
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("installing SIGTERM handler")?;

    let agent_task = tokio::spawn(run_agent_server(config, shutdown_tx.subscribe()));
    let bot_task = tokio::spawn(run_bot(relay, shutdown_tx.subscribe()));

    #[cfg(unix)]
    tokio::select! {
        _ = signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
    }
    info!("shutdown signal received");
    let _ = shutdown_tx.send(());

    for task in [agent_task, bot_task] {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => log::error!("task failed: {err:#}"),
            Err(err) => log::error!("task panicked: {err}"),
        }
    }

    info!("exited");
    Ok(())
}
