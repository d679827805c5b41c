//! agent-monitor - live dashboard backend for AI agent tool activity
//!
//! Receives tool-use hook events over HTTP, keeps a bounded in-memory
//! history, streams events to dashboard viewers, and serves token usage and
//! conversation views derived from the agent's transcript.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Config: $XDG_CONFIG_HOME/agent-monitor/config.toml (~/.config/agent-monitor/config.toml)
//! - Logs: $XDG_STATE_HOME/agent-monitor/ (~/.local/state/agent-monitor/)

use agent_monitor_core::config::PORT_ENV;
use agent_monitor_core::hooks::{self, HookChange};
use agent_monitor_core::{api, AppState, Config};
use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(name = "agent-monitor")]
#[command(about = "Live dashboard backend for AI agent tool activity")]
#[command(version)]
#[command(args_conflicts_with_subcommands = true)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Options for the default `serve` command
    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(Subcommand)]
enum Command {
    /// Run the monitor server (default)
    Serve(ServeArgs),

    /// Register the monitor's hooks in the agent settings file
    InstallHooks {
        /// Settings file to edit (default: ~/.claude/settings.json)
        #[arg(short, long)]
        settings: Option<PathBuf>,

        /// Port the hooks should post to (default: from config / PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[derive(ClapArgs, Clone, Default)]
struct ServeArgs {
    /// Port to listen on (overrides config and PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Interface to bind (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Mirror logs to stderr
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command.unwrap_or(Command::Serve(args.serve)) {
        Command::Serve(serve_args) => cmd_serve(serve_args).await,
        Command::InstallHooks { settings, port } => cmd_install_hooks(settings, port),
    }
}

/// File config with the port settled as `--port`, then `PORT`, then file.
fn load_config(cli_port: Option<u16>) -> Result<Config> {
    let mut config = Config::load_file().context("failed to load configuration")?;
    config
        .resolve_port(cli_port, std::env::var(PORT_ENV).ok().as_deref())
        .context("failed to load configuration")?;
    Ok(config)
}

async fn cmd_serve(args: ServeArgs) -> Result<()> {
    let mut config = load_config(args.port)?;
    if let Some(host) = args.host {
        config.server.host = host;
    }

    let _log_guard = agent_monitor_core::logging::init(&config.logging, args.verbose)
        .context("failed to initialize logging")?;

    let config_path = Config::config_path();
    if config_path.exists() {
        tracing::info!(path = %config_path.display(), "Loaded config file");
    } else {
        tracing::info!(path = %config_path.display(), "No config file found, using defaults");
    }

    let bind_addr = config.server.bind_addr();
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    let port = listener
        .local_addr()
        .context("failed to read listener address")?
        .port();

    println!();
    println!("  Agent Monitor");
    println!();
    println!("  Dashboard:  http://localhost:{port}");
    println!("  Hook URL:   http://localhost:{port}/event");
    println!(
        "  Logs:       {}",
        agent_monitor_core::logging::log_file_path().display()
    );
    println!();
    println!("  Press Ctrl-C to stop.");

    // Open streams never finish on their own, so shutdown drops the server
    // instead of draining it.
    tokio::select! {
        result = api::serve(listener, AppState::new()) => {
            result.context("server failed")?;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl-C")?;
            tracing::info!("Shutting down");
            println!();
            println!("  Stopped.");
        }
    }

    Ok(())
}

fn cmd_install_hooks(settings: Option<PathBuf>, port: Option<u16>) -> Result<()> {
    let config = load_config(port)?;
    let settings_path = settings.unwrap_or_else(hooks::default_settings_path);
    let port = config.server.port;

    println!();
    println!("  Agent Monitor - Hook Setup");
    println!();
    println!("  Settings file: {}", settings_path.display());
    println!("  Hook target:   http://localhost:{port}/event");
    println!();

    let report = hooks::install_hooks(&settings_path, port)
        .with_context(|| format!("failed to install hooks in {}", settings_path.display()))?;

    if report.replaced_invalid {
        println!("  Warning: could not parse existing settings file, created a new one");
    } else if report.existing {
        println!("  Found existing settings file");
    } else {
        println!("  Created new settings file");
    }

    for (hook_type, change) in &report.changes {
        match change {
            HookChange::Added => println!("  {hook_type} hook added"),
            HookChange::Updated => println!("  {hook_type} hook already configured, updated"),
        }
    }

    println!();
    println!("  Hooks configured successfully!");
    println!();
    println!("  Next steps:");
    println!("    1. Run:  agent-monitor");
    println!("    2. Open: http://localhost:{port}");
    println!("    3. Use your agent normally - events appear live!");
    println!();

    Ok(())
}
