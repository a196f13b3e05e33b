//! vizbridge -- drive a visualization host through its bridge.
//!
//! Usage:
//!   vizbridge ping                         # Handshake and liveness check
//!   vizbridge exec 'print x'               # Run code in the host
//!   vizbridge exec --file script.py        # Run code from a file
//!   vizbridge render --out view.png        # Save a rendered image
//!   vizbridge history                      # Show the audit trail
//!   vizbridge restore 3                    # Roll back to before entry 3

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use vizbridge_cli::config::CliConfig;
use vizbridge_cli::ops::{run_operation, Operation};
use vizbridge_cli::expand_tilde;
use vizbridge_client::{Dispatcher, Session};

#[derive(Parser)]
#[command(name = "vizbridge", about = "Caller for a vizbridge-enabled visualization host")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "~/.vizbridge/config.toml")]
    config: String,

    /// Override the bridge host
    #[arg(long)]
    host: Option<String>,

    /// Override the bridge port
    #[arg(long)]
    port: Option<u16>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, handshake and ping the bridge
    Ping,
    /// Execute code in the host's persistent environment
    Exec {
        /// Code to run
        code: Option<String>,
        /// Read the code from a file instead
        #[arg(long, conflicts_with = "code")]
        file: Option<PathBuf>,
    },
    /// Show a structured listing of the host state
    Inspect,
    /// Render the active view to an image file
    Render {
        #[arg(long, default_value_t = 1600)]
        width: u32,
        #[arg(long, default_value_t = 900)]
        height: u32,
        /// Output file
        #[arg(long)]
        out: PathBuf,
    },
    /// List the command history
    History,
    /// Restore the host state to just before a history entry
    Restore {
        /// History entry id
        entry_id: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the JSON results.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "vizbridge=info,vizbridge_cli=info,vizbridge_client=info".into());
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let config_path = expand_tilde(&cli.config);
    let mut cfg = CliConfig::load_or_default(&config_path)?;
    cfg.apply_env()?;
    if let Some(host) = cli.host {
        cfg.bridge.host = host;
    }
    if let Some(port) = cli.port {
        cfg.bridge.port = port;
    }

    let op = match cli.command {
        Commands::Ping => Operation::Ping,
        Commands::Exec { code, file } => {
            let code = match (code, file) {
                (Some(code), _) => code,
                (None, Some(file)) => std::fs::read_to_string(&file)?,
                (None, None) => anyhow::bail!("exec needs code or --file"),
            };
            Operation::Execute { code }
        }
        Commands::Inspect => Operation::Inspect,
        Commands::Render { width, height, out } => Operation::Render { width, height, out },
        Commands::History => Operation::History,
        Commands::Restore { entry_id } => Operation::Restore { entry_id },
    };

    let session = Arc::new(Session::new(cfg.session_config()?));
    let dispatcher = Dispatcher::new(session.clone());
    let outcome = run_operation(&dispatcher, op).await;
    session.disconnect().await;

    match outcome {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(failure) => {
            eprintln!("{}: {}", failure.code, failure.summary());
            std::process::exit(1);
        }
    }
}
