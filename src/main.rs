//! # Vault assistant CLI (`vault`)
//!
//! ## Usage
//!
//! ```bash
//! vault --config ./config/vault.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `vault serve` | Start the HTTP API |
//! | `vault sync` | Rescan the vault and print the sync summary |
//! | `vault ask "<question>"` | Answer one question |
//! | `vault chat` | Interactive session on stdin |
//!
//! Without a config file, `--vault <dir>` runs with defaults for that
//! folder. Logging is controlled by `RUST_LOG` (default
//! `vault_assistant=info`).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

use vault_assistant::config::{load_config, Config};
use vault_assistant::models::DEFAULT_SESSION;
use vault_assistant::pipeline::Assistant;
use vault_assistant::server;

/// Ask questions of a folder of notes, answered only from what the notes say.
#[derive(Parser)]
#[command(name = "vault", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/vault.toml")]
    config: PathBuf,

    /// Vault folder. Overrides `[vault].root`; used with defaults when the
    /// config file does not exist.
    #[arg(long, global = true)]
    vault: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Rescan the vault and print the sync summary as JSON.
    Sync,

    /// Answer a single question.
    Ask {
        question: String,

        /// Session id for conversational context.
        #[arg(long, default_value = DEFAULT_SESSION)]
        session: String,

        /// Print the full response (metadata included) as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Read questions from stdin, one per line, within one session.
    Chat {
        #[arg(long, default_value = DEFAULT_SESSION)]
        session: String,
    },
}

fn resolve_config(cli: &Cli) -> Result<Config> {
    let mut cfg = match (&cli.vault, cli.config.exists()) {
        (Some(root), false) => Config::for_vault(root.clone()),
        _ => load_config(&cli.config)?,
    };
    if let Some(root) = &cli.vault {
        cfg.vault.root = root.clone();
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("vault_assistant=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = resolve_config(&cli)?;
    let assistant = Arc::new(Assistant::from_config(cfg)?);

    match cli.command {
        Commands::Serve => {
            server::run_server(assistant).await?;
        }
        Commands::Sync => {
            let info = assistant.sync().await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Commands::Ask {
            question,
            session,
            json,
        } => {
            let response = assistant.ask(&question, Some(&session)).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                println!("{}", response.answer);
            }
        }
        Commands::Chat { session } => {
            run_chat(&assistant, &session).await?;
        }
    }

    Ok(())
}

async fn run_chat(assistant: &Assistant, session: &str) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines
            .next_line()
            .await
            .context("Failed to read from stdin")?
        else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question, "exit" | "quit") {
            break;
        }

        let response = assistant.ask(question, Some(session)).await;
        stdout
            .write_all(format!("{}\n\n", response.answer).as_bytes())
            .await?;
    }
    Ok(())
}
