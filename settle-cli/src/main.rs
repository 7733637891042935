//! # settle CLI
//!
//! Reads line-delimited JSON messages on stdin, drives one runtime client,
//! and writes its replies to stdout. Logs go to stderr.

mod transport;

use anyhow::Context;
use clap::Parser;
use settle_runtime::{Config, JsonDocBuilder, JsonDocParser, RuntimeClient};
use settle_types::Inbound;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use transport::StdoutTransport;

#[derive(Parser)]
#[command(name = "settle")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Skip the view, editor and inspector databases
    #[arg(long)]
    no_ide: bool,

    /// Rounds a fixpoint may run before it counts as divergent
    #[arg(long)]
    max_rounds: Option<usize>,

    /// Block document to evaluate at start-up
    file: Option<PathBuf>,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => Config::default(),
        };
        if self.no_ide {
            config.with_ide = false;
        }
        if let Some(max_rounds) = self.max_rounds {
            config.max_rounds = max_rounds;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; stdout carries the protocol
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(if cli.verbose {
                tracing::Level::DEBUG.into()
            } else {
                tracing::Level::INFO.into()
            }),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = cli.load_config()?;
    let mut client = RuntimeClient::new(
        config,
        JsonDocParser,
        JsonDocBuilder,
        Arc::new(StdoutTransport),
    );

    if let Some(path) = &cli.file {
        let code = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        if let Err(err) = client.load(&code, "user") {
            tracing::error!(error = %err, file = %path.display(), "start-up evaluation failed");
        }
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!(error = %err, "stdin read failed");
                    break;
                }
            }
        }
    });

    // One message at a time; each runs to fixpoint before the next.
    while let Some(line) = rx.recv().await {
        if line.trim().is_empty() {
            continue;
        }
        client.handle_json(&line);
    }

    tracing::debug!("stdin closed");
    if client.evaluation().is_some() {
        client.handle_message(Inbound::Close);
    }
    Ok(())
}
