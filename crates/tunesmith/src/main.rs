//! # tunesmith
//! The tune server, plus local commands for listing models and composing a
//! single tune in the terminal.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use colored::*;
use futures::channel::mpsc;
use futures::StreamExt;
use std::io::{self, Write};
use std::path::PathBuf;
use tunesmith::config::{home_dir, NormalizerKind};
use tunesmith::{api, ServerConfig, TuneService, ViewerSession};
use tunesmith_core::protocol::{ServerMessage, SubmitRequest};
use tunesmith_repertoire::{HeaderKind, ModelRegistry};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding tunesmith.toml, models/ and tunes/
    #[arg(long, global = true)]
    home: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API and the websocket endpoint
    Serve {
        /// Listen address (overrides tunesmith.toml)
        #[arg(long)]
        addr: Option<String>,
        /// Keep tunes as generated instead of running abc2abc
        #[arg(long)]
        passthrough: bool,
    },
    /// List the available models
    Models,
    /// Compose one tune here and print it as it is generated
    Compose {
        #[arg(long, default_value = "thesession_with_repeats")]
        model: String,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[arg(long, default_value_t = 1.0)]
        temperature: f64,
        /// Meter header, e.g. M:6/8
        #[arg(long, default_value = "")]
        meter: String,
        /// Key header, e.g. K:Cdor
        #[arg(long, default_value = "")]
        key: String,
        /// Unit length header; drawn from the model when left out
        #[arg(long, default_value = "")]
        unit_length: String,
        #[arg(long)]
        passthrough: bool,
        /// Priming tokens the tune starts with
        tokens: Vec<String>,
    },
}

#[async_std::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let home = cli.home.unwrap_or_else(home_dir);
    let mut config = ServerConfig::load(&home)?;

    match cli.command {
        Commands::Serve { addr, passthrough } => {
            if let Some(addr) = addr {
                config.addr = addr;
            }
            if passthrough {
                config.normalizer.kind = NormalizerKind::Passthrough;
            }
            let service = TuneService::from_config(&config)?;
            println!("🎻 Serving tunes at {}", format!("http://{}", config.addr).cyan());
            println!("🔌 WebSocket endpoint at {}", format!("ws://{}/ws", config.addr).cyan());
            api::app(service).listen(config.addr.clone()).await?;
        }
        Commands::Models => {
            let registry = ModelRegistry::build(&config.models_dir);
            for model in registry.list() {
                println!("{} {}", model.id.cyan(), model.display_name);
                println!(
                    "    meters: {}",
                    model.header_tokens(HeaderKind::Meter).join(" ")
                );
                println!("    keys:   {}", model.header_tokens(HeaderKind::Key).join(" "));
            }
        }
        Commands::Compose {
            model,
            seed,
            temperature,
            meter,
            key,
            unit_length,
            passthrough,
            tokens,
        } => {
            if passthrough {
                config.normalizer.kind = NormalizerKind::Passthrough;
            }
            // Nobody else is watching; a stalled tune must end the command.
            config.announce_failures = true;
            let request = SubmitRequest {
                model,
                seed,
                temperature,
                priming_tokens: tokens,
                unit_length,
                meter,
                key,
            };
            compose(&config, request).await?;
        }
    }

    Ok(())
}

/// Runs one tune through the same session logic a browser gets, printing
/// deltas as they arrive.
async fn compose(config: &ServerConfig, request: SubmitRequest) -> Result<()> {
    let service = TuneService::from_config(config)?;
    let (mailbox, mut events) = mpsc::unbounded();
    let mut session = ViewerSession::new(ViewerSession::resolve_id(None), service, mailbox);

    let tune_id = match session.submit(&request) {
        ServerMessage::RequestCreated { tune_id } => tune_id,
        ServerMessage::Rejected { reason } => bail!("submission rejected: {}", reason),
        other => bail!("unexpected reply {:?}", other),
    };
    println!("🎼 Composing tune {} with {}", tune_id, request.model.cyan());

    let mut pending = session.subscribe(tune_id);
    loop {
        for message in pending.drain(..) {
            match message {
                ServerMessage::Started { tune } => {
                    print!("{}", tune.text);
                    io::stdout().flush()?;
                }
                ServerMessage::IncrementalUpdate { delta, .. } => {
                    print!("{}", delta);
                    io::stdout().flush()?;
                }
                ServerMessage::Finished { tune } => {
                    println!("\n\n✅ {}", "Finished".green());
                    println!("{}", tune.text);
                    return Ok(());
                }
                ServerMessage::Failed { reason, .. } => {
                    eprintln!("\n❌ {}", reason.red());
                    bail!("tune {} did not finish", tune_id);
                }
                _ => {}
            }
        }
        let Some(event) = events.next().await else {
            bail!("event stream for tune {} closed", tune_id);
        };
        pending.extend(session.on_event(event));
    }
}
