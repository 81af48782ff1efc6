//! Parlor Client - terminal chat client
//!
//! Lines typed on stdin are sent to the room. `/image <path>` sends a file as
//! an image attachment, and `exit` leaves the chat.

use anyhow::{Context, Result};
use clap::Parser;
use parlor::{ClientConfig, Connector, Event};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

/// Parlor Client - connect to a Parlor chat server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Your username in the chat
    #[arg(short, long)]
    name: String,

    /// Server host
    #[arg(long)]
    host: Option<String>,

    /// Server port
    #[arg(short, long)]
    port: Option<u16>,

    /// JSON config file; command line flags override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory received images are written to
    #[arg(long)]
    images: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("parlor_client={},parlor={}", log_level, log_level))
        .with_target(false)
        .init();

    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ClientConfig::default(),
    };
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(images) = args.images {
        config.attachment_dir = images;
    }

    let connector = Connector::new(config).context("Invalid client configuration")?;
    let (_subscription, mut events) = connector.events().subscribe_channel();

    let session = connector
        .connect_configured(&args.name)
        .await
        .context("Failed to connect to server")?;
    connector.spawn_receiver(Arc::clone(&session));
    info!("Joined as {}", args.name);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if print_event(event) {
                    break;
                }
            },
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    connector.disconnect(&session).await;
                    break;
                };
                if let Err(e) = handle_input(&connector, &session, line.trim()).await {
                    println!("Error: {:#}", e);
                }
            },
        }
    }

    Ok(())
}

async fn handle_input(connector: &Connector, session: &parlor::Session, line: &str) -> Result<()> {
    if line.is_empty() {
        return Ok(());
    }

    if let Some(path) = line.strip_prefix("/image ") {
        let path = Path::new(path.trim());
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .context("Image path has no file name")?;

        connector
            .send_attachment(session, filename, data)
            .await
            .context("Failed to send image")?;
        println!("You sent an image: {}", filename);
        return Ok(());
    }

    connector
        .send_text(session, line)
        .await
        .context("Failed to send message")?;
    Ok(())
}

/// Print an event; returns true once the session is over
fn print_event(event: Event) -> bool {
    if let Some(line) = event.display_text() {
        println!("{}", line);
    }
    matches!(event, Event::SessionEnded { .. })
}
