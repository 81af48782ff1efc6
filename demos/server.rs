//! Parlor Server - terminal front end for the chat server
//!
//! Prints every event the server reports. Lines typed on stdin are broadcast
//! as server messages; `/who` lists the connected clients and `/quit` stops
//! the server.

use anyhow::{Context, Result};
use clap::Parser;
use parlor::{EchoPolicy, Event, Listener, ServerConfig};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

/// Parlor Server - multi-user TCP chat server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Interface to bind
    #[arg(long)]
    bind: Option<String>,

    /// JSON config file; command line flags override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory received images are written to
    #[arg(long)]
    images: Option<PathBuf>,

    /// Echo each client's messages back to it
    #[arg(long)]
    echo: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("parlor_server={},parlor={}", log_level, log_level))
        .with_target(false)
        .init();

    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ServerConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(bind) = args.bind {
        config.bind_host = bind;
    }
    if let Some(images) = args.images {
        config.attachment_dir = images;
    }
    if args.echo {
        config.echo_policy = EchoPolicy::IncludeSender;
    }

    let listener = Listener::new(config).context("Invalid server configuration")?;
    listener.on_event(print_event);

    let addr = listener.start().await.context("Failed to start server")?;
    info!("Accepting clients on {}", addr);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                let line = line.trim();
                match line {
                    "" => {},
                    "/quit" => break,
                    "/who" => {
                        println!("Active clients: {}", listener.peer_count());
                        for peer in listener.peers() {
                            println!("  {}", peer.display());
                        }
                    },
                    body => {
                        listener.send_text(body).await;
                    },
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    listener.stop().await;
    Ok(())
}

fn print_event(event: Event) {
    match &event {
        Event::PeerListChanged { peers } => println!("Active clients: {}", peers.len()),
        _ => {
            if let Some(line) = event.display_text() {
                println!("{}", line);
            }
        },
    }
}
