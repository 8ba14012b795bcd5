//! Basic remote control.
//!
//! Demonstrates:
//! - Building a client for a TV on the local network
//! - Pairing (first run shows a prompt on the TV) and token caching
//! - Key clicks, a long press and text entry
//! - Watching client events
//!
//! Usage:
//!   cargo run --example basic_remote -- 192.168.1.20
//!   cargo run --example basic_remote -- 192.168.1.20 --debug
//!   cargo run --example basic_remote -- 192.168.1.20 --forget

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use tizen_remote::{ClientEvent, Key, RemoteClient};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Types
// ============================================================================

/// Command-line arguments.
#[derive(Debug, Clone)]
struct Args {
    host: String,
    debug: bool,
    forget: bool,
}

impl Args {
    fn parse() -> Result<Self> {
        let args: Vec<String> = std::env::args().skip(1).collect();
        let host = args
            .iter()
            .find(|a| !a.starts_with("--"))
            .cloned()
            .context("usage: basic_remote <tv-host> [--debug] [--forget]")?;

        Ok(Self {
            host,
            debug: args.iter().any(|a| a == "--debug"),
            forget: args.iter().any(|a| a == "--forget"),
        })
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse()?;
    init_logging(args.debug);

    println!("=== Basic Remote ===\n");

    let client = RemoteClient::builder()
        .host(&args.host)
        .name("tizen-remote demo")
        .build()
        .context("invalid client configuration")?;

    if args.forget {
        client.unset_token().await?;
        println!("[Setup] Cached token removed\n");
    }

    let mut events = client.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ClientEvent::Token { .. } => println!("    [event] paired"),
                ClientEvent::Retry { attempt } => println!("    [event] retry {attempt}"),
                ClientEvent::Error { message } => println!("    [event] error: {message}"),
                ClientEvent::Sent { .. } => {}
                other => println!("    [event] {}", other.name()),
            }
        }
    });

    println!("[1] Connecting to {}...", args.host);
    println!("    Accept the prompt on the TV if one appears");
    client.connect().await.context("connect failed")?;
    println!("    ✓ Connected\n");

    println!("[2] Sending keys...");
    client.click(Key::Home).await?;
    tokio::time::sleep(Duration::from_secs(1)).await;
    client.click(Key::Right).await?;
    client.long_press(Key::VolumeUp, Duration::from_millis(600)).await?;
    println!("    ✓ Keys sent\n");

    println!("[3] Typing text...");
    client.text("hello from rust").await?;
    println!("    ✓ Text sent\n");

    println!("[4] Disconnecting...");
    client.disconnect().await?;
    println!("    ✓ Done");

    Ok(())
}

/// Initialize tracing/logging.
fn init_logging(debug: bool) {
    let filter = if debug {
        "tizen_remote=debug"
    } else {
        "tizen_remote=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}
