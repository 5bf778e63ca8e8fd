//! X-Touch volume controller
//!
//! Drive the system master volume from an X-Touch Mini slider, with a
//! tray icon, an on-screen indicator and global hotkeys.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use xtouch_volume::config::AppConfig;
use xtouch_volume::link::{MidirDriver, PortDriver};

/// X-Touch volume controller - system volume from a MIDI slider
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (defaults to the platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// List available MIDI input ports
    #[arg(long)]
    list_ports: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    init_logging(&args.log_level)?;

    if args.list_ports {
        list_ports_formatted();
        return Ok(());
    }

    info!("Starting X-Touch volume controller...");

    let config = AppConfig::load_or_default(args.config.as_deref()).await?;

    xtouch_volume::app::run(config).await
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

fn list_ports_formatted() {
    let ports = MidirDriver::new().list_ports();
    if ports.is_empty() {
        println!("No MIDI input ports found");
        return;
    }

    println!("Available MIDI input ports:");
    for (i, port) in ports.iter().enumerate() {
        println!("  [{}] {}", i, port);
    }
}
