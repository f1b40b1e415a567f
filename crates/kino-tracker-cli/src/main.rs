//! Kino Tracker CLI - Headless Telemetry Replay
//!
//! Features:
//! - Replay a scripted player session and print the canonical event stream
//! - Probe which ad provider a source and capability set would get

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod output;

/// Kino Tracker CLI - Playback and ad telemetry toolkit
#[derive(Parser)]
#[command(name = "kino-tracker-cli")]
#[command(author = "Purple Squirrel Media")]
#[command(version)]
#[command(about = "Replay and inspect playback and ad telemetry", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a scripted session and print the canonical events
    Replay {
        /// Path to the replay script (JSON)
        script: PathBuf,

        /// Tracker configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Show which ad provider would serve a source
    Probe {
        /// Media source URL
        url: String,

        /// Generic ads plugin is loaded
        #[arg(long)]
        ads_plugin: bool,

        /// Interactive ad SDK is loaded
        #[arg(long)]
        ima_sdk: bool,

        /// IMA3 plugin is loaded
        #[arg(long)]
        ima3: bool,

        /// FreeWheel plugin is loaded
        #[arg(long)]
        freewheel: bool,

        /// Tracker configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.verbose { "debug" } else { "info" };
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(level)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(level)
            .with_writer(std::io::stderr)
            .init();
    }
    kino_tracker::init();

    match cli.command {
        Commands::Replay { script, config } => {
            commands::replay(&script, config.as_deref(), &cli.format).await?;
        }
        Commands::Probe {
            url,
            ads_plugin,
            ima_sdk,
            ima3,
            freewheel,
            config,
        } => {
            let capabilities = kino_tracker::PlayerCapabilities {
                ads_plugin,
                ima_sdk,
                ima3_plugin: ima3,
                freewheel_plugin: freewheel,
                stream_plugin: false,
            };
            commands::probe(&url, capabilities, config.as_deref(), &cli.format)?;
        }
    }

    Ok(())
}
