//! Main entry point for the Opus Translator service

#![forbid(unsafe_code)]

use clap::Parser;
use dotenvy::dotenv;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use opus_translator::cli::commands::{self, Commands};
use opus_translator::ServiceConfig;

/// Opus Translator - Opus-MT translation over HTTP
#[derive(Parser, Debug)]
#[command(name = "opus-translator", version, about, long_about = None)]
struct Args {
    /// Configuration file (yaml, toml or json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("opus_translator={},tower_http={}", log_level, log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServiceConfig::load(args.config.as_deref())?;

    // Execute command
    match args.command.unwrap_or_else(commands::default_command) {
        Commands::Serve {
            host,
            port,
            no_signal_shutdown,
        } => {
            commands::handle_serve(config, host, port, no_signal_shutdown).await?;
        }
        Commands::Translate { lang, text } => {
            commands::handle_translate(config, lang, text).await?;
        }
        Commands::Download { lang } => {
            commands::handle_download(config, lang).await?;
        }
        Commands::Languages => {
            commands::handle_languages(&config);
        }
    }

    Ok(())
}
