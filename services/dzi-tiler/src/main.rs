//! Deep Zoom tiler
//!
//! Builds `.dzi` pyramids from images or PDF pages and pastes overlays into
//! existing pyramids.

mod cli;
mod commands;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json);

    let config = cli::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Image(args) => commands::image(config, args).await,
        Commands::Pdf(args) => commands::pdf(config, args).await,
        Commands::Overlay(args) => commands::overlay(config, args).await,
        Commands::Info(args) => commands::info(config, args),
    }
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = fmt().with_env_filter(filter).with_target(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
