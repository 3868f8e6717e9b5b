//! # Cardwatch
//!
//! Watches an identity card reader and logs the card session as the reader
//! comes and goes, cards are inserted and read, and PIN changes run.
//!
//! ## Overview
//!
//! The binary drives a simulated reader through a configurable script:
//! - Attach the reader after a delay
//! - Insert a card (the built-in sample, or one loaded with `--card`)
//! - Optionally request a PIN change once the card has been read
//! - Remove the card after a delay
//!
//! ## Architecture
//!
//! This is Layer 2 - the binary that ties together:
//! - cardwatch-core: Card records, session status, configuration
//! - cardwatch-session: The card session loop and the simulated reader

use std::sync::Arc;

use anyhow::Context;
use cardwatch::{log_transitions, run_script, Args};
use cardwatch_core::CardwatchConfig;
use cardwatch_session::{CardContents, CardSession, SimulatedCard};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = Args::from_env()?;

    let config = match &args.config {
        Some(path) => CardwatchConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => CardwatchConfig::default(),
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .init();

    tracing::info!("Cardwatch v{} starting...", env!("CARGO_PKG_VERSION"));

    let contents = match &args.card {
        Some(path) => CardContents::from_file(path)
            .with_context(|| format!("loading card contents from {}", path.display()))?,
        None => CardContents::sample(),
    };

    let card = Arc::new(SimulatedCard::with_poll_interval(
        config.simulation.poll_interval(),
    ));
    let session = CardSession::with_config(card.clone(), config.session.to_session_config());
    log_transitions(&session);

    session.start()?;
    tracing::info!("Card session running");

    tokio::select! {
        result = run_script(&card, &session, &config.simulation, contents) => {
            result?;
            tracing::info!("Script finished");
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("Interrupted");
        }
    }

    session.stop();
    let worker = session.clone();
    tokio::task::spawn_blocking(move || worker.join()).await?;

    tracing::info!("Cardwatch shutting down");

    Ok(())
}
