//! Polly TTS Proxy Server
//!
//! HTTP proxy for AWS Polly text-to-speech with per-client daily quotas.

use anyhow::Result;
use clap::Parser;
use polly_tts_common::tracing::init_tracing;
use polly_tts_common::{Config, HttpServerBuilder, ListenArgs};
use polly_tts_server::{AppState, provider, router, spawn_quota_sweeper};

/// Command-line arguments for the proxy server.
#[derive(Parser, Debug)]
#[command(name = "polly-tts-server")]
#[command(about = "Rate-limited HTTP proxy for AWS Polly text-to-speech")]
struct Args {
    /// Listen address
    #[command(flatten)]
    listen: ListenArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    tracing::info!("polly-tts-server starting...");

    // Load configuration first so `.env` can also supply HOST and PORT
    let config = Config::from_env()?;
    let args = Args::parse();
    let addr = args.listen.socket_addr()?;

    tracing::info!(
        provider = %config.provider,
        limit = config.max_requests,
        window_secs = config.window.as_secs(),
        timeout_secs = config.synthesis_timeout.as_secs(),
        trust_proxy_headers = config.trust_proxy_headers,
        "Configuration loaded"
    );

    let speech = provider::from_config(&config).await;
    let state = AppState::new(&config, speech);
    let sweeper = spawn_quota_sweeper(state.quota(), config.sweep_interval);

    HttpServerBuilder::new(router(state))
        .with_addr(addr)
        .run()
        .await?;

    sweeper.abort();
    tracing::info!("Server stopped");
    Ok(())
}
