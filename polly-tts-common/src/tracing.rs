//! Tracing initialization for the proxy.
//!
//! This module provides utilities for initializing the tracing subscriber
//! with environment-based filtering via the `RUST_LOG` environment variable.
//!
//! # Usage
//!
//! ```no_run
//! use polly_tts_common::tracing::init_tracing;
//!
//! fn main() {
//!     init_tracing();
//!     tracing::info!("Application started");
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Controls the log level and filtering. Examples:
//!   - `RUST_LOG=debug` - Enable debug logging for all modules
//!   - `RUST_LOG=polly_tts_server=debug` - Enable debug for the server crate
//!   - `RUST_LOG=warn,polly_tts_server::quota=trace` - Trace quota decisions only

use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    prelude::*,
    registry::Registry,
};

/// Default filter when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "info";

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

fn fmt_layer<S>() -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_span_events(FmtSpan::NONE)
}

fn subscriber(filter: EnvFilter) -> impl tracing::Subscriber + Send + Sync + 'static {
    Registry::default().with(filter).with(fmt_layer())
}

/// Initialize the tracing subscriber with environment-based filtering.
///
/// # Panics
///
/// This function will panic if called more than once, as the global
/// subscriber can only be set once.
pub fn init_tracing() {
    init_tracing_with_default(DEFAULT_FILTER);
}

/// Initialize tracing with a custom default level.
///
/// Similar to `init_tracing()`, but allows specifying a default log level
/// when `RUST_LOG` is not set.
///
/// # Panics
///
/// Panics if a global subscriber is already set.
pub fn init_tracing_with_default(default_level: &str) {
    subscriber(env_filter(default_level)).init();
}

/// Try to initialize tracing, returning an error if already initialized.
///
/// Unlike `init_tracing()`, this function does not panic if the subscriber
/// is already set, which makes it safe to call from tests.
pub fn try_init_tracing() -> Result<(), ()> {
    subscriber(env_filter(DEFAULT_FILTER)).try_init().map_err(|_| ())
}
