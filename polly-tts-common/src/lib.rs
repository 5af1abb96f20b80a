//! Polly TTS Proxy Common Library
//!
//! Shared utilities for configuration, error handling, tracing and running
//! the HTTP server of the Polly TTS proxy.

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
pub mod error;
pub mod listen;
pub mod server;
pub mod tracing;

#[cfg(test)]
mod config_test;

pub use config::{Config, ProviderConfig};
pub use error::{ConfigError, Error, Result};
pub use listen::ListenArgs;
pub use server::{HttpServerBuilder, ServerError, shutdown_channel};
