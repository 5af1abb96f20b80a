//! Listening address configuration.
//!
//! The proxy always serves HTTP; what varies between deployments is the host
//! and port it binds to. Both come from the command line, with environment
//! fallbacks.
//!
//! # Example
//!
//! ```ignore
//! use polly_tts_common::listen::ListenArgs;
//! use clap::Parser;
//!
//! #[derive(Parser)]
//! struct Args {
//!     #[command(flatten)]
//!     listen: ListenArgs,
//! }
//!
//! let args = Args::parse();
//! let addr = args.listen.socket_addr()?;
//! ```

use clap::Args;
use std::net::{IpAddr, SocketAddr};

use crate::error::ConfigError;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 3001;

/// Default listening host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Command-line arguments for the listening address.
#[derive(Args, Debug, Clone)]
pub struct ListenArgs {
    /// Interface to bind (default: 0.0.0.0, or from HOST env var)
    #[arg(long, env = "HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on (default: 3001, or from PORT env var)
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,
}

impl ListenArgs {
    /// Resolve the host and port into a socket address.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` if the host is not an IP address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self.host.parse().map_err(|_| {
            ConfigError::invalid_value("HOST", format!("'{}' is not an IP address", self.host))
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

impl Default for ListenArgs {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}
