//! HTTP server builder utilities.
//!
//! This module provides a consistent pattern for binding and running the axum
//! router with peer address information (used to identify clients) and
//! graceful shutdown.
//!
//! # Example
//!
//! ```ignore
//! use polly_tts_common::server::HttpServerBuilder;
//!
//! let router = build_router(state);
//! HttpServerBuilder::new(router)
//!     .with_addr("0.0.0.0:3001".parse()?)
//!     .run()
//!     .await?;
//! ```

use std::net::SocketAddr;

use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Errors that can occur when running the HTTP server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to the specified address
    #[error("Failed to bind to {addr}: {message}")]
    BindFailed { addr: SocketAddr, message: String },

    /// Error while accepting or serving connections
    #[error("Serve error: {0}")]
    Serve(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Builder for configuring and running the HTTP server.
pub struct HttpServerBuilder {
    router: Router,
    addr: SocketAddr,
    listener: Option<TcpListener>,
    shutdown_rx: Option<oneshot::Receiver<()>>,
}

impl HttpServerBuilder {
    /// Create a new server builder for the given router.
    pub fn new(router: Router) -> Self {
        Self {
            router,
            addr: SocketAddr::from(([0, 0, 0, 0], crate::listen::DEFAULT_PORT)),
            listener: None,
            shutdown_rx: None,
        }
    }

    /// Set the address to bind.
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Serve on an already bound listener instead of binding `addr`.
    ///
    /// Tests bind `127.0.0.1:0` and read the assigned port before handing
    /// the listener over.
    pub fn with_listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Set a shutdown signal receiver for graceful shutdown.
    ///
    /// When the sender is dropped or a message is sent, the server
    /// will initiate graceful shutdown.
    pub fn with_shutdown(mut self, shutdown_rx: oneshot::Receiver<()>) -> Self {
        self.shutdown_rx = Some(shutdown_rx);
        self
    }

    /// Run the server until it is shut down (via signal or shutdown channel).
    pub async fn run(self) -> Result<(), ServerError> {
        let tcp_listener = match self.listener {
            Some(listener) => listener,
            None => TcpListener::bind(self.addr)
                .await
                .map_err(|e| ServerError::BindFailed {
                    addr: self.addr,
                    message: e.to_string(),
                })?,
        };

        let local_addr = tcp_listener.local_addr()?;
        tracing::info!(addr = %local_addr, "HTTP server listening");

        // Set up graceful shutdown
        let shutdown_rx = self.shutdown_rx;
        let shutdown_future = async move {
            if let Some(rx) = shutdown_rx {
                let _ = rx.await;
            } else {
                wait_for_shutdown_signal().await;
            }
            tracing::info!("Received shutdown signal, stopping server");
        };

        axum::serve(
            tcp_listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_future)
        .await
        .map_err(|e| ServerError::Serve(e.to_string()))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
        let mut sigint =
            signal(SignalKind::interrupt()).expect("Failed to register SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to register Ctrl+C handler");
        tracing::info!("Received Ctrl+C");
    }
}

/// Convenience function to set up graceful shutdown handling.
///
/// Returns a sender that can be used to trigger shutdown programmatically,
/// and a receiver to pass to the server builder.
pub fn shutdown_channel() -> (oneshot::Sender<()>, oneshot::Receiver<()>) {
    oneshot::channel()
}
