//! TCP listener feeding reader connections into a [`Gateway`].
//!
//! ```text
//! Reader 01 ┐
//! Reader 02 ├──> TcpServer ──> Gateway::serve (one task per connection)
//! Reader NN ┘
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::gateway::Gateway;
use crate::services::Services;

/// Configuration for the TCP server
///
/// # Example
///
/// ```
/// use attractap_gateway::TcpServerConfig;
///
/// let config = TcpServerConfig {
///     bind_addr: "0.0.0.0:7300".parse().unwrap(),
///     max_connections: 100,
/// };
/// ```
#[derive(Debug, Clone)]
pub struct TcpServerConfig {
    /// Address to bind the server to
    pub bind_addr: SocketAddr,

    /// Maximum number of simultaneous connections
    pub max_connections: usize,
}

impl Default for TcpServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 7300)),
            max_connections: 100,
        }
    }
}

/// Errors that can occur during TCP server operations
#[derive(Debug, Error)]
pub enum TcpServerError {
    /// Failed to bind to address
    #[error("Failed to bind to {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Low-level I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct TcpServer {
    listener: TcpListener,
    config: TcpServerConfig,
    active: Arc<AtomicUsize>,
}

impl TcpServer {
    /// Bind the server to the configured address
    ///
    /// # Errors
    ///
    /// Returns [`TcpServerError::BindFailed`] if the address is in use or
    /// cannot be bound.
    pub async fn bind(config: TcpServerConfig) -> Result<Self, TcpServerError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|source| TcpServerError::BindFailed {
                addr: config.bind_addr,
                source,
            })?;

        info!(
            bind_addr = %config.bind_addr,
            max_connections = config.max_connections,
            "reader server listening"
        );

        Ok(Self {
            listener,
            config,
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TcpServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Number of connections currently served
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Accept connections forever, serving each on its own task.
    ///
    /// Connections beyond `max_connections` are closed right away; the
    /// server keeps accepting.
    ///
    /// # Errors
    ///
    /// Only a failing listener ends the loop.
    pub async fn run<S: Services>(self, gateway: Gateway<S>) -> Result<(), TcpServerError> {
        loop {
            let (stream, addr) = self.listener.accept().await?;
            debug!(remote_addr = %addr, "accepted connection");

            let current = self.active.load(Ordering::Acquire);
            if current >= self.config.max_connections {
                error!(
                    remote_addr = %addr,
                    max_connections = self.config.max_connections,
                    current_connections = current,
                    "Connection rejected: maximum connections reached"
                );
                drop(stream);
                continue;
            }

            if let Err(e) = stream.set_nodelay(true) {
                warn!(remote_addr = %addr, error = %e, "Failed to set TCP_NODELAY");
            }

            let gateway = gateway.clone();
            let active = self.active.clone();
            active.fetch_add(1, Ordering::AcqRel);
            tokio::spawn(async move {
                gateway.serve(stream, Some(addr)).await;
                active.fetch_sub(1, Ordering::AcqRel);
            });
        }
    }
}
