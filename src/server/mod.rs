//! Async TCP server using Tokio.
//!
//! A [`Server`] owns the listening socket, its accept loops, the worker pool
//! and the set of open connections. Every connection carries exactly one
//! request and is closed after the response.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::config::ServerConfig;
use crate::pool::WorkerPool;

pub mod acceptor;
pub mod connections;
pub mod dispatch;

pub use acceptor::Acceptor;
pub use connections::{ConnectionHandle, ConnectionRegistry};
pub use dispatch::Dispatcher;

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// The staticd HTTP server.
///
/// # Examples
///
/// ```rust,no_run
/// use staticd::config::Settings;
/// use staticd::server::Server;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Settings::default().validate()?;
///     let dispatcher = config.dispatcher()?;
///     let server = Server::bind(&config, dispatcher).await?;
///     server.run_until(async { let _ = tokio::signal::ctrl_c().await; }).await;
///     Ok(())
/// }
/// ```
pub struct Server {
    acceptor: Acceptor,
    pool: WorkerPool,
    dispatcher: Arc<Dispatcher>,
    connections: ConnectionRegistry,
}

impl Server {
    /// Binds the configured address. Nothing is accepted until [`Server::start`].
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(config: &ServerConfig, dispatcher: Dispatcher) -> Result<Self, ServerError> {
        let acceptor = Acceptor::bind(config.socket_addr(), config.acceptors).await?;
        Ok(Self {
            acceptor,
            pool: WorkerPool::new(config.pool.clone()),
            dispatcher: Arc::new(dispatcher.idle_timeout(config.idle_timeout)),
            connections: ConnectionRegistry::new(),
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.acceptor.local_addr()
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Connections accepted and not yet finished, queued ones included.
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    /// Starts the accept loops.
    pub fn start(&mut self) {
        self.acceptor
            .start(&self.pool, &self.dispatcher, &self.connections);
        info!(
            address = %self.local_addr(),
            root = %self.dispatcher.resolver().root().display(),
            "staticd listening"
        );
    }

    /// Stops accepting, closes every open connection and shuts the pool down.
    pub async fn stop(&mut self) {
        self.acceptor.stop().await;
        let closed = self.connections.close_all();
        self.pool.shutdown();
        info!(closed, "staticd stopped");
    }

    /// Serves until `signal` completes, then stops.
    pub async fn run_until<F>(mut self, signal: F)
    where
        F: Future<Output = ()>,
    {
        self.start();
        signal.await;
        info!("shutdown requested");
        self.stop().await;
    }
}
