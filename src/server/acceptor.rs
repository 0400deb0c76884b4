//! Accept loops feeding the worker pool.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use super::ServerError;
use super::connections::ConnectionRegistry;
use super::dispatch::Dispatcher;
use crate::pool::WorkerPool;

/// Owns the listening socket and the accept loops running on it.
pub struct Acceptor {
    listener: Option<Arc<TcpListener>>,
    local_addr: SocketAddr,
    loops: usize,
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Acceptor {
    /// Binds `addr`; `loops` accept loops will share the socket once started.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound.
    pub async fn bind(addr: SocketAddr, loops: usize) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            listener: Some(Arc::new(listener)),
            local_addr,
            loops: loops.max(1),
            shutdown,
            handles: Vec::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        !self.handles.is_empty()
    }

    /// Spawns the accept loops. Does nothing if already running or stopped.
    pub fn start(
        &mut self,
        pool: &WorkerPool,
        dispatcher: &Arc<Dispatcher>,
        connections: &ConnectionRegistry,
    ) {
        let Some(listener) = &self.listener else {
            warn!("acceptor already stopped");
            return;
        };
        if self.is_running() {
            return;
        }
        for id in 0..self.loops {
            let accept_loop = AcceptLoop {
                id,
                listener: Arc::clone(listener),
                shutdown: self.shutdown.subscribe(),
                pool: pool.clone(),
                dispatcher: Arc::clone(dispatcher),
                connections: connections.clone(),
            };
            self.handles.push(tokio::spawn(accept_loop.run()));
        }
    }

    /// Wakes every accept loop, waits for them to exit and closes the socket.
    pub async fn stop(&mut self) {
        self.shutdown.send_replace(true);
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                error!(error = %e, "accept loop failed");
            }
        }
        self.listener = None;
        debug!(address = %self.local_addr, "listener closed");
    }
}

struct AcceptLoop {
    id: usize,
    listener: Arc<TcpListener>,
    shutdown: watch::Receiver<bool>,
    pool: WorkerPool,
    dispatcher: Arc<Dispatcher>,
    connections: ConnectionRegistry,
}

impl AcceptLoop {
    async fn run(mut self) {
        trace!(acceptor = self.id, "accept loop started");
        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.shutdown.changed() => break,
                accepted = self.listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, peer)) => self.submit(stream, peer),
                // Errors racing a shutdown are not faults.
                Err(_) if *self.shutdown.borrow() => break,
                Err(e) => error!(acceptor = self.id, error = %e, "failed to accept connection"),
            }
        }
        trace!(acceptor = self.id, "accept loop stopped");
    }

    fn submit(&self, stream: TcpStream, peer: SocketAddr) {
        debug!(peer = %peer, "connection accepted");
        if let Err(e) = stream.set_nodelay(true) {
            warn!(peer = %peer, error = %e, "failed to set TCP_NODELAY");
        }

        // Registered before submission so queued connections are closed on stop too.
        let connection = self.connections.register();
        let dispatcher = Arc::clone(&self.dispatcher);
        let accepted = self.pool.submit(async move {
            tokio::select! {
                _ = dispatcher.handle(stream, peer) => {}
                _ = connection.closed() => debug!(peer = %peer, "connection closed by shutdown"),
            }
        });
        if !accepted {
            warn!(peer = %peer, "worker pool saturated, dropping connection");
        }
    }
}
