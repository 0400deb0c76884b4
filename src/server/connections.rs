//! Registry of open connections, so a stopping server can close them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

type Registry = Mutex<HashMap<u64, Arc<Notify>>>;

/// Shared set of open connections.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    open: Arc<Registry>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection. It stays registered until the handle is dropped.
    pub fn register(&self) -> ConnectionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let close = Arc::new(Notify::new());
        lock(&self.open).insert(id, Arc::clone(&close));
        ConnectionHandle {
            id,
            close,
            registry: Arc::clone(&self.open),
        }
    }

    /// Signals every registered connection to close. Returns how many were signalled.
    pub fn close_all(&self) -> usize {
        let open = lock(&self.open);
        for close in open.values() {
            // notify_one stores a permit, so a connection that has not started
            // waiting yet still sees the signal.
            close.notify_one();
        }
        open.len()
    }

    /// Number of open connections.
    pub fn len(&self) -> usize {
        lock(&self.open).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock(registry: &Registry) -> MutexGuard<'_, HashMap<u64, Arc<Notify>>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Membership of one connection in a [`ConnectionRegistry`].
#[derive(Debug)]
pub struct ConnectionHandle {
    id: u64,
    close: Arc<Notify>,
    registry: Arc<Registry>,
}

impl ConnectionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Completes once the registry asks this connection to close.
    pub async fn closed(&self) {
        self.close.notified().await;
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        lock(&self.registry).remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn handles_deregister_on_drop() {
        let registry = ConnectionRegistry::new();
        let a = registry.register();
        let b = registry.register();
        assert_ne!(a.id(), b.id());
        assert_eq!(registry.len(), 2);
        drop(a);
        assert_eq!(registry.len(), 1);
        drop(b);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn close_all_wakes_waiting_connection() {
        let registry = ConnectionRegistry::new();
        let handle = registry.register();
        let waiter = tokio::spawn(async move {
            handle.closed().await;
        });
        tokio::task::yield_now().await;
        assert_eq!(registry.close_all(), 1);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn close_signal_is_not_lost_before_waiting() {
        let registry = ConnectionRegistry::new();
        let handle = registry.register();
        registry.close_all();
        tokio::time::timeout(Duration::from_secs(1), handle.closed())
            .await
            .unwrap();
    }
}
