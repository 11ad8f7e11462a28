//! Coordinated shutdown signaling
//!
//! Shutdown is signaled once and observed in two shapes: an atomic flag for
//! the blocking capture thread, and a broadcast channel for async tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

pub struct ShutdownCoordinator {
    shutting_down: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ShutdownCoordinator {
    pub fn new() -> ShutdownCoordinator {
        let (shutdown_tx, _) = broadcast::channel(1);
        ShutdownCoordinator {
            shutting_down: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    /// Raise the shutdown signal. Idempotent.
    pub fn trigger(&self) {
        if !self.shutting_down.swap(true, Ordering::SeqCst) {
            let _ = self.shutdown_tx.send(());
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// The flag handed to blocking workers that cannot await.
    pub fn flag(&self) -> Arc<AtomicBool> {
        self.shutting_down.clone()
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_is_idempotent_and_observable() {
        let coordinator = ShutdownCoordinator::new();
        let flag = coordinator.flag();
        let mut rx = coordinator.subscribe();

        assert!(!coordinator.is_shutting_down());
        coordinator.trigger();
        coordinator.trigger();

        assert!(coordinator.is_shutting_down());
        assert!(flag.load(Ordering::SeqCst));
        assert!(rx.recv().await.is_ok());
    }
}
