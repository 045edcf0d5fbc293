//! One-shot readiness latch

use std::sync::Arc;
use tokio::sync::watch;

/// Process-wide readiness flag that moves from not-ready to ready once
#[derive(Debug, Clone)]
pub struct ReadinessLatch {
    tx: Arc<watch::Sender<bool>>,
}

impl ReadinessLatch {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Mark ready; returns `true` only for the call that flipped the latch
    pub fn set(&self) -> bool {
        self.tx.send_if_modified(|ready| {
            if *ready {
                false
            } else {
                *ready = true;
                true
            }
        })
    }

    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }

    /// Observe the latch
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for ReadinessLatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latch_is_one_shot() {
        let latch = ReadinessLatch::new();
        assert!(!latch.is_ready());
        assert!(latch.set());
        assert!(!latch.set());
        assert!(latch.is_ready());
    }

    #[tokio::test]
    async fn test_subscribers_observe_transition() {
        let latch = ReadinessLatch::new();
        let mut rx = latch.subscribe();
        assert!(!*rx.borrow());

        latch.clone().set();
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }
}
