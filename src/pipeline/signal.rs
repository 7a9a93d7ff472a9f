//! One-shot completion signal

use std::sync::Arc;
use tokio::sync::watch;

/// A flag raised once by a producer and awaited by its consumers
///
/// Clones share the same flag.
#[derive(Debug, Clone)]
pub struct CompletionSignal {
    name: &'static str,
    tx: Arc<watch::Sender<bool>>,
}

impl CompletionSignal {
    pub fn new(name: &'static str) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            name,
            tx: Arc::new(tx),
        }
    }

    /// Raises the signal
    ///
    /// # Returns
    ///
    /// `true` if this call raised it, `false` if it was already raised
    pub fn raise(&self) -> bool {
        let first = self.tx.send_if_modified(|raised| !std::mem::replace(raised, true));
        if first {
            tracing::debug!(signal = self.name, "Signal raised");
        }
        first
    }

    pub fn is_raised(&self) -> bool {
        *self.tx.borrow()
    }

    /// Waits until the signal is raised
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait
        let _ = rx.wait_for(|raised| *raised).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_raise_once() {
        let signal = CompletionSignal::new("test");
        assert!(!signal.is_raised());
        assert!(signal.raise());
        assert!(!signal.raise());
        assert!(signal.is_raised());
    }

    #[tokio::test]
    async fn test_wait_wakes_clones() {
        let signal = CompletionSignal::new("test");
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let signal = signal.clone();
                tokio::spawn(async move { signal.wait().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        signal.raise();

        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .unwrap()
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_wait_after_raise_returns() {
        let signal = CompletionSignal::new("test");
        signal.raise();
        tokio::time::timeout(Duration::from_millis(50), signal.wait())
            .await
            .unwrap();
    }
}
