// src/utils/shutdown.rs

//! Cooperative cancellation signal shared by long-running tasks.

use tokio::sync::watch;

/// Receiving half of a shutdown flag. Clones observe the same signal.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    rx: Option<watch::Receiver<bool>>,
}

impl Shutdown {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self { rx: None }
    }

    /// New signal and its trigger. Send `true` to cancel.
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx: Some(rx) })
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once cancellation is requested.
    ///
    /// Pends forever if the sender is dropped without cancelling.
    pub async fn cancelled(&self) {
        let Some(rx) = &self.rx else {
            return std::future::pending().await;
        };
        let mut rx = rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }
}
