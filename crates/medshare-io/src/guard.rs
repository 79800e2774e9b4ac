//! Deadlines and cancellation for external calls.
//!
//! Every call into a collaborator is wrapped by [`guarded`], which races it
//! against a timeout and a caller-held [`Cancellation`]. Nothing in the core
//! waits on the outside world without both.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::{Result, StorageError};

/// A cancellation signal shared between a caller and its in-flight calls.
///
/// Cloning yields another handle to the same signal. Once cancelled it
/// stays cancelled.
#[derive(Clone, Debug)]
pub struct Cancellation {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Cancellation {
    /// Create a signal that has not fired.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Fire the signal.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether the signal has fired.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the signal fires.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                // Unreachable while `self` holds the sender.
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `call` with a deadline and a cancellation signal.
///
/// Returns `Cancelled` without polling `call` if the signal already fired.
pub async fn guarded<F, T>(call: F, timeout: Duration, cancel: &Cancellation) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(StorageError::Cancelled);
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StorageError::Cancelled),
        outcome = tokio::time::timeout(timeout, call) => match outcome {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout(timeout)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_guarded_passes_through() {
        let cancel = Cancellation::new();
        let value = guarded(async { Ok(7) }, Duration::from_secs(1), &cancel)
            .await
            .unwrap();
        assert_eq!(value, 7);

        let err = guarded::<_, ()>(
            async { Err(StorageError::Unavailable("down".into())) },
            Duration::from_secs(1),
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StorageError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_guarded_times_out() {
        let cancel = Cancellation::new();
        let err = guarded(
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
            Duration::from_millis(10),
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StorageError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_already_cancelled_never_polls() {
        let cancel = Cancellation::new();
        cancel.cancel();
        let polled = AtomicBool::new(false);
        let err = guarded(
            async {
                polled.store(true, Ordering::SeqCst);
                Ok(())
            },
            Duration::from_secs(1),
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StorageError::Cancelled));
        assert!(!polled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_inflight_call() {
        let cancel = Cancellation::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let err = guarded(
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
            Duration::from_secs(10),
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StorageError::Cancelled));
        assert!(cancel.is_cancelled());
    }
}
