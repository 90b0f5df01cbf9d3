use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

use super::error::FetchError;

/// Owner side of the process-wide shutdown flag.
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

/// Cloneable listener handed to every component that sleeps or waits on I/O.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
        tracing::info!("Shutdown requested");
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    /// A signal that never fires; handy for one-shot CLI runs and tests.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been requested.
    pub async fn cancelled(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                // Sender dropped without triggering: treat as never cancelled.
                std::future::pending::<()>().await;
            }
        }
    }

    /// Sleeps for `duration` unless shutdown arrives first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), FetchError> {
        if duration.is_zero() {
            return if self.is_triggered() {
                Err(FetchError::Cancelled)
            } else {
                Ok(())
            };
        }

        let mut signal = self.clone();
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = signal.cancelled() => Err(FetchError::Cancelled),
        }
    }

    /// Drives `work` to completion unless shutdown arrives first, in which case
    /// `work` is dropped mid-flight.
    pub async fn guard<T, F>(&self, work: F) -> Result<T, FetchError>
    where
        F: Future<Output = Result<T, FetchError>>,
    {
        if self.is_triggered() {
            return Err(FetchError::Cancelled);
        }
        let mut signal = self.clone();
        tokio::select! {
            result = work => result,
            _ = signal.cancelled() => Err(FetchError::Cancelled),
        }
    }
}
