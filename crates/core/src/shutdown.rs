//! Cooperative cancellation shared by sources and drains.
//!
//! A [`ShutdownHandle`] flips the signal once; every [`ShutdownSignal`] clone observes it.
//! Tasks race [`ShutdownSignal::cancelled`] against their own blocking operation in a
//! `tokio::select!`, so no task can stay blocked on a channel or timer after shutdown.

use std::{sync::Arc, time::Duration};

use tokio::{sync::watch, task::JoinHandle};

/// Creates a connected handle/signal pair.
pub fn shutdown_channel() -> (ShutdownHandle, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx: Arc::new(tx) }, ShutdownSignal { rx })
}

/// Handle to trigger the shutdown of everything listening on the paired signal.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Fire the signal. Calling it again has no further effect.
    pub fn shutdown(&self) {
        if !self.tx.send_replace(true) {
            tracing::debug!("shutdown signal fired");
        }
    }

    /// Fire the signal once `after` has elapsed.
    pub fn shutdown_after(&self, after: Duration) -> JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            tracing::info!(?after, "deadline reached, shutting down");
            handle.shutdown();
        })
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Receiving side of a shutdown; cheap to clone.
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Completes once the signal fires, immediately if it already has.
    ///
    /// If every handle is dropped without firing, this never completes.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let fired = rx.wait_for(|cancelled| *cancelled).await.is_ok();
        if !fired {
            std::future::pending::<()>().await;
        }
    }
}
