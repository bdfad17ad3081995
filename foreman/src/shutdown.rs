//! Cooperative shutdown request shared between the signal listener, the
//! daemon loop and the merge pipeline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    requested: AtomicBool,
    notify: Notify,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the loop to stop after the current unit of work. Idempotent.
    ///
    /// Returns `true` only for the call that flipped the flag.
    pub fn request(&self) -> bool {
        let first = !self.inner.requested.swap(true, Ordering::SeqCst);
        if first {
            self.inner.notify.notify_one();
        }
        first
    }

    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Resolve once a shutdown has been requested.
    pub async fn wait(&self) {
        if self.is_requested() {
            return;
        }
        self.inner.notify.notified().await;
    }
}
