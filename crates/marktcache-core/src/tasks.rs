//! Fire-and-forget background work.
//!
//! Background refreshes are submitted here instead of being awaited by the
//! request that triggered them. The set tracks what it spawned so callers
//! can inspect or settle it, but nothing on the request path ever waits.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Clone, Default)]
pub struct BackgroundTasks {
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
    submitted: Arc<AtomicUsize>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `task` on the current runtime. Errors are logged, never returned.
    pub fn submit<F>(&self, label: impl Into<String>, task: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let label = label.into();
        self.submitted.fetch_add(1, Ordering::Relaxed);
        debug!(task = %label, "Submitting background task");

        let handle = tokio::spawn(async move {
            if let Err(e) = task.await {
                warn!(task = %label, error = %e, "Background task failed");
            }
        });

        if let Ok(mut handles) = self.handles.lock() {
            handles.retain(|h| !h.is_finished());
            handles.push(handle);
        }
    }

    /// Total number of tasks ever submitted.
    pub fn submitted(&self) -> usize {
        self.submitted.load(Ordering::Relaxed)
    }

    pub fn in_flight(&self) -> usize {
        self.handles
            .lock()
            .map(|h| h.iter().filter(|h| !h.is_finished()).count())
            .unwrap_or(0)
    }

    /// Wait for every task submitted so far, including tasks submitted while
    /// waiting.
    pub async fn settle(&self) {
        loop {
            let pending: Vec<JoinHandle<()>> = match self.handles.lock() {
                Ok(mut handles) => handles.drain(..).collect(),
                Err(_) => return,
            };
            if pending.is_empty() {
                return;
            }
            for handle in pending {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Background task panicked or was cancelled");
                }
            }
        }
    }
}
