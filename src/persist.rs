//! Fire-and-forget snapshot writer.
//!
//! Engine mutations hand the full timer collection to the [`Persister`] and
//! return immediately. In background mode the snapshot goes through a tokio
//! `watch` channel to a single writer task: only the newest snapshot is
//! kept, so bursts of ticks coalesce into one write and writes never overlap.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::store::TimerStore;
use crate::timer::OrderTimer;

type Snapshot = Option<Arc<Vec<OrderTimer>>>;

pub struct Persister {
    store: Arc<dyn TimerStore>,
    tx: Option<watch::Sender<Snapshot>>,
}

impl Persister {
    /// Write synchronously on the calling thread. Used where no runtime is
    /// available (one-shot tools, unit tests).
    pub fn inline(store: Arc<dyn TimerStore>) -> Self {
        Self { store, tx: None }
    }

    /// Spawn the writer task on the current tokio runtime.
    ///
    /// The task exits after writing the last submitted snapshot once the
    /// persister is dropped.
    pub fn background(store: Arc<dyn TimerStore>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = watch::channel::<Snapshot>(None);
        let handle = tokio::spawn(run_writer(store.clone(), rx));
        info!("Timer persistence worker started");
        (Self { store, tx: Some(tx) }, handle)
    }

    pub fn store(&self) -> Arc<dyn TimerStore> {
        self.store.clone()
    }

    pub fn is_background(&self) -> bool {
        self.tx.is_some()
    }

    /// Queue `snapshot` for writing. Never blocks on I/O in background mode
    /// and never fails: errors are logged.
    pub fn submit(&self, snapshot: Vec<OrderTimer>) {
        match &self.tx {
            Some(tx) => {
                tx.send_replace(Some(Arc::new(snapshot)));
            }
            None => {
                if let Err(e) = self.store.save(&snapshot) {
                    warn!(error = %e, "Failed to persist timers");
                }
            }
        }
    }
}

async fn run_writer(store: Arc<dyn TimerStore>, mut rx: watch::Receiver<Snapshot>) {
    while rx.changed().await.is_ok() {
        let Some(snapshot) = rx.borrow_and_update().clone() else {
            continue;
        };
        let store = store.clone();
        match tokio::task::spawn_blocking(move || store.save(&snapshot)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to persist timers"),
            Err(e) => error!(error = %e, "Timer persistence task panicked"),
        }
    }
    info!("Timer persistence worker stopped");
}
