//! Runtime wrapper around [`TimerEngine`].
//!
//! One background task drives every active timer from a single periodic
//! tick and applies foreground/background transitions published on a
//! `watch` channel. The engine itself stays synchronous; the service only
//! serialises access to it behind a mutex.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::engine::{AppState, TimerEngine};

/// Sender side of the app lifecycle signal, owned by the host platform.
pub type LifecycleSender = watch::Sender<AppState>;

/// New lifecycle signal, starting in the foreground.
pub fn lifecycle_channel() -> (LifecycleSender, watch::Receiver<AppState>) {
    watch::channel(AppState::Active)
}

pub struct TimerService {
    engine: Arc<Mutex<TimerEngine>>,
    cancel: CancellationToken,
    driver: JoinHandle<()>,
    persist_worker: Option<JoinHandle<()>>,
}

impl TimerService {
    /// Spawn the driver loop on the current tokio runtime.
    ///
    /// `persist_worker` is the handle returned by
    /// [`Persister::background`](crate::persist::Persister::background); it
    /// is awaited on shutdown so the last snapshot reaches storage.
    pub fn spawn(
        engine: TimerEngine,
        lifecycle: watch::Receiver<AppState>,
        persist_worker: Option<JoinHandle<()>>,
    ) -> Self {
        let tick_interval = engine.config().tick_interval;
        let engine = Arc::new(Mutex::new(engine));
        let cancel = CancellationToken::new();
        let driver = tokio::spawn(run_driver(
            engine.clone(),
            lifecycle,
            tick_interval,
            cancel.clone(),
        ));
        Self {
            engine,
            cancel,
            driver,
            persist_worker,
        }
    }

    /// Shared handle for hosts that need to call into the engine from
    /// their own tasks.
    pub fn engine(&self) -> Arc<Mutex<TimerEngine>> {
        self.engine.clone()
    }

    /// Lock the engine. A poisoned lock is recovered: engine state is only
    /// mutated through complete operations.
    pub fn lock(&self) -> MutexGuard<'_, TimerEngine> {
        self.engine.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stop ticking, write a final snapshot and wait for it to land.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.driver.await {
            warn!(error = %e, "Timer driver task failed");
        }

        {
            let mut engine = self.engine.lock().unwrap_or_else(|e| e.into_inner());
            engine.flush();
            engine.clear_listeners();
        }

        match Arc::try_unwrap(self.engine) {
            Ok(engine) => {
                drop(engine);
                if let Some(worker) = self.persist_worker {
                    if let Err(e) = worker.await {
                        warn!(error = %e, "Timer persistence worker failed");
                    }
                }
            }
            Err(_) => warn!("Timer engine still shared at shutdown; final write not awaited"),
        }
        info!("Timer service stopped");
    }
}

async fn run_driver(
    engine: Arc<Mutex<TimerEngine>>,
    mut lifecycle: watch::Receiver<AppState>,
    tick_interval: Duration,
    cancel: CancellationToken,
) {
    info!(
        interval_ms = tick_interval.as_millis() as u64,
        "Timer driver started"
    );
    let mut ticker = tokio::time::interval(tick_interval);
    // A suspended process must not replay a burst of ticks on wake-up;
    // progress is recomputed from wall-clock time anyway.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut lifecycle_open = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = lifecycle.changed(), if lifecycle_open => {
                match changed {
                    Ok(()) => {
                        let next = *lifecycle.borrow_and_update();
                        engine
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .handle_app_state(next);
                    }
                    Err(_) => {
                        warn!("Lifecycle signal closed; timers stay in current app state");
                        lifecycle_open = false;
                    }
                }
            }
            _ = ticker.tick() => {
                engine.lock().unwrap_or_else(|e| e.into_inner()).tick_all();
            }
        }
    }

    info!("Timer driver stopped");
}
