//! The Small POS - kitchen order timers.
//!
//! Tracks one cooking timer per order line, keeps progress correct across
//! pauses, background periods and restarts, schedules local "ready"
//! notifications, and publishes typed lifecycle events for the UI.
//!
//! Typical wiring:
//! 1. open the terminal database with [`db::init`]
//! 2. read [`EngineConfig::from_settings`]
//! 3. build a [`Persister`] over a [`SqliteTimerStore`]
//! 4. create the [`TimerEngine`], call [`TimerEngine::recover`]
//! 5. hand it to [`TimerService::spawn`] together with the lifecycle signal

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod clock;
pub mod config;
pub mod db;
pub mod diagnostics;
pub mod engine;
pub mod events;
pub mod notifications;
pub mod persist;
pub mod service;
pub mod store;
pub mod timer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use engine::{AppState, RecoveryReport, TimerEngine, TimerError};
pub use events::{SubscriptionId, TimerEvent, TimerEventKind};
pub use notifications::{LogNotifier, NotificationRequest, Notifier, NotifyError};
pub use persist::Persister;
pub use service::{lifecycle_channel, LifecycleSender, TimerService};
pub use store::{MemoryTimerStore, SqliteTimerStore, StoreError, TimerStore};
pub use timer::{
    progress_color, progress_label, OrderTimer, ProgressBand, TimerKey, TimerStats, TimerStatus,
    TimerUpdate,
};

/// Initialize structured logging (console + daily rolling file in
/// `log_dir`). Keep the returned guard alive until exit; dropping it
/// flushes buffered log lines.
pub fn init_logging(log_dir: &Path) -> std::io::Result<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,the_small_pos_timers_lib=debug"));

    // Prune old log files before setting up the appender
    std::fs::create_dir_all(log_dir)?;
    diagnostics::prune_old_logs(log_dir);

    let file_appender = tracing_appender::rolling::daily(log_dir, diagnostics::LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_writer(std::io::stderr).with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}
