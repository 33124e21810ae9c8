//! Diagnostics for the kitchen timer service.
//!
//! Provides:
//! - **About info**: version, build timestamp, git SHA, platform
//! - **Timer health**: status counts, overdue timers, schema version, DB size
//! - **Log rotation helpers**: used by `lib.rs` to configure rolling log files.

use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::db::DbState;
use crate::engine::TimerEngine;
use crate::timer::TimerStatus;

/// Maximum number of log files to retain.
pub const MAX_LOG_FILES: usize = 10;

/// Rolling log file prefix.
pub const LOG_FILE_PREFIX: &str = "timers";

/// Returns version, build timestamp, git SHA, and platform info.
pub fn get_about_info() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "buildTimestamp": env!("BUILD_TIMESTAMP"),
        "gitSha": env!("BUILD_GIT_SHA"),
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "rustVersion": env!("CARGO_PKG_RUST_VERSION"),
    })
}

/// Snapshot of engine and storage health for support screens.
pub fn get_timer_health(engine: &TimerEngine, db: Option<&DbState>) -> Value {
    let stats = engine.stats();
    let overdue: Vec<Value> = engine
        .active_timers()
        .into_iter()
        .filter(|t| t.status == TimerStatus::Active && t.current_progress >= 90.0)
        .map(|t| {
            json!({
                "orderId": t.order_id,
                "itemId": t.item_id,
                "itemName": t.item_name,
                "progress": t.current_progress,
            })
        })
        .collect();

    let (schema_version, db_size) = match db {
        Some(state) => {
            let conn = state.conn.lock().unwrap_or_else(|e| e.into_inner());
            let version: Option<i64> = conn
                .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                    row.get(0)
                })
                .ok();
            let size = fs::metadata(&state.db_path).map(|m| m.len()).ok();
            (version, size)
        }
        None => (None, None),
    };

    json!({
        "stats": stats,
        "appState": format!("{:?}", engine.app_state()).to_lowercase(),
        "nearlyDone": overdue,
        "schemaVersion": schema_version,
        "dbSizeBytes": db_size,
    })
}

/// Returns the log directory path. `POS_LOG_DIR` wins over the platform
/// default.
pub fn get_log_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("POS_LOG_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(std::env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        });
    base.join("com.thesmall.pos").join("logs")
}

/// Prune old log files in `log_dir`, keeping only the most recent
/// `MAX_LOG_FILES`.
pub fn prune_old_logs(log_dir: &Path) {
    if !log_dir.exists() {
        return;
    }

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
    if let Ok(entries) = fs::read_dir(log_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let is_log = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| name.starts_with(&format!("{LOG_FILE_PREFIX}.")));
            if is_log {
                let modified = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .unwrap_or(std::time::UNIX_EPOCH);
                log_files.push((path, modified));
            }
        }
    }

    // Sort newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in log_files.iter().skip(MAX_LOG_FILES) {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to prune log file {}: {e}", path.display());
        }
    }
}
