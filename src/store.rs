//! Durable timer snapshots.
//!
//! The whole timer collection is stored as one JSON array under a single
//! namespaced key, so every write replaces the previous snapshot atomically.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::debug;

use crate::db::{self, DbState};
use crate::timer::OrderTimer;

/// `local_settings` category holding persisted engine state.
pub const STORAGE_CATEGORY: &str = "storage";
/// Key of the timer snapshot.
pub const STORAGE_KEY: &str = "order_timers";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("snapshot encoding: {0}")]
    Json(#[from] serde_json::Error),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

pub trait TimerStore: Send + Sync {
    /// Load the last snapshot. An absent snapshot is an empty list.
    fn load(&self) -> Result<Vec<OrderTimer>, StoreError>;

    /// Replace the snapshot with `timers`.
    fn save(&self, timers: &[OrderTimer]) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

/// Snapshot stored in the terminal's `local_settings` table.
pub struct SqliteTimerStore {
    db: Arc<DbState>,
}

impl SqliteTimerStore {
    pub fn new(db: Arc<DbState>) -> Self {
        Self { db }
    }
}

impl TimerStore for SqliteTimerStore {
    fn load(&self) -> Result<Vec<OrderTimer>, StoreError> {
        let conn = self.db.conn.lock().unwrap_or_else(|e| e.into_inner());
        match db::get_setting(&conn, STORAGE_CATEGORY, STORAGE_KEY) {
            Some(raw) if !raw.trim().is_empty() => Ok(serde_json::from_str(&raw)?),
            _ => Ok(Vec::new()),
        }
    }

    fn save(&self, timers: &[OrderTimer]) -> Result<(), StoreError> {
        let raw = serde_json::to_string(timers)?;
        let conn = self.db.conn.lock().unwrap_or_else(|e| e.into_inner());
        db::set_setting(&conn, STORAGE_CATEGORY, STORAGE_KEY, &raw)?;
        debug!(count = timers.len(), "Timer snapshot saved");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Keeps the encoded snapshot in memory. Can simulate a storage outage.
#[derive(Debug, Default)]
pub struct MemoryTimerStore {
    raw: Mutex<Option<String>>,
    failing: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryTimerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with an existing snapshot.
    pub fn with_timers(timers: &[OrderTimer]) -> Result<Self, StoreError> {
        let store = Self::new();
        store.save(timers)?;
        store.writes.store(0, Ordering::SeqCst);
        Ok(store)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of successful saves.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn raw(&self) -> Option<String> {
        self.raw.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl TimerStore for MemoryTimerStore {
    fn load(&self) -> Result<Vec<OrderTimer>, StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("simulated read failure".into()));
        }
        match self.raw() {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    fn save(&self, timers: &[OrderTimer]) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("simulated write failure".into()));
        }
        let raw = serde_json::to_string(timers)?;
        *self.raw.lock().unwrap_or_else(|e| e.into_inner()) = Some(raw);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
