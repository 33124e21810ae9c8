//! Engine configuration.
//!
//! Defaults can be overridden per terminal through `local_settings` rows in
//! the `timers` category. Bad values fall back to the default with a warning.

use rusqlite::Connection;
use std::time::Duration;
use tracing::warn;

use crate::db;

pub const SETTINGS_CATEGORY: &str = "timers";

const KEY_TICK_INTERVAL_MS: &str = "tick_interval_ms";
const KEY_RECOVERY_GRACE_FACTOR: &str = "recovery_grace_factor";
const KEY_MIN_NOTIFICATION_DELAY_SECS: &str = "min_notification_delay_secs";
const KEY_PROGRESS_MILESTONES: &str = "progress_milestones";

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Driver loop period.
    pub tick_interval: Duration,
    /// A persisted active timer is resumed on startup while its elapsed time
    /// is below `estimated * factor`; otherwise it is recovered as completed.
    pub recovery_grace_factor: f64,
    /// Floor for completion notification delays.
    pub min_notification_delay: Duration,
    /// Percent marks (1-99) that get a progress notification.
    pub progress_milestones: Vec<u8>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            recovery_grace_factor: 1.5,
            min_notification_delay: Duration::from_secs(5),
            progress_milestones: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Read overrides from `local_settings`.
    pub fn from_settings(conn: &Connection) -> Self {
        let mut config = Self::default();
        let get = |key: &str| db::get_setting(conn, SETTINGS_CATEGORY, key);

        if let Some(raw) = get(KEY_TICK_INTERVAL_MS) {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => config.tick_interval = Duration::from_millis(ms),
                _ => warn!(key = KEY_TICK_INTERVAL_MS, value = %raw, "Ignoring invalid setting"),
            }
        }
        if let Some(raw) = get(KEY_RECOVERY_GRACE_FACTOR) {
            match raw.trim().parse::<f64>() {
                Ok(f) if f.is_finite() && f >= 1.0 => config.recovery_grace_factor = f,
                _ => warn!(
                    key = KEY_RECOVERY_GRACE_FACTOR,
                    value = %raw,
                    "Ignoring invalid setting"
                ),
            }
        }
        if let Some(raw) = get(KEY_MIN_NOTIFICATION_DELAY_SECS) {
            match raw.trim().parse::<u64>() {
                Ok(secs) => config.min_notification_delay = Duration::from_secs(secs),
                Err(_) => warn!(
                    key = KEY_MIN_NOTIFICATION_DELAY_SECS,
                    value = %raw,
                    "Ignoring invalid setting"
                ),
            }
        }
        if let Some(raw) = get(KEY_PROGRESS_MILESTONES) {
            match parse_milestones(&raw) {
                Some(marks) => config.progress_milestones = marks,
                None => warn!(
                    key = KEY_PROGRESS_MILESTONES,
                    value = %raw,
                    "Ignoring invalid setting"
                ),
            }
        }

        config
    }
}

/// Parse `"70, 85"` into sorted, deduplicated percents in 1..=99.
fn parse_milestones(raw: &str) -> Option<Vec<u8>> {
    let mut marks = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u8>().ok().filter(|p| (1..=99).contains(p)))
        .collect::<Option<Vec<u8>>>()?;
    marks.sort_unstable();
    marks.dedup();
    Some(marks)
}
