//! Kitchen order timer types.
//!
//! One `OrderTimer` tracks the cooking of one order line. Timestamps are
//! epoch milliseconds so the persisted JSON stays compatible with the
//! snapshots written by the mobile POS.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Milliseconds in one minute.
pub const MS_PER_MINUTE: f64 = 60_000.0;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle state of a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerStatus {
    Active,
    Paused,
    Completed,
    Cancelled,
}

impl TimerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Active and paused timers are "live": a second start for the same
    /// key is rejected while one exists.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Active | Self::Paused)
    }
}

impl fmt::Display for TimerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// (order, item) pair identifying at most one timer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerKey {
    pub order_id: String,
    pub item_id: String,
}

impl TimerKey {
    pub fn new(order_id: impl Into<String>, item_id: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            item_id: item_id.into(),
        }
    }
}

impl fmt::Display for TimerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.order_id, self.item_id)
    }
}

// ---------------------------------------------------------------------------
// Timer record
// ---------------------------------------------------------------------------

/// Persisted timer record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderTimer {
    pub order_id: String,
    pub item_id: String,
    /// Menu item name captured when the timer started.
    pub item_name: String,
    /// Effective start (epoch ms); shifted forward by every pause.
    pub start_time: i64,
    /// Planned cook time in minutes.
    #[serde(rename = "estimatedDuration", alias = "estimatedDurationMinutes")]
    pub estimated_duration_minutes: f64,
    /// 0-100, recomputed on every tick.
    pub current_progress: f64,
    pub status: TimerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub milestone_notification_ids: Vec<String>,
    pub last_update_time: i64,
}

impl OrderTimer {
    pub fn new(
        order_id: &str,
        item_id: &str,
        item_name: &str,
        estimated_minutes: f64,
        now_ms: i64,
    ) -> Self {
        Self {
            order_id: order_id.to_string(),
            item_id: item_id.to_string(),
            item_name: item_name.to_string(),
            start_time: now_ms,
            estimated_duration_minutes: estimated_minutes,
            current_progress: 0.0,
            status: TimerStatus::Active,
            notification_id: None,
            milestone_notification_ids: Vec::new(),
            last_update_time: now_ms,
        }
    }

    pub fn key(&self) -> TimerKey {
        TimerKey::new(self.order_id.clone(), self.item_id.clone())
    }

    pub fn estimated_duration_ms(&self) -> f64 {
        self.estimated_duration_minutes * MS_PER_MINUTE
    }

    pub fn elapsed_minutes(&self, now_ms: i64) -> f64 {
        now_ms.saturating_sub(self.start_time) as f64 / MS_PER_MINUTE
    }

    /// Progress at `now_ms`, capped at 100.
    pub fn progress_at(&self, now_ms: i64) -> f64 {
        if self.estimated_duration_minutes <= 0.0 {
            return 100.0;
        }
        let pct = self.elapsed_minutes(now_ms) / self.estimated_duration_minutes * 100.0;
        pct.clamp(0.0, 100.0)
    }

    /// Minutes left at `now_ms`, never negative.
    pub fn minutes_remaining(&self, now_ms: i64) -> f64 {
        (self.estimated_duration_minutes - self.elapsed_minutes(now_ms)).max(0.0)
    }

    /// Saturates at `i64::MAX` for corrupted or absurd durations.
    pub fn estimated_finish_time(&self) -> i64 {
        self.start_time
            .saturating_add(self.estimated_duration_ms().round() as i64)
    }

    pub fn timer_ref(&self) -> TimerRef {
        TimerRef {
            order_id: self.order_id.clone(),
            item_id: self.item_id.clone(),
            item_name: self.item_name.clone(),
        }
    }
}

/// Identity plus display name, the payload of most lifecycle events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerRef {
    pub order_id: String,
    pub item_id: String,
    pub item_name: String,
}

/// Per-tick progress payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerUpdate {
    pub order_id: String,
    pub item_id: String,
    pub item_name: String,
    pub progress: f64,
    pub status: TimerStatus,
    /// Minutes.
    pub time_remaining: f64,
    /// Epoch ms.
    pub estimated_finish_time: i64,
}

/// Counts by status over the live collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerStats {
    pub total: usize,
    pub active: usize,
    pub paused: usize,
    pub completed: usize,
    pub cancelled: usize,
}

impl TimerStats {
    pub fn tally<'a>(timers: impl IntoIterator<Item = &'a OrderTimer>) -> Self {
        timers
            .into_iter()
            .fold(Self::default(), |mut stats, timer| {
                stats.total += 1;
                match timer.status {
                    TimerStatus::Active => stats.active += 1,
                    TimerStatus::Paused => stats.paused += 1,
                    TimerStatus::Completed => stats.completed += 1,
                    TimerStatus::Cancelled => stats.cancelled += 1,
                }
                stats
            })
    }
}

// ---------------------------------------------------------------------------
// Progress bands (presentation helpers)
// ---------------------------------------------------------------------------

/// Color/label band for a progress value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressBand {
    Starting,
    InProgress,
    Halfway,
    AlmostReady,
    ShouldBeReady,
    Completed,
}

impl ProgressBand {
    /// Thresholds are exclusive upper bounds: 25 is already "In Progress".
    pub fn from_progress(progress: f64) -> Self {
        if progress < 25.0 {
            Self::Starting
        } else if progress < 50.0 {
            Self::InProgress
        } else if progress < 75.0 {
            Self::Halfway
        } else if progress < 90.0 {
            Self::AlmostReady
        } else if progress < 100.0 {
            Self::ShouldBeReady
        } else {
            Self::Completed
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            Self::Starting => "#10B981",
            Self::InProgress => "#84CC16",
            Self::Halfway => "#F59E0B",
            Self::AlmostReady => "#F97316",
            Self::ShouldBeReady => "#EF4444",
            Self::Completed => "#8B5CF6",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Starting => "Starting",
            Self::InProgress => "In Progress",
            Self::Halfway => "Halfway",
            Self::AlmostReady => "Almost Ready",
            Self::ShouldBeReady => "Should be Ready",
            Self::Completed => "Completed",
        }
    }
}

pub fn progress_color(progress: f64) -> &'static str {
    ProgressBand::from_progress(progress).color()
}

pub fn progress_label(progress: f64) -> &'static str {
    ProgressBand::from_progress(progress).label()
}

// ===========================================================================
// Tests
// ===========================================================================
