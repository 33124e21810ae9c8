//! Local notification contract for kitchen timers.
//!
//! The engine treats notifications as best-effort UX: a failed schedule or
//! cancel is logged and the timer keeps running. Hosts plug in the platform
//! scheduler by implementing [`Notifier`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::timer::OrderTimer;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification permission not granted")]
    PermissionDenied,
    #[error("notification scheduler unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TimerComplete,
    TimerProgress,
}

/// Data attached to a notification so a tap/delivery can be routed back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
    pub order_id: String,
    pub item_id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub title: String,
    pub body: String,
    pub data: NotificationData,
}

impl NotificationRequest {
    /// Scheduled "ready" alert.
    pub fn completion_scheduled(timer: &OrderTimer) -> Self {
        Self {
            title: "Order Ready!".to_string(),
            body: format!(
                "{} in order {} is ready to serve",
                timer.item_name, timer.order_id
            ),
            data: NotificationData {
                order_id: timer.order_id.clone(),
                item_id: timer.item_id.clone(),
                kind: NotificationKind::TimerComplete,
                progress: None,
            },
        }
    }

    /// Immediate alert for a timer that completed while backgrounded.
    pub fn completion_now(timer: &OrderTimer) -> Self {
        Self {
            title: "Order Item Ready!".to_string(),
            body: format!(
                "{} from order {} is ready to serve!",
                timer.item_name, timer.order_id
            ),
            data: NotificationData {
                order_id: timer.order_id.clone(),
                item_id: timer.item_id.clone(),
                kind: NotificationKind::TimerComplete,
                progress: None,
            },
        }
    }

    pub fn milestone(timer: &OrderTimer, percent: u8) -> Self {
        Self {
            title: format!("{} Update", timer.item_name),
            body: format!("{percent}% progress - order {}", timer.order_id),
            data: NotificationData {
                order_id: timer.order_id.clone(),
                item_id: timer.item_id.clone(),
                kind: NotificationKind::TimerProgress,
                progress: Some(percent),
            },
        }
    }
}

pub trait Notifier: Send + Sync {
    /// Schedule a one-shot alert `delay` from now. Returns the handle used
    /// to cancel it.
    fn schedule(
        &self,
        request: &NotificationRequest,
        delay: Duration,
    ) -> Result<String, NotifyError>;

    fn cancel(&self, notification_id: &str) -> Result<(), NotifyError>;

    /// Show an alert right away.
    fn present(&self, request: &NotificationRequest) -> Result<(), NotifyError>;
}

/// Notifier for headless terminals: writes notifications to the log and
/// keeps track of what is pending.
#[derive(Debug, Default)]
pub struct LogNotifier {
    pending: Mutex<HashMap<String, NotificationRequest>>,
}

impl LogNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl Notifier for LogNotifier {
    fn schedule(
        &self,
        request: &NotificationRequest,
        delay: Duration,
    ) -> Result<String, NotifyError> {
        let id = Uuid::new_v4().to_string();
        info!(
            notification_id = %id,
            order_id = %request.data.order_id,
            item_id = %request.data.item_id,
            delay_secs = delay.as_secs(),
            title = %request.title,
            "Notification scheduled"
        );
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), request.clone());
        Ok(id)
    }

    fn cancel(&self, notification_id: &str) -> Result<(), NotifyError> {
        let removed = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(notification_id);
        if removed.is_some() {
            info!(notification_id = %notification_id, "Notification cancelled");
        }
        Ok(())
    }

    fn present(&self, request: &NotificationRequest) -> Result<(), NotifyError> {
        info!(
            order_id = %request.data.order_id,
            item_id = %request.data.item_id,
            title = %request.title,
            body = %request.body,
            "Notification presented"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------
