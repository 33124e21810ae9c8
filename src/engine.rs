//! Kitchen order timer engine.
//!
//! Owns every cooking timer on the terminal. All state changes go through
//! the methods below; each one mutates memory synchronously, emits the
//! matching [`TimerEvent`], and hands a full snapshot to the [`Persister`].
//!
//! Time handling:
//! - progress is always recomputed from wall-clock time (`now - start_time`),
//!   never accumulated, so a missed tick cannot cause drift
//! - pausing freezes `last_update_time`; resuming shifts `start_time` forward
//!   by the paused span so the pause does not count as cooking time
//! - after a background period every active timer is re-ticked at once
//! - on startup, persisted active timers are resumed while still inside the
//!   recovery grace window and recovered as completed otherwise

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::events::{EventBus, NotificationRef, SubscriptionId, TimerEvent, TimerEventKind};
use crate::notifications::{NotificationRequest, Notifier};
use crate::persist::Persister;
use crate::timer::{OrderTimer, TimerKey, TimerStats, TimerStatus, TimerUpdate, MS_PER_MINUTE};

#[derive(Debug, Error, PartialEq)]
pub enum TimerError {
    #[error("a timer is already running for {0}")]
    AlreadyRunning(TimerKey),
    #[error("estimated duration must be a positive number of minutes (got {0})")]
    InvalidDuration(f64),
}

/// Foreground state reported by the host platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AppState {
    #[default]
    Active,
    Inactive,
    Background,
}

impl AppState {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" | "foreground" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            "background" => Some(Self::Background),
            _ => None,
        }
    }
}

/// Outcome of [`TimerEngine::recover`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub resumed: usize,
    pub paused: usize,
    pub auto_completed: usize,
    pub pruned: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completion {
    Manual,
    Auto,
}

pub struct TimerEngine {
    timers: BTreeMap<TimerKey, OrderTimer>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    persister: Persister,
    events: EventBus,
    config: EngineConfig,
    app_state: AppState,
    background_entered_at: Option<i64>,
}

impl TimerEngine {
    pub fn new(
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        persister: Persister,
        config: EngineConfig,
    ) -> Self {
        Self {
            timers: BTreeMap::new(),
            clock,
            notifier,
            persister,
            events: EventBus::new(),
            config,
            app_state: AppState::Active,
            background_entered_at: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn app_state(&self) -> AppState {
        self.app_state
    }

    // -----------------------------------------------------------------------
    // Startup recovery
    // -----------------------------------------------------------------------

    /// Load the persisted snapshot and reconcile it against the current time.
    ///
    /// Active timers inside the grace window keep running; older ones are
    /// marked completed without notifications or events. Paused timers are
    /// restored as paused. Completed and cancelled records are pruned.
    pub fn recover(&mut self) -> RecoveryReport {
        let mut report = RecoveryReport::default();
        let stored = match self.persister.store().load() {
            Ok(timers) => timers,
            Err(e) => {
                warn!(error = %e, "Error loading persisted timers");
                return report;
            }
        };
        if stored.is_empty() {
            return report;
        }

        let now = self.clock.now_ms();
        for mut timer in stored {
            match timer.status {
                TimerStatus::Active => {
                    let total_elapsed = now.saturating_sub(timer.start_time) as f64;
                    let cutoff = timer.estimated_duration_ms() * self.config.recovery_grace_factor;
                    if total_elapsed < cutoff {
                        timer.last_update_time = now;
                        timer.current_progress =
                            timer.progress_at(now).max(timer.current_progress);
                        report.resumed += 1;
                    } else {
                        timer.status = TimerStatus::Completed;
                        timer.current_progress = 100.0;
                        timer.notification_id = None;
                        timer.milestone_notification_ids.clear();
                        report.auto_completed += 1;
                    }
                }
                TimerStatus::Paused => report.paused += 1,
                TimerStatus::Completed | TimerStatus::Cancelled => {
                    report.pruned += 1;
                    continue;
                }
            }
            self.timers.insert(timer.key(), timer);
        }

        info!(
            resumed = report.resumed,
            paused = report.paused,
            auto_completed = report.auto_completed,
            pruned = report.pruned,
            "Recovered persisted timers"
        );
        self.persist();
        report
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Start cooking `item_id` of `order_id`.
    ///
    /// Fails when a live (active or paused) timer already exists for the
    /// key. A completed timer for the same key is replaced.
    pub fn start_timer(
        &mut self,
        order_id: &str,
        item_id: &str,
        item_name: &str,
        estimated_minutes: f64,
    ) -> Result<(), TimerError> {
        // The millisecond span must fit the i64 timestamps it is added to.
        if !estimated_minutes.is_finite()
            || estimated_minutes <= 0.0
            || estimated_minutes * MS_PER_MINUTE >= i64::MAX as f64
        {
            return Err(TimerError::InvalidDuration(estimated_minutes));
        }
        let key = TimerKey::new(order_id, item_id);
        if self
            .timers
            .get(&key)
            .is_some_and(|existing| existing.status.is_live())
        {
            return Err(TimerError::AlreadyRunning(key));
        }

        let now = self.clock.now_ms();
        let timer = OrderTimer::new(order_id, item_id, item_name, estimated_minutes, now);
        let timer_ref = timer.timer_ref();
        self.timers.insert(key.clone(), timer);
        self.schedule_notifications(&key, now);
        self.persist();

        info!(
            order_id = %order_id,
            item_id = %item_id,
            item_name = %item_name,
            estimated_minutes = estimated_minutes,
            "Timer started"
        );
        self.events.emit(&TimerEvent::TimerStarted(timer_ref));
        Ok(())
    }

    /// Advance every active timer. Called by the driver loop.
    pub fn tick_all(&mut self) {
        let keys = self.keys_with_status(TimerStatus::Active);
        if keys.is_empty() {
            return;
        }
        for key in &keys {
            self.advance(key);
        }
        self.persist();
    }

    /// Advance one timer. No-op for unknown or non-active keys.
    pub fn tick(&mut self, order_id: &str, item_id: &str) {
        if self.advance(&TimerKey::new(order_id, item_id)) {
            self.persist();
        }
    }

    pub fn pause_timer(&mut self, order_id: &str, item_id: &str) {
        let key = TimerKey::new(order_id, item_id);
        let now = self.clock.now_ms();
        let Some(timer) = self.timers.get_mut(&key) else {
            debug!(key = %key, "pause ignored: no timer");
            return;
        };
        if timer.status != TimerStatus::Active {
            debug!(key = %key, status = %timer.status, "pause ignored");
            return;
        }

        timer.current_progress = timer.progress_at(now).max(timer.current_progress);
        timer.status = TimerStatus::Paused;
        timer.last_update_time = now;
        let pending = take_notification_ids(timer);
        let timer_ref = timer.timer_ref();

        self.cancel_notifications(&pending);
        info!(order_id = %order_id, item_id = %item_id, "Timer paused");
        self.events.emit(&TimerEvent::TimerPaused(timer_ref));
        self.persist();
    }

    pub fn resume_timer(&mut self, order_id: &str, item_id: &str) {
        let key = TimerKey::new(order_id, item_id);
        let now = self.clock.now_ms();
        let Some(timer) = self.timers.get_mut(&key) else {
            debug!(key = %key, "resume ignored: no timer");
            return;
        };
        if timer.status != TimerStatus::Paused {
            debug!(key = %key, status = %timer.status, "resume ignored");
            return;
        }

        let paused_ms = now.saturating_sub(timer.last_update_time).max(0);
        timer.start_time = timer.start_time.saturating_add(paused_ms);
        timer.status = TimerStatus::Active;
        timer.last_update_time = now;
        let timer_ref = timer.timer_ref();

        self.schedule_notifications(&key, now);
        info!(
            order_id = %order_id,
            item_id = %item_id,
            paused_ms = paused_ms,
            "Timer resumed"
        );
        self.events.emit(&TimerEvent::TimerResumed(timer_ref));
        self.persist();
    }

    /// Mark a timer done. Calling it again on a finished timer is a no-op.
    pub fn complete_timer(&mut self, order_id: &str, item_id: &str) {
        let now = self.clock.now_ms();
        if self.finish(&TimerKey::new(order_id, item_id), now, Completion::Manual) {
            self.persist();
        }
    }

    /// Cancel and forget a timer.
    pub fn cancel_timer(&mut self, order_id: &str, item_id: &str) {
        let key = TimerKey::new(order_id, item_id);
        let Some(mut timer) = self.timers.remove(&key) else {
            debug!(key = %key, "cancel ignored: no timer");
            return;
        };

        timer.status = TimerStatus::Cancelled;
        timer.last_update_time = self.clock.now_ms();
        let pending = take_notification_ids(&mut timer);
        self.cancel_notifications(&pending);

        info!(order_id = %order_id, item_id = %item_id, "Timer cancelled");
        self.events.emit(&TimerEvent::TimerCancelled(timer.timer_ref()));
        self.persist();
    }

    /// Drop completed timers of an order once the UI no longer shows them.
    /// Returns how many were removed.
    pub fn clear_completed(&mut self, order_id: &str) -> usize {
        let before = self.timers.len();
        self.timers
            .retain(|_, t| !(t.order_id == order_id && t.status == TimerStatus::Completed));
        let removed = before - self.timers.len();
        if removed > 0 {
            debug!(order_id = %order_id, removed = removed, "Cleared completed timers");
            self.persist();
        }
        removed
    }

    // -----------------------------------------------------------------------
    // Platform signals
    // -----------------------------------------------------------------------

    /// Follow a foreground/background transition.
    ///
    /// Entering the background records the instant once; coming back to
    /// `Active` after a recorded background period re-ticks every active
    /// timer from wall-clock time and clears the record.
    pub fn handle_app_state(&mut self, next: AppState) {
        let now = self.clock.now_ms();
        self.app_state = next;
        match next {
            AppState::Background => {
                if self.background_entered_at.is_none() {
                    self.background_entered_at = Some(now);
                    debug!("App entered background");
                }
            }
            AppState::Active => self.reconcile_after_background(now),
            AppState::Inactive => {}
        }
    }

    fn reconcile_after_background(&mut self, now: i64) {
        let Some(entered_at) = self.background_entered_at.take() else {
            return;
        };
        let keys = self.keys_with_status(TimerStatus::Active);
        info!(
            background_ms = now.saturating_sub(entered_at),
            active = keys.len(),
            "Syncing timers after background"
        );
        for key in &keys {
            if let Some(timer) = self.timers.get_mut(key) {
                timer.last_update_time = now;
            }
            self.advance(key);
        }
        self.persist();
    }

    /// A `timer_complete` notification was delivered while in the foreground.
    pub fn handle_notification_received(&mut self, order_id: &str, item_id: &str) {
        debug!(order_id = %order_id, item_id = %item_id, "Timer notification received");
        self.events
            .emit(&TimerEvent::NotificationReceived(NotificationRef {
                order_id: order_id.to_string(),
                item_id: item_id.to_string(),
            }));
    }

    /// Write the current state now (shutdown path).
    pub fn flush(&self) {
        self.persist();
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    pub fn subscribe<F>(&mut self, kind: TimerEventKind, listener: F) -> SubscriptionId
    where
        F: Fn(&TimerEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(kind, listener)
    }

    pub fn subscribe_all<F>(&mut self, listener: F) -> SubscriptionId
    where
        F: Fn(&TimerEvent) + Send + Sync + 'static,
    {
        self.events.subscribe_all(listener)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    pub fn clear_listeners(&mut self) {
        self.events.clear(None);
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn timer(&self, order_id: &str, item_id: &str) -> Option<&OrderTimer> {
        self.timers.get(&TimerKey::new(order_id, item_id))
    }

    /// Last computed progress, 0 for unknown keys.
    pub fn timer_progress(&self, order_id: &str, item_id: &str) -> f64 {
        self.timer(order_id, item_id)
            .map_or(0.0, |t| t.current_progress)
    }

    /// `None` means no timer (inactive).
    pub fn timer_status(&self, order_id: &str, item_id: &str) -> Option<TimerStatus> {
        self.timer(order_id, item_id).map(|t| t.status)
    }

    /// Active and paused timers.
    pub fn active_timers(&self) -> Vec<OrderTimer> {
        self.timers
            .values()
            .filter(|t| t.status.is_live())
            .cloned()
            .collect()
    }

    /// Every timer of an order, whatever its status.
    pub fn order_timers(&self, order_id: &str) -> Vec<OrderTimer> {
        self.timers
            .values()
            .filter(|t| t.order_id == order_id)
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> TimerStats {
        TimerStats::tally(self.timers.values())
    }

    pub fn snapshot(&self) -> Vec<OrderTimer> {
        self.timers.values().cloned().collect()
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn keys_with_status(&self, status: TimerStatus) -> Vec<TimerKey> {
        self.timers
            .iter()
            .filter(|(_, t)| t.status == status)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Recompute progress and emit an update; auto-completes at 100%.
    /// Returns `false` when the key is missing or not active.
    fn advance(&mut self, key: &TimerKey) -> bool {
        let now = self.clock.now_ms();
        let Some(timer) = self.timers.get_mut(key) else {
            return false;
        };
        if timer.status != TimerStatus::Active {
            return false;
        }

        let progress = timer.progress_at(now).max(timer.current_progress);
        timer.current_progress = progress;
        timer.last_update_time = now;

        let update = TimerUpdate {
            order_id: timer.order_id.clone(),
            item_id: timer.item_id.clone(),
            item_name: timer.item_name.clone(),
            progress,
            status: timer.status,
            time_remaining: timer.minutes_remaining(now),
            estimated_finish_time: timer.estimated_finish_time(),
        };
        self.events.emit(&TimerEvent::TimerUpdate(update));

        if progress >= 100.0 {
            self.finish(key, now, Completion::Auto);
        }
        true
    }

    fn finish(&mut self, key: &TimerKey, now: i64, cause: Completion) -> bool {
        let Some(timer) = self.timers.get_mut(key) else {
            debug!(key = %key, "complete ignored: no timer");
            return false;
        };
        if !timer.status.is_live() {
            debug!(key = %key, status = %timer.status, "complete ignored");
            return false;
        }

        timer.status = TimerStatus::Completed;
        timer.current_progress = 100.0;
        timer.last_update_time = now;
        // An automatic finish coincides with the scheduled alert, so that
        // one is left to fire. A manual finish makes it stale.
        let pending = match cause {
            Completion::Manual => take_notification_ids(timer),
            Completion::Auto => {
                timer.notification_id = None;
                std::mem::take(&mut timer.milestone_notification_ids)
            }
        };
        let present_now =
            (self.app_state != AppState::Active).then(|| NotificationRequest::completion_now(timer));
        let timer_ref = timer.timer_ref();

        self.cancel_notifications(&pending);
        if let Some(request) = present_now {
            if let Err(e) = self.notifier.present(&request) {
                warn!(key = %key, error = %e, "Error sending completion notification");
            }
        }

        info!(
            order_id = %timer_ref.order_id,
            item_id = %timer_ref.item_id,
            manual = cause == Completion::Manual,
            "Timer completed"
        );
        self.events.emit(&TimerEvent::TimerCompleted(timer_ref));
        true
    }

    /// Schedule the completion alert (and milestone alerts) relative to the
    /// timer's current effective start.
    fn schedule_notifications(&mut self, key: &TimerKey, now: i64) {
        let notifier = self.notifier.clone();
        let min_delay = self.config.min_notification_delay;
        let milestones = self.config.progress_milestones.clone();
        let Some(timer) = self.timers.get_mut(key) else {
            return;
        };

        let elapsed_ms = now.saturating_sub(timer.start_time).max(0) as f64;
        let remaining_ms = (timer.estimated_duration_ms() - elapsed_ms).max(0.0);
        let delay = Duration::from_millis(remaining_ms.round() as u64).max(min_delay);
        match notifier.schedule(&NotificationRequest::completion_scheduled(timer), delay) {
            Ok(id) => timer.notification_id = Some(id),
            Err(e) => warn!(key = %key, error = %e, "Error scheduling notification"),
        }

        for percent in milestones {
            let trigger_minutes =
                (timer.estimated_duration_minutes * f64::from(percent) / 100.0).floor();
            if trigger_minutes < 1.0 {
                debug!(key = %key, percent = percent, "Skipping milestone under one minute");
                continue;
            }
            let delay_ms = trigger_minutes * MS_PER_MINUTE - elapsed_ms;
            if delay_ms <= 0.0 {
                continue;
            }
            let delay = Duration::from_millis(delay_ms.round() as u64);
            match notifier.schedule(&NotificationRequest::milestone(timer, percent), delay) {
                Ok(id) => timer.milestone_notification_ids.push(id),
                Err(e) => warn!(
                    key = %key,
                    percent = percent,
                    error = %e,
                    "Error scheduling milestone notification"
                ),
            }
        }
    }

    fn cancel_notifications(&self, ids: &[String]) {
        for id in ids {
            if let Err(e) = self.notifier.cancel(id) {
                warn!(notification_id = %id, error = %e, "Error cancelling notification");
            }
        }
    }

    fn persist(&self) {
        self.persister.submit(self.snapshot());
    }
}

fn take_notification_ids(timer: &mut OrderTimer) -> Vec<String> {
    let mut ids = std::mem::take(&mut timer.milestone_notification_ids);
    if let Some(id) = timer.notification_id.take() {
        ids.insert(0, id);
    }
    ids
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::notifications::testing::RecordingNotifier;
    use crate::notifications::NotificationKind;
    use crate::store::{MemoryTimerStore, TimerStore};
    use std::sync::Mutex;

    const T0: i64 = 1_700_000_000_000;
    const MINUTE: i64 = 60_000;

    struct Harness {
        engine: TimerEngine,
        clock: ManualClock,
        notifier: Arc<RecordingNotifier>,
        store: Arc<MemoryTimerStore>,
        events: Arc<Mutex<Vec<TimerEvent>>>,
    }

    fn harness_with(store: MemoryTimerStore, config: EngineConfig) -> Harness {
        let clock = ManualClock::new(T0);
        let notifier = Arc::new(RecordingNotifier::default());
        let store = Arc::new(store);
        let mut engine = TimerEngine::new(
            Arc::new(clock.clone()),
            notifier.clone(),
            Persister::inline(store.clone()),
            config,
        );
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        engine.subscribe_all(move |e| sink.lock().unwrap().push(e.clone()));
        Harness {
            engine,
            clock,
            notifier,
            store,
            events,
        }
    }

    fn harness() -> Harness {
        harness_with(MemoryTimerStore::new(), EngineConfig::default())
    }

    impl Harness {
        fn kinds(&self) -> Vec<TimerEventKind> {
            self.events.lock().unwrap().iter().map(TimerEvent::kind).collect()
        }

        fn kinds_without_updates(&self) -> Vec<TimerEventKind> {
            self.kinds()
                .into_iter()
                .filter(|k| *k != TimerEventKind::Update)
                .collect()
        }

        fn last_update(&self) -> Option<TimerUpdate> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find_map(|e| match e {
                    TimerEvent::TimerUpdate(u) => Some(u.clone()),
                    _ => None,
                })
        }
    }

    fn persisted(at: i64, minutes: f64, status: TimerStatus, item: &str) -> OrderTimer {
        let mut timer = OrderTimer::new("ORD-9", item, "Brisket", minutes, at);
        timer.status = status;
        timer
    }

    #[test]
    fn test_start_creates_active_timer() {
        let mut h = harness();
        h.engine.start_timer("ORD-1", "1", "Burger", 10.0).unwrap();

        let timer = h.engine.timer("ORD-1", "1").unwrap();
        assert_eq!(timer.status, TimerStatus::Active);
        assert_eq!(timer.start_time, T0);
        assert_eq!(timer.current_progress, 0.0);
        assert_eq!(timer.notification_id.as_deref(), Some("n1"));
        assert_eq!(
            h.notifier.scheduled_delays(NotificationKind::TimerComplete),
            vec![Duration::from_secs(600)]
        );
        assert_eq!(h.kinds(), vec![TimerEventKind::Started]);

        let saved = h.store.load().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].notification_id.as_deref(), Some("n1"));
    }

    #[test]
    fn test_start_rejects_invalid_duration() {
        let mut h = harness();
        assert_eq!(
            h.engine.start_timer("o", "i", "X", 0.0),
            Err(TimerError::InvalidDuration(0.0))
        );
        assert!(h.engine.start_timer("o", "i", "X", -3.0).is_err());
        assert!(h.engine.start_timer("o", "i", "X", f64::NAN).is_err());
        assert!(h.engine.active_timers().is_empty());
        assert!(h.kinds().is_empty());
    }

    #[test]
    fn test_huge_durations_do_not_overflow_ticks() {
        let mut h = harness();
        assert_eq!(
            h.engine.start_timer("o", "i", "Slow", 1e300),
            Err(TimerError::InvalidDuration(1e300))
        );

        // largest spans that still fit in a millisecond timestamp keep ticking
        h.engine.start_timer("o", "j", "Slow", 1.5e14).unwrap();
        h.clock.advance_minutes(1);
        h.engine.tick_all();
        assert_eq!(h.engine.timer_status("o", "j"), Some(TimerStatus::Active));
        let update = h.last_update().unwrap();
        assert!(update.estimated_finish_time > T0);
    }

    #[test]
    fn test_duplicate_start_rejected_while_live() {
        let mut h = harness();
        h.engine.start_timer("o", "i", "Soup", 10.0).unwrap();
        h.clock.advance_minutes(2);
        h.engine.tick_all();

        let err = h.engine.start_timer("o", "i", "Soup v2", 5.0).unwrap_err();
        assert_eq!(err, TimerError::AlreadyRunning(TimerKey::new("o", "i")));
        let timer = h.engine.timer("o", "i").unwrap();
        assert_eq!(timer.item_name, "Soup");
        assert_eq!(timer.start_time, T0);

        h.engine.pause_timer("o", "i");
        assert!(h.engine.start_timer("o", "i", "Soup", 10.0).is_err());
    }

    #[test]
    fn test_restart_allowed_after_completion() {
        let mut h = harness();
        h.engine.start_timer("o", "i", "Soup", 10.0).unwrap();
        h.engine.complete_timer("o", "i");
        h.clock.advance_minutes(1);
        h.engine.start_timer("o", "i", "Soup", 4.0).unwrap();
        let timer = h.engine.timer("o", "i").unwrap();
        assert_eq!(timer.status, TimerStatus::Active);
        assert_eq!(timer.start_time, T0 + MINUTE);
    }

    #[test]
    fn test_tick_reports_progress_and_remaining() {
        let mut h = harness();
        h.engine.start_timer("o", "i", "Rice", 10.0).unwrap();
        h.clock.advance_minutes(3);
        h.engine.tick_all();

        let update = h.last_update().unwrap();
        assert!((update.progress - 30.0).abs() < 1e-9);
        assert!((update.time_remaining - 7.0).abs() < 1e-9);
        assert_eq!(update.estimated_finish_time, T0 + 10 * MINUTE);
        assert_eq!(update.status, TimerStatus::Active);
        assert_eq!(update.item_name, "Rice");
        assert_eq!(h.engine.timer("o", "i").unwrap().last_update_time, T0 + 3 * MINUTE);
    }

    #[test]
    fn test_progress_monotonic_and_capped() {
        let mut h = harness();
        h.engine.start_timer("o", "i", "Stew", 10.0).unwrap();
        let mut last = 0.0;
        for _ in 0..15 {
            h.clock.advance_minutes(1);
            h.engine.tick("o", "i");
            let p = h.engine.timer_progress("o", "i");
            assert!(p >= last, "progress went backwards: {p} < {last}");
            assert!(p <= 100.0);
            last = p;
        }
        assert_eq!(last, 100.0);
    }

    #[test]
    fn test_wall_clock_step_back_does_not_reduce_progress() {
        let mut h = harness();
        h.engine.start_timer("o", "i", "Stew", 10.0).unwrap();
        h.clock.advance_minutes(5);
        h.engine.tick_all();
        h.clock.set(T0 + 2 * MINUTE);
        h.engine.tick_all();
        assert!((h.engine.timer_progress("o", "i") - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_auto_complete_on_full_progress() {
        let mut h = harness();
        h.engine.start_timer("o", "i", "Toast", 2.0).unwrap();
        h.clock.advance_minutes(2);
        h.engine.tick_all();

        assert_eq!(h.engine.timer_status("o", "i"), Some(TimerStatus::Completed));
        assert_eq!(h.engine.timer_progress("o", "i"), 100.0);
        assert_eq!(
            h.kinds(),
            vec![
                TimerEventKind::Started,
                TimerEventKind::Update,
                TimerEventKind::Completed
            ]
        );
        // foreground auto-completion leaves the due alert alone
        assert!(h.notifier.cancelled().is_empty());
        assert_eq!(h.notifier.presented(), 0);

        h.clock.advance_minutes(1);
        h.engine.tick_all();
        assert_eq!(h.kinds().len(), 3, "completed timers no longer tick");
    }

    #[test]
    fn test_pause_resume_excludes_paused_time() {
        let mut h = harness();
        h.engine.start_timer("o", "i", "Roast", 10.0).unwrap();
        h.clock.advance_minutes(3);
        h.engine.tick_all();
        h.engine.pause_timer("o", "i");

        h.clock.advance_minutes(5);
        h.engine.tick_all();
        assert!((h.engine.timer_progress("o", "i") - 30.0).abs() < 1e-9);

        h.engine.resume_timer("o", "i");
        h.clock.advance_minutes(2);
        h.engine.tick_all();

        let progress = h.engine.timer_progress("o", "i");
        assert!((progress - 50.0).abs() < 1e-9, "got {progress}");
        assert_eq!(h.engine.timer("o", "i").unwrap().start_time, T0 + 5 * MINUTE);
        assert_eq!(
            h.kinds_without_updates(),
            vec![
                TimerEventKind::Started,
                TimerEventKind::Paused,
                TimerEventKind::Resumed
            ]
        );
    }

    #[test]
    fn test_pause_cancels_and_resume_reschedules_remaining_time() {
        let mut h = harness();
        h.engine.start_timer("o", "i", "Roast", 10.0).unwrap();
        h.clock.advance_minutes(4);
        h.engine.pause_timer("o", "i");
        assert_eq!(h.notifier.cancelled(), vec!["n1".to_string()]);
        assert!(h.engine.timer("o", "i").unwrap().notification_id.is_none());

        h.clock.advance_minutes(7);
        h.engine.resume_timer("o", "i");
        assert_eq!(
            h.notifier.scheduled_delays(NotificationKind::TimerComplete),
            vec![Duration::from_secs(600), Duration::from_secs(360)]
        );
        assert_eq!(
            h.engine.timer("o", "i").unwrap().notification_id.as_deref(),
            Some("n2")
        );
    }

    #[test]
    fn test_notification_delay_has_floor() {
        let mut h = harness();
        h.engine.start_timer("o", "i", "Espresso", 0.02).unwrap();
        assert_eq!(
            h.notifier.scheduled_delays(NotificationKind::TimerComplete),
            vec![Duration::from_secs(5)]
        );
    }

    #[test]
    fn test_invalid_targets_are_noops() {
        let mut h = harness();
        h.engine.pause_timer("x", "y");
        h.engine.resume_timer("x", "y");
        h.engine.complete_timer("x", "y");
        h.engine.cancel_timer("x", "y");
        h.engine.tick("x", "y");

        h.engine.start_timer("o", "i", "Pie", 10.0).unwrap();
        h.engine.resume_timer("o", "i");
        h.engine.pause_timer("o", "i");
        h.engine.pause_timer("o", "i");
        assert_eq!(
            h.kinds(),
            vec![TimerEventKind::Started, TimerEventKind::Paused]
        );
        assert_eq!(h.store.write_count(), 2);
    }

    #[test]
    fn test_complete_is_idempotent() {
        let mut h = harness();
        h.engine.start_timer("o", "i", "Cake", 30.0).unwrap();
        h.engine.complete_timer("o", "i");
        h.engine.complete_timer("o", "i");

        assert_eq!(h.engine.timer_progress("o", "i"), 100.0);
        assert_eq!(h.engine.timer_status("o", "i"), Some(TimerStatus::Completed));
        assert_eq!(
            h.kinds(),
            vec![TimerEventKind::Started, TimerEventKind::Completed]
        );
        // manual completion cancels the now-stale alert
        assert_eq!(h.notifier.cancelled(), vec!["n1".to_string()]);
    }

    #[test]
    fn test_complete_paused_timer() {
        let mut h = harness();
        h.engine.start_timer("o", "i", "Cake", 30.0).unwrap();
        h.engine.pause_timer("o", "i");
        h.engine.complete_timer("o", "i");
        assert_eq!(h.engine.timer_status("o", "i"), Some(TimerStatus::Completed));
        h.engine.resume_timer("o", "i");
        assert_eq!(h.engine.timer_status("o", "i"), Some(TimerStatus::Completed));
    }

    #[test]
    fn test_cancel_removes_timer() {
        let mut h = harness();
        h.engine.start_timer("o", "i", "Fish", 12.0).unwrap();
        h.engine.start_timer("o", "j", "Chips", 6.0).unwrap();
        h.engine.cancel_timer("o", "i");

        assert_eq!(h.engine.timer_status("o", "i"), None);
        assert_eq!(h.engine.timer_progress("o", "i"), 0.0);
        assert!(h
            .engine
            .active_timers()
            .iter()
            .all(|t| t.item_id != "i"));
        assert_eq!(h.notifier.cancelled(), vec!["n1".to_string()]);
        assert_eq!(h.store.load().unwrap().len(), 1);

        h.clock.advance_minutes(20);
        h.engine.tick("o", "i");
        assert_eq!(
            h.kinds_without_updates(),
            vec![
                TimerEventKind::Started,
                TimerEventKind::Started,
                TimerEventKind::Cancelled
            ]
        );
    }

    #[test]
    fn test_background_completion_presents_notification() {
        let mut h = harness();
        h.engine.start_timer("o", "i", "Bread", 1.0).unwrap();
        h.engine.handle_app_state(AppState::Background);
        h.clock.advance_minutes(1);
        h.engine.tick_all();
        assert_eq!(h.notifier.presented(), 1);

        h.engine.start_timer("o", "j", "Bread", 1.0).unwrap();
        h.engine.handle_app_state(AppState::Active);
        h.engine.complete_timer("o", "j");
        assert_eq!(h.notifier.presented(), 1);
    }

    #[test]
    fn test_foreground_reconciles_background_gap() {
        let mut h = harness();
        h.engine.start_timer("o", "i", "Pho", 10.0).unwrap();
        h.engine.tick_all();
        h.engine.handle_app_state(AppState::Background);

        h.clock.advance_minutes(4);
        assert_eq!(h.engine.timer_progress("o", "i"), 0.0);

        h.engine.handle_app_state(AppState::Active);
        assert!((h.engine.timer_progress("o", "i") - 40.0).abs() < 1e-9);
        assert_eq!(
            h.engine.timer("o", "i").unwrap().last_update_time,
            T0 + 4 * MINUTE
        );
        assert_eq!(h.engine.app_state(), AppState::Active);
    }

    #[test]
    fn test_reconcile_runs_once_per_background_period() {
        let mut h = harness();
        h.engine.start_timer("o", "i", "Pho", 10.0).unwrap();

        // no background period recorded: nothing happens
        h.engine.handle_app_state(AppState::Active);
        assert_eq!(h.kinds(), vec![TimerEventKind::Started]);

        h.engine.handle_app_state(AppState::Inactive);
        h.engine.handle_app_state(AppState::Background);
        h.clock.advance_minutes(1);
        h.engine.handle_app_state(AppState::Background);
        h.clock.advance_minutes(1);
        h.engine.handle_app_state(AppState::Active);
        h.engine.handle_app_state(AppState::Active);

        let updates = h
            .kinds()
            .into_iter()
            .filter(|k| *k == TimerEventKind::Update)
            .count();
        assert_eq!(updates, 1);
        assert!((h.engine.timer_progress("o", "i") - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_reconcile_completes_overdue_timers() {
        let mut h = harness();
        h.engine.start_timer("o", "i", "Egg", 3.0).unwrap();
        h.engine.handle_app_state(AppState::Background);
        h.clock.advance_minutes(5);
        h.engine.handle_app_state(AppState::Active);
        assert_eq!(h.engine.timer_status("o", "i"), Some(TimerStatus::Completed));
        assert_eq!(h.notifier.presented(), 0);
    }

    #[test]
    fn test_recovery_grace_window() {
        let stored = vec![
            persisted(T0 - 12 * MINUTE, 10.0, TimerStatus::Active, "within"),
            persisted(T0 - 16 * MINUTE, 10.0, TimerStatus::Active, "over"),
        ];
        let mut h = harness_with(
            MemoryTimerStore::with_timers(&stored).unwrap(),
            EngineConfig::default(),
        );
        let report = h.engine.recover();
        assert_eq!(report.resumed, 1);
        assert_eq!(report.auto_completed, 1);

        let within = h.engine.timer("ORD-9", "within").unwrap();
        assert_eq!(within.status, TimerStatus::Active);
        assert_eq!(within.last_update_time, T0);
        assert_eq!(within.start_time, T0 - 12 * MINUTE);

        let over = h.engine.timer("ORD-9", "over").unwrap();
        assert_eq!(over.status, TimerStatus::Completed);
        assert_eq!(over.current_progress, 100.0);

        // recovery is silent
        assert!(h.kinds().is_empty());
        assert!(h.notifier.calls().is_empty());
        assert_eq!(h.store.write_count(), 1);

        // the resumed timer completes on its first tick
        h.engine.tick_all();
        assert_eq!(
            h.engine.timer_status("ORD-9", "within"),
            Some(TimerStatus::Completed)
        );
    }

    #[test]
    fn test_recovery_tolerates_corrupt_start_time() {
        let corrupt = persisted(i64::MIN, 10.0, TimerStatus::Active, "corrupt");
        let mut h = harness_with(
            MemoryTimerStore::with_timers(&[corrupt]).unwrap(),
            EngineConfig::default(),
        );
        let report = h.engine.recover();
        assert_eq!(report.auto_completed, 1);
        assert_eq!(
            h.engine.timer_status("ORD-9", "corrupt"),
            Some(TimerStatus::Completed)
        );
    }

    #[test]
    fn test_recovery_keeps_paused_and_prunes_finished() {
        let mut paused = persisted(T0 - 20 * MINUTE, 10.0, TimerStatus::Paused, "paused");
        paused.last_update_time = T0 - 17 * MINUTE;
        paused.current_progress = 30.0;
        let stored = vec![
            paused,
            persisted(T0 - MINUTE, 10.0, TimerStatus::Completed, "done"),
            persisted(T0 - MINUTE, 10.0, TimerStatus::Cancelled, "gone"),
        ];
        let mut h = harness_with(
            MemoryTimerStore::with_timers(&stored).unwrap(),
            EngineConfig::default(),
        );
        let report = h.engine.recover();
        assert_eq!(
            report,
            RecoveryReport {
                resumed: 0,
                paused: 1,
                auto_completed: 0,
                pruned: 2
            }
        );
        assert_eq!(h.engine.snapshot().len(), 1);
        assert_eq!(h.store.load().unwrap().len(), 1);

        h.engine.resume_timer("ORD-9", "paused");
        h.engine.tick_all();
        assert!((h.engine.timer_progress("ORD-9", "paused") - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_recovery_survives_storage_failure() {
        let store = MemoryTimerStore::new();
        store.set_failing(true);
        let mut h = harness_with(store, EngineConfig::default());
        assert_eq!(h.engine.recover(), RecoveryReport::default());

        h.engine.start_timer("o", "i", "Naan", 5.0).unwrap();
        h.clock.advance_minutes(1);
        h.engine.tick_all();
        assert!((h.engine.timer_progress("o", "i") - 20.0).abs() < 1e-9);
        assert_eq!(h.store.write_count(), 0);
    }

    #[test]
    fn test_notifier_failure_does_not_stop_timer() {
        let mut h = harness();
        h.notifier.fail(true);
        h.engine.start_timer("o", "i", "Curry", 10.0).unwrap();
        assert!(h.engine.timer("o", "i").unwrap().notification_id.is_none());
        h.engine.pause_timer("o", "i");
        h.engine.resume_timer("o", "i");
        h.engine.handle_app_state(AppState::Background);
        h.clock.advance_minutes(10);
        h.engine.tick_all();
        assert_eq!(h.engine.timer_status("o", "i"), Some(TimerStatus::Completed));
    }

    #[test]
    fn test_milestone_notifications() {
        let config = EngineConfig {
            progress_milestones: vec![70, 85],
            ..EngineConfig::default()
        };
        let mut h = harness_with(MemoryTimerStore::new(), config);
        h.engine.start_timer("o", "i", "Pizza", 20.0).unwrap();
        assert_eq!(
            h.notifier.scheduled_delays(NotificationKind::TimerProgress),
            vec![Duration::from_secs(14 * 60), Duration::from_secs(17 * 60)]
        );
        assert_eq!(
            h.engine.timer("o", "i").unwrap().milestone_notification_ids,
            vec!["n2".to_string(), "n3".to_string()]
        );

        h.clock.advance_minutes(15);
        h.engine.pause_timer("o", "i");
        assert_eq!(h.notifier.cancelled().len(), 3);

        h.engine.resume_timer("o", "i");
        // only the 85% mark is still ahead: 17 - 15 minutes
        assert_eq!(
            h.notifier.scheduled_delays(NotificationKind::TimerProgress),
            vec![
                Duration::from_secs(14 * 60),
                Duration::from_secs(17 * 60),
                Duration::from_secs(2 * 60)
            ]
        );
    }

    #[test]
    fn test_short_timer_skips_sub_minute_milestones() {
        let config = EngineConfig {
            progress_milestones: vec![70, 85],
            ..EngineConfig::default()
        };
        let mut h = harness_with(MemoryTimerStore::new(), config);
        h.engine.start_timer("o", "i", "Shot", 1.0).unwrap();
        assert!(h
            .notifier
            .scheduled_delays(NotificationKind::TimerProgress)
            .is_empty());
    }

    #[test]
    fn test_queries_and_stats() {
        let mut h = harness();
        h.engine.start_timer("A", "1", "Tacos", 10.0).unwrap();
        h.engine.start_timer("A", "2", "Nachos", 10.0).unwrap();
        h.engine.start_timer("B", "1", "Quesadilla", 10.0).unwrap();
        h.engine.pause_timer("A", "2");
        h.engine.complete_timer("B", "1");

        assert_eq!(h.engine.active_timers().len(), 2);
        assert_eq!(h.engine.order_timers("A").len(), 2);
        assert_eq!(h.engine.order_timers("B").len(), 1);
        assert_eq!(
            h.engine.stats(),
            TimerStats {
                total: 3,
                active: 1,
                paused: 1,
                completed: 1,
                cancelled: 0
            }
        );

        assert_eq!(h.engine.clear_completed("B"), 1);
        assert_eq!(h.engine.clear_completed("B"), 0);
        assert!(h.engine.order_timers("B").is_empty());
    }

    #[test]
    fn test_notification_received_event() {
        let mut h = harness();
        h.engine.handle_notification_received("o", "i");
        let events = h.events.lock().unwrap();
        assert_eq!(
            events[0],
            TimerEvent::NotificationReceived(NotificationRef {
                order_id: "o".into(),
                item_id: "i".into()
            })
        );
    }

    #[test]
    fn test_unsubscribed_listener_stops_receiving() {
        let mut h = harness();
        let count = Arc::new(Mutex::new(0));
        let c = count.clone();
        let id = h.engine.subscribe(TimerEventKind::Started, move |_| {
            *c.lock().unwrap() += 1
        });
        h.engine.start_timer("o", "1", "A", 5.0).unwrap();
        assert!(h.engine.unsubscribe(id));
        h.engine.start_timer("o", "2", "B", 5.0).unwrap();
        assert_eq!(*count.lock().unwrap(), 1);
        // the harness listener is unaffected
        assert_eq!(
            h.kinds(),
            vec![TimerEventKind::Started, TimerEventKind::Started]
        );
    }

    #[test]
    fn test_app_state_parse() {
        assert_eq!(AppState::parse("Background"), Some(AppState::Background));
        assert_eq!(AppState::parse("active"), Some(AppState::Active));
        assert_eq!(AppState::parse("inactive"), Some(AppState::Inactive));
        assert_eq!(AppState::parse("sleeping"), None);
    }
}
