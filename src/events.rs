//! Typed timer lifecycle events and their subscriber registry.
//!
//! Listeners run synchronously on the thread that mutated the engine, while
//! the engine is borrowed. They must not call back into the engine; forward
//! the event to a channel instead if follow-up work is needed.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::timer::{TimerRef, TimerUpdate};

/// Payload of a delivered `timer_complete` notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRef {
    pub order_id: String,
    pub item_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum TimerEvent {
    TimerStarted(TimerRef),
    TimerUpdate(TimerUpdate),
    TimerPaused(TimerRef),
    TimerResumed(TimerRef),
    TimerCompleted(TimerRef),
    TimerCancelled(TimerRef),
    NotificationReceived(NotificationRef),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerEventKind {
    Started,
    Update,
    Paused,
    Resumed,
    Completed,
    Cancelled,
    NotificationReceived,
}

impl TimerEvent {
    pub fn kind(&self) -> TimerEventKind {
        match self {
            Self::TimerStarted(_) => TimerEventKind::Started,
            Self::TimerUpdate(_) => TimerEventKind::Update,
            Self::TimerPaused(_) => TimerEventKind::Paused,
            Self::TimerResumed(_) => TimerEventKind::Resumed,
            Self::TimerCompleted(_) => TimerEventKind::Completed,
            Self::TimerCancelled(_) => TimerEventKind::Cancelled,
            Self::NotificationReceived(_) => TimerEventKind::NotificationReceived,
        }
    }

    /// (order, item) the event refers to.
    pub fn target(&self) -> (&str, &str) {
        match self {
            Self::TimerStarted(r)
            | Self::TimerPaused(r)
            | Self::TimerResumed(r)
            | Self::TimerCompleted(r)
            | Self::TimerCancelled(r) => (&r.order_id, &r.item_id),
            Self::TimerUpdate(u) => (&u.order_id, &u.item_id),
            Self::NotificationReceived(n) => (&n.order_id, &n.item_id),
        }
    }
}

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub type Listener = Box<dyn Fn(&TimerEvent) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    /// `None` listens to every kind.
    kind: Option<TimerEventKind>,
    listener: Listener,
}

/// Ordered subscriber registry. Listeners are invoked in registration order.
#[derive(Default)]
pub struct EventBus {
    next_id: u64,
    subscriptions: Vec<Subscription>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, kind: TimerEventKind, listener: F) -> SubscriptionId
    where
        F: Fn(&TimerEvent) + Send + Sync + 'static,
    {
        self.insert(Some(kind), Box::new(listener))
    }

    pub fn subscribe_all<F>(&mut self, listener: F) -> SubscriptionId
    where
        F: Fn(&TimerEvent) + Send + Sync + 'static,
    {
        self.insert(None, Box::new(listener))
    }

    fn insert(&mut self, kind: Option<TimerEventKind>, listener: Listener) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.subscriptions.push(Subscription { id, kind, listener });
        id
    }

    /// Remove one listener. Returns `false` if it was already gone.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.id != id);
        self.subscriptions.len() != before
    }

    /// Drop every listener for `kind`, or every listener when `None`.
    pub fn clear(&mut self, kind: Option<TimerEventKind>) {
        match kind {
            Some(k) => self.subscriptions.retain(|s| s.kind != Some(k)),
            None => self.subscriptions.clear(),
        }
    }

    pub fn listener_count(&self, kind: TimerEventKind) -> usize {
        self.subscriptions
            .iter()
            .filter(|s| s.kind.map_or(true, |k| k == kind))
            .count()
    }

    pub fn emit(&self, event: &TimerEvent) {
        let kind = event.kind();
        for sub in &self.subscriptions {
            if sub.kind.map_or(true, |k| k == kind) {
                (sub.listener)(event);
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut by_kind: HashMap<String, usize> = HashMap::new();
        for sub in &self.subscriptions {
            let name = sub
                .kind
                .map_or_else(|| "*".to_string(), |k| format!("{k:?}"));
            *by_kind.entry(name).or_default() += 1;
        }
        f.debug_struct("EventBus")
            .field("subscriptions", &by_kind)
            .finish()
    }
}
