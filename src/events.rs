//! In-process observable/observer bus for studio events.
//!
//! Firing is a synchronous fan-out on the calling thread. Host callbacks
//! arrive on OBS's own threads, and ordering relative to the originating
//! host event must be preserved, so the bus introduces no threading of its
//! own.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Everything the studio can announce, one variant per domain event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    CollectionAdded,
    CollectionRemoved,
    CollectionRenamed,
    CollectionSwitched,
    CollectionListBuilt,
    SceneAdded,
    SceneRemoved,
    SceneRenamed,
    SceneSwitched,
    SceneListBuilt,
    SourceCreated,
    SourceDestroyed,
    SourceRenamed,
    ItemAdded,
    ItemRemoved,
    ItemVisibilityChanged,
    RecordingStarted,
    RecordingStopped,
    StreamingStarted,
    StreamingStopped,
    SaveTriggered,
}

impl EventKind {
    /// Every kind, in declaration order. The manager subscribes to all of
    /// them for device fan-out.
    pub const ALL: &'static [EventKind] = &[
        EventKind::CollectionAdded,
        EventKind::CollectionRemoved,
        EventKind::CollectionRenamed,
        EventKind::CollectionSwitched,
        EventKind::CollectionListBuilt,
        EventKind::SceneAdded,
        EventKind::SceneRemoved,
        EventKind::SceneRenamed,
        EventKind::SceneSwitched,
        EventKind::SceneListBuilt,
        EventKind::SourceCreated,
        EventKind::SourceDestroyed,
        EventKind::SourceRenamed,
        EventKind::ItemAdded,
        EventKind::ItemRemoved,
        EventKind::ItemVisibilityChanged,
        EventKind::RecordingStarted,
        EventKind::RecordingStopped,
        EventKind::StreamingStarted,
        EventKind::StreamingStopped,
        EventKind::SaveTriggered,
    ];

    /// Wire name of the kind, as carried in event-notification messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::CollectionAdded => "collection_added",
            EventKind::CollectionRemoved => "collection_removed",
            EventKind::CollectionRenamed => "collection_renamed",
            EventKind::CollectionSwitched => "collection_switched",
            EventKind::CollectionListBuilt => "collection_list_built",
            EventKind::SceneAdded => "scene_added",
            EventKind::SceneRemoved => "scene_removed",
            EventKind::SceneRenamed => "scene_renamed",
            EventKind::SceneSwitched => "scene_switched",
            EventKind::SceneListBuilt => "scene_list_built",
            EventKind::SourceCreated => "source_created",
            EventKind::SourceDestroyed => "source_destroyed",
            EventKind::SourceRenamed => "source_renamed",
            EventKind::ItemAdded => "item_added",
            EventKind::ItemRemoved => "item_removed",
            EventKind::ItemVisibilityChanged => "item_visibility_changed",
            EventKind::RecordingStarted => "recording_started",
            EventKind::RecordingStopped => "recording_stopped",
            EventKind::StreamingStarted => "streaming_started",
            EventKind::StreamingStopped => "streaming_stopped",
            EventKind::SaveTriggered => "save_triggered",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fired event. Ephemeral: created at fire time, consumed synchronously,
/// never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub payload: Value,
}

/// Identity handle for a registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Handler = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

struct BusInner {
    handlers: HashMap<ObserverId, Handler>,
    /// Per-kind subscriber lists, kept in subscription order.
    subscribers: HashMap<EventKind, Vec<ObserverId>>,
    next_id: u64,
}

/// Synchronous publish/subscribe bus.
///
/// Observers register a handler once and then subscribe it to individual
/// kinds. Double-subscribe and unsubscribe-when-absent are no-ops. A
/// handler that fails is reported and skipped; delivery to the remaining
/// subscribers continues.
pub struct EventBus {
    inner: RwLock<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(BusInner {
                handlers: HashMap::new(),
                subscribers: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Register a handler, returning the identity used for subscriptions.
    pub fn add_observer<F>(&self, handler: F) -> ObserverId
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let id = ObserverId(inner.next_id);
        inner.next_id += 1;
        inner.handlers.insert(id, Arc::new(handler));
        id
    }

    /// Drop a handler and all of its subscriptions.
    pub fn remove_observer(&self, id: ObserverId) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.handlers.remove(&id);
        for subs in inner.subscribers.values_mut() {
            subs.retain(|s| *s != id);
        }
    }

    /// Subscribe an observer to a kind. Idempotent.
    pub fn subscribe(&self, id: ObserverId, kind: EventKind) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if !inner.handlers.contains_key(&id) {
            return;
        }
        let subs = inner.subscribers.entry(kind).or_default();
        if !subs.contains(&id) {
            subs.push(id);
        }
    }

    /// Unsubscribe an observer from a kind. Idempotent.
    pub fn unsubscribe(&self, id: ObserverId, kind: EventKind) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(subs) = inner.subscribers.get_mut(&kind) {
            subs.retain(|s| *s != id);
        }
    }

    /// Observers currently subscribed to `kind`, in subscription order.
    pub fn subscribers(&self, kind: EventKind) -> Vec<ObserverId> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.subscribers.get(&kind).cloned().unwrap_or_default()
    }

    /// Deliver an event to every current subscriber, synchronously, on the
    /// calling thread. Firing with no subscribers is a no-op.
    pub fn fire(&self, kind: EventKind, payload: Value) {
        // Snapshot under the read lock so handlers are free to
        // subscribe/unsubscribe while the fan-out runs.
        let targets: Vec<(ObserverId, Handler)> = {
            let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
            match inner.subscribers.get(&kind) {
                Some(subs) => subs
                    .iter()
                    .filter_map(|id| inner.handlers.get(id).map(|h| (*id, Arc::clone(h))))
                    .collect(),
                None => return,
            }
        };

        let event = Event { kind, payload };
        for (id, handler) in targets {
            if let Err(e) = handler(&event) {
                tracing::warn!(kind = %kind, observer = id.0, error = %e, "observer handler failed");
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
