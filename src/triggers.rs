//! Trigger adapters: translate host callbacks into bus events.
//!
//! The host reports through two channels with different shapes. Frontend
//! events are bare enum notifications whose context must be read back from
//! the model; core signals carry their context in calldata. Both adapters
//! are thin and stateless: parse, then fire.

use crate::events::{EventBus, EventKind};
use crate::shared::SharedVars;
use crate::studio::StudioModel;
use serde_json::{json, Value};
use std::sync::Arc;

/// Set once the host frontend has finished loading. The manager holds its
/// first connection attempt until then.
pub const FRONTEND_LOADED_VAR: &str = "frontend_loaded";

/// Carries the name of the most recently loaded collection.
pub use crate::services::collections::COLLECTION_LOADED_VAR;

/// Frontend notifications, one variant per host callback.
#[derive(Debug, Clone, PartialEq)]
pub enum FrontendEvent {
    Loaded,
    SceneChanged,
    SceneListChanged,
    CollectionChanged,
    CollectionListChanged,
    CollectionAdded { name: String },
    CollectionRemoved { name: String },
    CollectionRenamed { prev: String, new: String },
    StreamingStarted,
    StreamingStopped,
    RecordingStarted,
    RecordingStopped,
    SaveFinished,
}

/// Translates frontend notifications into bus events and shared-variable
/// signals.
pub struct FrontendAdapter {
    bus: Arc<EventBus>,
    model: Arc<dyn StudioModel>,
    vars: Arc<SharedVars>,
}

impl FrontendAdapter {
    pub fn new(bus: Arc<EventBus>, model: Arc<dyn StudioModel>, vars: Arc<SharedVars>) -> Self {
        Self { bus, model, vars }
    }

    pub fn handle(&self, event: FrontendEvent) {
        match event {
            FrontendEvent::Loaded => {
                self.vars.set(FRONTEND_LOADED_VAR, json!(true));
            }
            FrontendEvent::SceneChanged => match self.model.current_scene() {
                Some(name) => self
                    .bus
                    .fire(EventKind::SceneSwitched, json!({ "name": name })),
                None => tracing::warn!("scene changed with no current scene"),
            },
            FrontendEvent::SceneListChanged => {
                self.bus.fire(
                    EventKind::SceneListBuilt,
                    json!({
                        "scenes": self.model.scenes(),
                        "current": self.model.current_scene(),
                    }),
                );
            }
            FrontendEvent::CollectionChanged => {
                let name = self.model.current_collection();
                self.vars.set(COLLECTION_LOADED_VAR, json!(name));
                self.bus
                    .fire(EventKind::CollectionSwitched, json!({ "name": name }));
            }
            FrontendEvent::CollectionListChanged => {
                self.bus.fire(
                    EventKind::CollectionListBuilt,
                    json!({
                        "collections": self.model.collections(),
                        "current": self.model.current_collection(),
                    }),
                );
            }
            FrontendEvent::CollectionAdded { name } => {
                self.bus
                    .fire(EventKind::CollectionAdded, json!({ "name": name }));
            }
            FrontendEvent::CollectionRemoved { name } => {
                self.bus
                    .fire(EventKind::CollectionRemoved, json!({ "name": name }));
            }
            FrontendEvent::CollectionRenamed { prev, new } => {
                self.bus.fire(
                    EventKind::CollectionRenamed,
                    json!({ "prev_name": prev, "new_name": new }),
                );
            }
            FrontendEvent::StreamingStarted => self.bus.fire(EventKind::StreamingStarted, json!({})),
            FrontendEvent::StreamingStopped => self.bus.fire(EventKind::StreamingStopped, json!({})),
            FrontendEvent::RecordingStarted => self.bus.fire(EventKind::RecordingStarted, json!({})),
            FrontendEvent::RecordingStopped => self.bus.fire(EventKind::RecordingStopped, json!({})),
            FrontendEvent::SaveFinished => self.bus.fire(EventKind::SaveTriggered, json!({})),
        }
    }
}

/// Translates core signals, whose context arrives as calldata, into bus
/// events. Malformed calldata is reported and dropped, never fatal.
pub struct SignalAdapter {
    bus: Arc<EventBus>,
}

impl SignalAdapter {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }

    pub fn handle(&self, signal: &str, calldata: &Value) {
        let fired = match signal {
            "source_create" => self.source_event(
                calldata,
                EventKind::SceneAdded,
                EventKind::SourceCreated,
            ),
            "source_destroy" => self.source_event(
                calldata,
                EventKind::SceneRemoved,
                EventKind::SourceDestroyed,
            ),
            "source_rename" => self.rename_event(calldata),
            "item_add" => self.item_event(calldata, EventKind::ItemAdded),
            "item_remove" => self.item_event(calldata, EventKind::ItemRemoved),
            "item_visible" => self.visibility_event(calldata),
            other => {
                tracing::debug!(signal = other, "ignoring unhandled signal");
                return;
            }
        };
        if !fired {
            tracing::warn!(signal, %calldata, "dropping signal with malformed calldata");
        }
    }

    /// Sources and scenes share creation signals; `is_scene` picks the kind.
    fn source_event(&self, calldata: &Value, scene_kind: EventKind, source_kind: EventKind) -> bool {
        let Some(name) = calldata.get("name").and_then(Value::as_str) else {
            return false;
        };
        let kind = if calldata.get("is_scene").and_then(Value::as_bool) == Some(true) {
            scene_kind
        } else {
            source_kind
        };
        self.bus.fire(kind, json!({ "name": name }));
        true
    }

    fn rename_event(&self, calldata: &Value) -> bool {
        let (Some(prev), Some(new)) = (
            calldata.get("prev_name").and_then(Value::as_str),
            calldata.get("new_name").and_then(Value::as_str),
        ) else {
            return false;
        };
        let kind = if calldata.get("is_scene").and_then(Value::as_bool) == Some(true) {
            EventKind::SceneRenamed
        } else {
            EventKind::SourceRenamed
        };
        self.bus
            .fire(kind, json!({ "prev_name": prev, "new_name": new }));
        true
    }

    fn item_event(&self, calldata: &Value, kind: EventKind) -> bool {
        let (Some(scene), Some(source)) = (
            calldata.get("scene").and_then(Value::as_str),
            calldata.get("source").and_then(Value::as_str),
        ) else {
            return false;
        };
        self.bus
            .fire(kind, json!({ "scene": scene, "source": source }));
        true
    }

    fn visibility_event(&self, calldata: &Value) -> bool {
        let (Some(scene), Some(source), Some(visible)) = (
            calldata.get("scene").and_then(Value::as_str),
            calldata.get("source").and_then(Value::as_str),
            calldata.get("visible").and_then(Value::as_bool),
        ) else {
            return false;
        };
        self.bus.fire(
            EventKind::ItemVisibilityChanged,
            json!({ "scene": scene, "source": source, "visible": visible }),
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Event;
    use crate::studio::FakeStudio;
    use std::sync::Mutex;

    fn capture_all(bus: &EventBus) -> Arc<Mutex<Vec<Event>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = bus.add_observer(move |event| {
            sink.lock().unwrap().push(event.clone());
            Ok(())
        });
        for kind in EventKind::ALL {
            bus.subscribe(id, *kind);
        }
        seen
    }

    fn frontend() -> (FrontendAdapter, Arc<SharedVars>, Arc<Mutex<Vec<Event>>>) {
        let bus = Arc::new(EventBus::new());
        let vars = Arc::new(SharedVars::new());
        let seen = capture_all(&bus);
        (
            FrontendAdapter::new(bus, FakeStudio::new(), Arc::clone(&vars)),
            vars,
            seen,
        )
    }

    #[test]
    fn loaded_sets_the_shared_variable() {
        let (adapter, vars, seen) = frontend();
        assert_eq!(vars.get(FRONTEND_LOADED_VAR), None);

        adapter.handle(FrontendEvent::Loaded);
        assert_eq!(vars.get(FRONTEND_LOADED_VAR), Some(json!(true)));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn scene_changed_reports_the_current_scene() {
        let (adapter, _, seen) = frontend();
        adapter.handle(FrontendEvent::SceneChanged);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind, EventKind::SceneSwitched);
        assert_eq!(seen[0].payload, json!({"name": "Intro"}));
    }

    #[test]
    fn collection_changed_signals_loaded_and_fires() {
        let (adapter, vars, seen) = frontend();
        adapter.handle(FrontendEvent::CollectionChanged);

        assert_eq!(vars.get(COLLECTION_LOADED_VAR), Some(json!("Default")));
        assert_eq!(seen.lock().unwrap()[0].kind, EventKind::CollectionSwitched);
    }

    #[test]
    fn output_and_save_notifications_map_one_to_one() {
        let (adapter, _, seen) = frontend();
        adapter.handle(FrontendEvent::StreamingStarted);
        adapter.handle(FrontendEvent::RecordingStopped);
        adapter.handle(FrontendEvent::SaveFinished);

        let kinds: Vec<EventKind> = seen.lock().unwrap().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::StreamingStarted,
                EventKind::RecordingStopped,
                EventKind::SaveTriggered,
            ]
        );
    }

    #[test]
    fn visibility_signal_carries_full_context() {
        let bus = Arc::new(EventBus::new());
        let seen = capture_all(&bus);
        let adapter = SignalAdapter::new(bus);

        adapter.handle(
            "item_visible",
            &json!({"scene": "Main", "source": "Overlay", "visible": true}),
        );

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].kind, EventKind::ItemVisibilityChanged);
        assert_eq!(
            seen[0].payload,
            json!({"scene": "Main", "source": "Overlay", "visible": true})
        );
    }

    #[test]
    fn scene_flag_selects_scene_kinds() {
        let bus = Arc::new(EventBus::new());
        let seen = capture_all(&bus);
        let adapter = SignalAdapter::new(bus);

        adapter.handle("source_create", &json!({"name": "Cam", "is_scene": false}));
        adapter.handle("source_create", &json!({"name": "Break", "is_scene": true}));

        let kinds: Vec<EventKind> = seen.lock().unwrap().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::SourceCreated, EventKind::SceneAdded]);
    }

    #[test]
    fn malformed_calldata_is_dropped() {
        let bus = Arc::new(EventBus::new());
        let seen = capture_all(&bus);
        let adapter = SignalAdapter::new(bus);

        adapter.handle("item_visible", &json!({"scene": "Main"}));
        adapter.handle("source_rename", &json!({"prev_name": "Old"}));
        adapter.handle("completely_unknown", &json!({}));

        assert!(seen.lock().unwrap().is_empty());
    }
}
