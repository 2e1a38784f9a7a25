//! Collection service: listing and switching scene collections.
//!
//! Switching a collection tears down the host's whole scene graph. The host
//! reports completion through the shared `collection_loaded` variable, so
//! the switch method blocks until that signal before announcing the change.

use super::{require_str, Service, ServiceResult};
use crate::events::{EventBus, EventKind};
use crate::shared::{SharedVars, WaitOutcome};
use crate::studio::StudioModel;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// How long a collection switch may take before we give up waiting for the
/// host's loaded signal.
const COLLECTION_LOAD_TIMEOUT: Duration = Duration::from_secs(2);

/// Shared variable the frontend adapter sets once a collection finished
/// loading.
pub const COLLECTION_LOADED_VAR: &str = "collection_loaded";

pub struct CollectionService {
    model: Arc<dyn StudioModel>,
    bus: Arc<EventBus>,
    vars: Arc<SharedVars>,
}

impl CollectionService {
    pub fn new(model: Arc<dyn StudioModel>, bus: Arc<EventBus>, vars: Arc<SharedVars>) -> Self {
        Self { model, bus, vars }
    }

    fn switch_collection(&self, params: &Value) -> ServiceResult {
        let name = require_str(params, "name")?;
        self.model.switch_collection(name)?;

        let outcome = self.vars.wait_until(
            COLLECTION_LOADED_VAR,
            |value| value.and_then(Value::as_str) == Some(name),
            COLLECTION_LOAD_TIMEOUT,
        );
        if outcome == WaitOutcome::TimedOut {
            tracing::warn!(collection = name, "no loaded signal after switch; proceeding");
        }

        self.bus
            .fire(EventKind::CollectionSwitched, json!({ "name": name }));
        Ok(json!({ "ok": true }))
    }

    fn get_collections(&self) -> ServiceResult {
        Ok(json!({
            "collections": self.model.collections(),
            "current": self.model.current_collection(),
        }))
    }

    fn get_current_collection(&self) -> ServiceResult {
        Ok(json!({ "name": self.model.current_collection() }))
    }
}

impl Service for CollectionService {
    fn id(&self) -> &'static str {
        "collections"
    }

    fn methods(&self) -> &'static [&'static str] {
        &[
            "switch_collection",
            "get_collections",
            "get_current_collection",
        ]
    }

    fn handle(&self, method: &str, params: &Value) -> ServiceResult {
        match method {
            "switch_collection" => self.switch_collection(params),
            "get_collections" => self.get_collections(),
            "get_current_collection" => self.get_current_collection(),
            other => unreachable!("unrouted method: {other}"),
        }
    }
}
