//! Scene service: listing and switching scenes.

use super::{require_str, Service, ServiceResult};
use crate::events::{EventBus, EventKind};
use crate::studio::StudioModel;
use serde_json::{json, Value};
use std::sync::Arc;

pub struct SceneService {
    model: Arc<dyn StudioModel>,
    bus: Arc<EventBus>,
}

impl SceneService {
    pub fn new(model: Arc<dyn StudioModel>, bus: Arc<EventBus>) -> Self {
        Self { model, bus }
    }

    fn switch_scene(&self, params: &Value) -> ServiceResult {
        let name = require_str(params, "name")?;
        self.model.switch_scene(name)?;
        // Fired only after the model confirms the switch.
        self.bus
            .fire(EventKind::SceneSwitched, json!({ "name": name }));
        Ok(json!({ "ok": true }))
    }

    fn get_scenes(&self) -> ServiceResult {
        Ok(json!({
            "scenes": self.model.scenes(),
            "current": self.model.current_scene(),
        }))
    }

    fn get_current_scene(&self) -> ServiceResult {
        Ok(json!({ "name": self.model.current_scene() }))
    }
}

impl Service for SceneService {
    fn id(&self) -> &'static str {
        "scenes"
    }

    fn methods(&self) -> &'static [&'static str] {
        &["switch_scene", "get_scenes", "get_current_scene"]
    }

    fn handle(&self, method: &str, params: &Value) -> ServiceResult {
        match method {
            "switch_scene" => self.switch_scene(params),
            "get_scenes" => self.get_scenes(),
            "get_current_scene" => self.get_current_scene(),
            other => unreachable!("unrouted method: {other}"),
        }
    }
}
