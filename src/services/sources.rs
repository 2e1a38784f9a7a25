//! Source service: per-scene source listing and item visibility.

use super::{require_bool, require_str, Service, ServiceResult};
use crate::events::{EventBus, EventKind};
use crate::studio::StudioModel;
use serde_json::{json, Value};
use std::sync::Arc;

pub struct SourceService {
    model: Arc<dyn StudioModel>,
    bus: Arc<EventBus>,
}

impl SourceService {
    pub fn new(model: Arc<dyn StudioModel>, bus: Arc<EventBus>) -> Self {
        Self { model, bus }
    }

    fn get_sources(&self, params: &Value) -> ServiceResult {
        let scene = require_str(params, "scene")?;
        let names = self.model.sources(scene)?;
        let mut sources = Vec::with_capacity(names.len());
        for name in names {
            let visible = self.model.item_visible(scene, &name)?;
            sources.push(json!({ "name": name, "visible": visible }));
        }
        Ok(json!({ "scene": scene, "sources": sources }))
    }

    fn set_visibility(&self, scene: &str, source: &str, visible: bool) -> ServiceResult {
        self.model.set_item_visible(scene, source, visible)?;
        self.bus.fire(
            EventKind::ItemVisibilityChanged,
            json!({ "scene": scene, "source": source, "visible": visible }),
        );
        Ok(json!({ "ok": true, "visible": visible }))
    }
}

impl Service for SourceService {
    fn id(&self) -> &'static str {
        "sources"
    }

    fn methods(&self) -> &'static [&'static str] {
        &[
            "get_sources",
            "set_source_visibility",
            "toggle_source_visibility",
        ]
    }

    fn handle(&self, method: &str, params: &Value) -> ServiceResult {
        match method {
            "get_sources" => self.get_sources(params),
            "set_source_visibility" => {
                let scene = require_str(params, "scene")?;
                let source = require_str(params, "source")?;
                let visible = require_bool(params, "visible")?;
                self.set_visibility(scene, source, visible)
            }
            "toggle_source_visibility" => {
                let scene = require_str(params, "scene")?;
                let source = require_str(params, "source")?;
                let visible = !self.model.item_visible(scene, source)?;
                self.set_visibility(scene, source, visible)
            }
            other => unreachable!("unrouted method: {other}"),
        }
    }
}
