//! Application service: version and whole-studio status queries.

use super::{Service, ServiceResult};
use crate::studio::StudioModel;
use serde_json::{json, Value};
use std::sync::Arc;

/// Wire protocol revision. Bump when the message shapes change.
pub const PROTOCOL_VERSION: u32 = 1;

pub struct AppService {
    model: Arc<dyn StudioModel>,
}

impl AppService {
    pub fn new(model: Arc<dyn StudioModel>) -> Self {
        Self { model }
    }
}

impl Service for AppService {
    fn id(&self) -> &'static str {
        "app"
    }

    fn methods(&self) -> &'static [&'static str] {
        &["get_version", "get_status"]
    }

    fn handle(&self, method: &str, _params: &Value) -> ServiceResult {
        match method {
            "get_version" => Ok(json!({
                "version": env!("CARGO_PKG_VERSION"),
                "protocol": PROTOCOL_VERSION,
            })),
            "get_status" => {
                let outputs = self.model.output_status();
                Ok(json!({
                    "scene": self.model.current_scene(),
                    "collection": self.model.current_collection(),
                    "streaming": outputs.streaming,
                    "recording": outputs.recording,
                    "recording_paused": outputs.recording_paused,
                }))
            }
            other => unreachable!("unrouted method: {other}"),
        }
    }
}
