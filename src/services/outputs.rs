//! Output service: recording and streaming control.

use super::{Service, ServiceResult};
use crate::events::{EventBus, EventKind};
use crate::studio::StudioModel;
use serde_json::{json, Value};
use std::sync::Arc;

pub struct OutputService {
    model: Arc<dyn StudioModel>,
    bus: Arc<EventBus>,
}

impl OutputService {
    pub fn new(model: Arc<dyn StudioModel>, bus: Arc<EventBus>) -> Self {
        Self { model, bus }
    }

    fn set_recording(&self, active: bool) -> ServiceResult {
        self.model.set_recording(active)?;
        let kind = if active {
            EventKind::RecordingStarted
        } else {
            EventKind::RecordingStopped
        };
        self.bus.fire(kind, json!({}));
        Ok(json!({ "ok": true, "recording": active }))
    }

    fn set_streaming(&self, active: bool) -> ServiceResult {
        self.model.set_streaming(active)?;
        let kind = if active {
            EventKind::StreamingStarted
        } else {
            EventKind::StreamingStopped
        };
        self.bus.fire(kind, json!({}));
        Ok(json!({ "ok": true, "streaming": active }))
    }

    fn get_output_status(&self) -> ServiceResult {
        // OutputStatus is a plain serde struct; to_value cannot fail on it.
        Ok(serde_json::to_value(self.model.output_status()).unwrap_or(Value::Null))
    }
}

impl Service for OutputService {
    fn id(&self) -> &'static str {
        "outputs"
    }

    fn methods(&self) -> &'static [&'static str] {
        &[
            "get_output_status",
            "start_recording",
            "stop_recording",
            "toggle_recording",
            "start_streaming",
            "stop_streaming",
            "toggle_streaming",
        ]
    }

    fn handle(&self, method: &str, _params: &Value) -> ServiceResult {
        match method {
            "get_output_status" => self.get_output_status(),
            "start_recording" => self.set_recording(true),
            "stop_recording" => self.set_recording(false),
            "toggle_recording" => {
                let active = !self.model.output_status().recording;
                self.set_recording(active)
            }
            "start_streaming" => self.set_streaming(true),
            "stop_streaming" => self.set_streaming(false),
            "toggle_streaming" => {
                let active = !self.model.output_status().streaming;
                self.set_streaming(active)
            }
            other => unreachable!("unrouted method: {other}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ServiceError;
    use crate::studio::FakeStudio;
    use std::sync::Mutex;

    fn service_with_capture() -> (OutputService, Arc<FakeStudio>, Arc<Mutex<Vec<EventKind>>>) {
        let model = FakeStudio::new();
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = bus.add_observer(move |event| {
            sink.lock().unwrap().push(event.kind);
            Ok(())
        });
        for kind in EventKind::ALL {
            bus.subscribe(id, *kind);
        }
        (OutputService::new(model.clone(), bus), model, seen)
    }

    #[test]
    fn start_stop_recording_fires_paired_events() {
        let (service, model, seen) = service_with_capture();

        service.handle("start_recording", &json!({})).unwrap();
        assert!(model.output_status().recording);
        service.handle("stop_recording", &json!({})).unwrap();
        assert!(!model.output_status().recording);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![EventKind::RecordingStarted, EventKind::RecordingStopped]
        );
    }

    #[test]
    fn toggle_streaming_flips_state() {
        let (service, model, seen) = service_with_capture();

        service.handle("toggle_streaming", &json!({})).unwrap();
        assert!(model.output_status().streaming);
        service.handle("toggle_streaming", &json!({})).unwrap();
        assert!(!model.output_status().streaming);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![EventKind::StreamingStarted, EventKind::StreamingStopped]
        );
    }

    #[test]
    fn refused_mutation_fires_no_event() {
        let (service, model, seen) = service_with_capture();
        model.refuse_mutations("output busy");

        let err = service.handle("start_streaming", &json!({})).unwrap_err();
        assert!(matches!(err, ServiceError::Domain(_)));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn status_reflects_model() {
        let (service, model, _) = service_with_capture();
        model.set_streaming(true).unwrap();

        let out = service.handle("get_output_status", &json!({})).unwrap();
        assert_eq!(out["streaming"], json!(true));
        assert_eq!(out["recording"], json!(false));
    }
}
