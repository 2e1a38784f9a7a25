//! Collaborator interfaces to the host studio.
//!
//! The core never owns the studio object graph. It reads and mutates it
//! through [`StudioModel`] and reports operational messages through
//! [`LogSink`]. [`FakeStudio`] is a deterministic in-memory model used by
//! the crate's tests.

use crate::error::DomainError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Recording/streaming state of the studio's outputs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputStatus {
    pub streaming: bool,
    pub recording: bool,
    pub recording_paused: bool,
}

/// Read/mutate access to the slice of the studio object model the bridge
/// needs. Implemented over the OBS frontend API by the host glue; mutators
/// return [`DomainError`] when a reference is stale or the host refuses.
pub trait StudioModel: Send + Sync {
    fn scenes(&self) -> Vec<String>;
    fn current_scene(&self) -> Option<String>;
    fn switch_scene(&self, name: &str) -> Result<(), DomainError>;

    /// Source names present in a scene.
    fn sources(&self, scene: &str) -> Result<Vec<String>, DomainError>;
    fn item_visible(&self, scene: &str, source: &str) -> Result<bool, DomainError>;
    fn set_item_visible(&self, scene: &str, source: &str, visible: bool)
        -> Result<(), DomainError>;

    fn collections(&self) -> Vec<String>;
    fn current_collection(&self) -> Option<String>;
    fn switch_collection(&self, name: &str) -> Result<(), DomainError>;

    fn output_status(&self) -> OutputStatus;
    fn set_streaming(&self, active: bool) -> Result<(), DomainError>;
    fn set_recording(&self, active: bool) -> Result<(), DomainError>;
}

/// Fire-and-forget sink for user-visible operational messages (the host's
/// log widget). Implementations must not block.
pub trait LogSink: Send + Sync {
    fn log(&self, line: &str);
}

/// Default sink that forwards to the tracing subscriber.
pub struct TraceSink;

impl LogSink for TraceSink {
    fn log(&self, line: &str) {
        tracing::info!(target: "deckbridge::ui", "{line}");
    }
}

/// Sink that collects lines in memory, for tests.
#[derive(Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl LogSink for MemorySink {
    fn log(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(line.to_string());
    }
}

// ─────────────────────────────────────────────────────────────────
// FakeStudio
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct FakeState {
    scenes: Vec<String>,
    current_scene: Option<String>,
    /// "scene/source" -> visible
    visibility: HashMap<String, bool>,
    collections: Vec<String>,
    current_collection: Option<String>,
    outputs: OutputStatus,
    /// When set, every mutator fails with this reason.
    refuse: Option<String>,
}

/// In-memory studio model with scriptable refusals.
pub struct FakeStudio {
    state: Mutex<FakeState>,
}

impl FakeStudio {
    /// A small studio: scenes Intro/Main/Outro (Intro current, each with a
    /// Camera and an Overlay source) and collections Default/Podcast.
    pub fn new() -> Arc<Self> {
        let scenes = vec!["Intro".to_string(), "Main".to_string(), "Outro".to_string()];
        let mut visibility = HashMap::new();
        for scene in &scenes {
            visibility.insert(format!("{scene}/Camera"), true);
            visibility.insert(format!("{scene}/Overlay"), false);
        }
        Arc::new(Self {
            state: Mutex::new(FakeState {
                current_scene: Some("Intro".to_string()),
                scenes,
                visibility,
                collections: vec!["Default".to_string(), "Podcast".to_string()],
                current_collection: Some("Default".to_string()),
                outputs: OutputStatus::default(),
                refuse: None,
            }),
        })
    }

    /// Make every subsequent mutator fail, simulating a host refusal.
    pub fn refuse_mutations(&self, reason: &str) {
        self.lock().refuse = Some(reason.to_string());
    }

    pub fn allow_mutations(&self) {
        self.lock().refuse = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_refusal(state: &FakeState) -> Result<(), DomainError> {
        match &state.refuse {
            Some(reason) => Err(DomainError::OperationFailed(reason.clone())),
            None => Ok(()),
        }
    }
}

impl StudioModel for FakeStudio {
    fn scenes(&self) -> Vec<String> {
        self.lock().scenes.clone()
    }

    fn current_scene(&self) -> Option<String> {
        self.lock().current_scene.clone()
    }

    fn switch_scene(&self, name: &str) -> Result<(), DomainError> {
        let mut state = self.lock();
        Self::check_refusal(&state)?;
        if !state.scenes.iter().any(|s| s == name) {
            return Err(DomainError::not_found("scene", name));
        }
        state.current_scene = Some(name.to_string());
        Ok(())
    }

    fn sources(&self, scene: &str) -> Result<Vec<String>, DomainError> {
        let state = self.lock();
        if !state.scenes.iter().any(|s| s == scene) {
            return Err(DomainError::not_found("scene", scene));
        }
        let prefix = format!("{scene}/");
        let mut names: Vec<String> = state
            .visibility
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix).map(|s| s.to_string()))
            .collect();
        names.sort();
        Ok(names)
    }

    fn item_visible(&self, scene: &str, source: &str) -> Result<bool, DomainError> {
        let state = self.lock();
        if !state.scenes.iter().any(|s| s == scene) {
            return Err(DomainError::not_found("scene", scene));
        }
        state
            .visibility
            .get(&format!("{scene}/{source}"))
            .copied()
            .ok_or_else(|| DomainError::not_found("source", source))
    }

    fn set_item_visible(
        &self,
        scene: &str,
        source: &str,
        visible: bool,
    ) -> Result<(), DomainError> {
        let mut state = self.lock();
        Self::check_refusal(&state)?;
        if !state.scenes.iter().any(|s| s == scene) {
            return Err(DomainError::not_found("scene", scene));
        }
        let key = format!("{scene}/{source}");
        match state.visibility.get_mut(&key) {
            Some(slot) => {
                *slot = visible;
                Ok(())
            }
            None => Err(DomainError::not_found("source", source)),
        }
    }

    fn collections(&self) -> Vec<String> {
        self.lock().collections.clone()
    }

    fn current_collection(&self) -> Option<String> {
        self.lock().current_collection.clone()
    }

    fn switch_collection(&self, name: &str) -> Result<(), DomainError> {
        let mut state = self.lock();
        Self::check_refusal(&state)?;
        if !state.collections.iter().any(|c| c == name) {
            return Err(DomainError::not_found("collection", name));
        }
        state.current_collection = Some(name.to_string());
        Ok(())
    }

    fn output_status(&self) -> OutputStatus {
        self.lock().outputs
    }

    fn set_streaming(&self, active: bool) -> Result<(), DomainError> {
        let mut state = self.lock();
        Self::check_refusal(&state)?;
        state.outputs.streaming = active;
        Ok(())
    }

    fn set_recording(&self, active: bool) -> Result<(), DomainError> {
        let mut state = self.lock();
        Self::check_refusal(&state)?;
        state.outputs.recording = active;
        if !active {
            state.outputs.recording_paused = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_studio_starts_on_intro() {
        let studio = FakeStudio::new();
        assert_eq!(studio.current_scene().as_deref(), Some("Intro"));
        assert_eq!(studio.scenes().len(), 3);
    }

    #[test]
    fn switch_scene_rejects_unknown_names() {
        let studio = FakeStudio::new();
        let err = studio.switch_scene("DoesNotExist").unwrap_err();
        assert_eq!(err, DomainError::not_found("scene", "DoesNotExist"));
        assert_eq!(studio.current_scene().as_deref(), Some("Intro"));
    }

    #[test]
    fn refusal_makes_mutators_fail() {
        let studio = FakeStudio::new();
        studio.refuse_mutations("output busy");

        let err = studio.switch_scene("Main").unwrap_err();
        assert_eq!(err, DomainError::OperationFailed("output busy".to_string()));

        studio.allow_mutations();
        assert!(studio.switch_scene("Main").is_ok());
    }

    #[test]
    fn visibility_roundtrip() {
        let studio = FakeStudio::new();
        assert!(studio.item_visible("Main", "Camera").unwrap());
        studio.set_item_visible("Main", "Camera", false).unwrap();
        assert!(!studio.item_visible("Main", "Camera").unwrap());
    }

    #[test]
    fn sources_lists_scene_members_sorted() {
        let studio = FakeStudio::new();
        assert_eq!(studio.sources("Intro").unwrap(), vec!["Camera", "Overlay"]);
        assert!(studio.sources("Nope").is_err());
    }

    #[test]
    fn stopping_recording_clears_pause() {
        let studio = FakeStudio::new();
        studio.set_recording(true).unwrap();
        studio.lock().outputs.recording_paused = true;
        studio.set_recording(false).unwrap();
        assert_eq!(studio.output_status(), OutputStatus::default());
    }

    #[test]
    fn memory_sink_collects_lines() {
        let sink = MemorySink::new();
        sink.log("connected");
        sink.log("disconnected");
        assert_eq!(sink.lines(), vec!["connected", "disconnected"]);
    }
}
