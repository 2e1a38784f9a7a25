//! Bridge between a studio host and a TCP deck device.
//!
//! The host embeds this crate, hands it a [`studio::StudioModel`] over its
//! object graph, and forwards its callbacks to the trigger adapters. The
//! bridge keeps a persistent connection to the device, answers its requests
//! through the domain services, and fans studio events out to it.

pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod manager;
pub mod protocol;
pub mod services;
pub mod shared;
pub mod studio;
pub mod triggers;

use crate::config::BridgeConfig;
use crate::events::EventBus;
use crate::manager::{ConnectionManager, LinkState};
use crate::services::{
    AppService, CollectionService, OutputService, SceneService, ServiceRegistry, SourceService,
};
use crate::shared::SharedVars;
use crate::studio::{LogSink, StudioModel};
use crate::triggers::{FrontendAdapter, SignalAdapter};
use std::sync::Arc;

/// The assembled subsystem: one of these lives for the host's lifetime.
pub struct Bridge {
    vars: Arc<SharedVars>,
    bus: Arc<EventBus>,
    manager: Arc<ConnectionManager>,
    frontend: FrontendAdapter,
    signals: SignalAdapter,
}

impl Bridge {
    /// Wire up the store, bus, services, and manager. Nothing connects until
    /// [`Bridge::startup`].
    pub fn new(model: Arc<dyn StudioModel>, sink: Arc<dyn LogSink>, cfg: BridgeConfig) -> Self {
        let vars = Arc::new(SharedVars::new());
        let bus = Arc::new(EventBus::new());

        let registry = Arc::new(ServiceRegistry::new());
        registry.register(Arc::new(SceneService::new(
            Arc::clone(&model),
            Arc::clone(&bus),
        )));
        registry.register(Arc::new(SourceService::new(
            Arc::clone(&model),
            Arc::clone(&bus),
        )));
        registry.register(Arc::new(CollectionService::new(
            Arc::clone(&model),
            Arc::clone(&bus),
            Arc::clone(&vars),
        )));
        registry.register(Arc::new(OutputService::new(
            Arc::clone(&model),
            Arc::clone(&bus),
        )));
        registry.register(Arc::new(AppService::new(Arc::clone(&model))));

        let manager = ConnectionManager::new(
            Arc::clone(&model),
            sink,
            Arc::clone(&vars),
            Arc::clone(&bus),
            registry,
            cfg,
        );

        let frontend = FrontendAdapter::new(Arc::clone(&bus), Arc::clone(&model), Arc::clone(&vars));
        let signals = SignalAdapter::new(Arc::clone(&bus));

        Self {
            vars,
            bus,
            manager,
            frontend,
            signals,
        }
    }

    /// Start the manager worker and the first connection cycle.
    pub fn startup(&self) {
        self.manager.start();
    }

    /// Synchronous teardown; safe to call from the host's exit path.
    pub fn shutdown(&self) {
        self.manager.shutdown();
    }

    pub fn status(&self) -> LinkState {
        self.manager.status()
    }

    /// Adapter for host frontend callbacks.
    pub fn frontend(&self) -> &FrontendAdapter {
        &self.frontend
    }

    /// Adapter for host core signals.
    pub fn signals(&self) -> &SignalAdapter {
        &self.signals
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn vars(&self) -> &Arc<SharedVars> {
        &self.vars
    }
}
