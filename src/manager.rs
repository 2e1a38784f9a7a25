//! Connection manager: reconnect policy, event fan-out, and inbound
//! request dispatch.
//!
//! The manager owns the [`Connection`] and a single worker thread that
//! multiplexes operator commands with connection reports. All policy lives
//! here: the connection itself only ever makes single attempts and reports
//! what happened.

use crate::config::BridgeConfig;
use crate::connection::{ConnEvent, Connection, ResponseOutcome};
use crate::error::{ConnectionError, RequestError};
use crate::events::{EventBus, EventKind, ObserverId};
use crate::protocol::Message;
use crate::services::ServiceRegistry;
use crate::shared::{SharedVars, WaitOutcome};
use crate::studio::{LogSink, StudioModel};
use crate::triggers::FRONTEND_LOADED_VAR;
use crossbeam_channel::{select, unbounded, Receiver, RecvTimeoutError, Sender};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How long the worker waits for the host frontend before the first
/// connection attempt.
const FRONTEND_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Link status as seen by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Reconnect attempts are exhausted; only an explicit reconnect leaves
    /// this state.
    Offline,
    Closing,
}

/// Operator commands handled by the worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ctrl {
    Connect,
    Disconnect,
    Shutdown,
}

enum Flow {
    Continue,
    Stop,
}

enum CycleEnd {
    Connected,
    Offline,
    Interrupted(Ctrl),
}

pub struct ConnectionManager {
    conn: Arc<Connection>,
    ctrl_tx: Sender<Ctrl>,
    ctrl_rx: Mutex<Option<Receiver<Ctrl>>>,
    conn_rx: Mutex<Option<Receiver<ConnEvent>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    link: Mutex<LinkState>,
    registry: Arc<ServiceRegistry>,
    bus: Arc<EventBus>,
    model: Arc<dyn StudioModel>,
    sink: Arc<dyn LogSink>,
    vars: Arc<SharedVars>,
    cfg: BridgeConfig,
    observer: Mutex<Option<ObserverId>>,
    shutting_down: AtomicBool,
}

impl ConnectionManager {
    pub fn new(
        model: Arc<dyn StudioModel>,
        sink: Arc<dyn LogSink>,
        vars: Arc<SharedVars>,
        bus: Arc<EventBus>,
        registry: Arc<ServiceRegistry>,
        cfg: BridgeConfig,
    ) -> Arc<Self> {
        let (ctrl_tx, ctrl_rx) = unbounded();
        let (conn_tx, conn_rx) = unbounded();
        Arc::new(Self {
            conn: Connection::new(conn_tx),
            ctrl_tx,
            ctrl_rx: Mutex::new(Some(ctrl_rx)),
            conn_rx: Mutex::new(Some(conn_rx)),
            worker: Mutex::new(None),
            link: Mutex::new(LinkState::Disconnected),
            registry,
            bus,
            model,
            sink,
            vars,
            cfg,
            observer: Mutex::new(None),
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Register the device fan-out observer, spawn the worker, and kick off
    /// the first connection cycle.
    pub fn start(self: &Arc<Self>) {
        let conn = Arc::clone(&self.conn);
        let id = self.bus.add_observer(move |event| {
            // A closed link just drops the notification; the device gets a
            // fresh snapshot on reconnect anyway.
            match conn.send(&Message::event(event.kind, event.payload.clone())) {
                Ok(()) | Err(ConnectionError::NotConnected) => Ok(()),
                Err(e) => Err(e.into()),
            }
        });
        for kind in EventKind::ALL {
            self.bus.subscribe(id, *kind);
        }
        *self.observer.lock().unwrap_or_else(|e| e.into_inner()) = Some(id);

        let ctrl_rx = self
            .ctrl_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .expect("manager started twice");
        let conn_rx = self
            .conn_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .expect("manager started twice");

        let manager = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("deckbridge-manager".into())
            .spawn(move || manager.worker_loop(ctrl_rx, conn_rx))
            .expect("spawn manager thread");
        *self.worker.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);

        let _ = self.ctrl_tx.send(Ctrl::Connect);
    }

    pub fn status(&self) -> LinkState {
        *self.link.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Send a request to the device and block for its response.
    pub fn request(&self, method: &str, params: Value) -> crate::error::Result<ResponseOutcome> {
        let pending = self.conn.request(method, params)?;
        Ok(pending.wait(self.cfg.request_timeout())?)
    }

    /// Leave the offline latch (or a dead link) and try connecting again.
    pub fn reconnect(&self) {
        let _ = self.ctrl_tx.send(Ctrl::Connect);
    }

    /// Operator-initiated disconnect. No reconnect cycle follows.
    pub fn disconnect(&self) {
        let _ = self.ctrl_tx.send(Ctrl::Disconnect);
    }

    /// Tear everything down. On return the worker has exited, the socket is
    /// closed, and every pending request has been completed with
    /// [`RequestError::Shutdown`].
    pub fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.set_link(LinkState::Closing);
        let _ = self.ctrl_tx.send(Ctrl::Shutdown);
        if let Some(handle) = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            let _ = handle.join();
        }
        if let Some(id) = self
            .observer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            self.bus.remove_observer(id);
        }
        self.set_link(LinkState::Disconnected);
    }

    // ─────────────────────────────────────────────────────────────────
    // Worker thread
    // ─────────────────────────────────────────────────────────────────

    fn worker_loop(self: Arc<Self>, ctrl_rx: Receiver<Ctrl>, conn_rx: Receiver<ConnEvent>) {
        let mut frontend_checked = false;
        loop {
            let flow = select! {
                recv(ctrl_rx) -> msg => {
                    let ctrl = msg.unwrap_or(Ctrl::Shutdown);
                    self.handle_ctrl(ctrl, &ctrl_rx, &mut frontend_checked)
                }
                recv(conn_rx) -> msg => match msg {
                    Ok(event) => self.handle_conn_event(event, &ctrl_rx),
                    Err(_) => Flow::Stop,
                },
            };
            if let Flow::Stop = flow {
                break;
            }
        }
    }

    fn handle_ctrl(
        &self,
        ctrl: Ctrl,
        ctrl_rx: &Receiver<Ctrl>,
        frontend_checked: &mut bool,
    ) -> Flow {
        match ctrl {
            Ctrl::Connect => {
                if self.status() == LinkState::Connected {
                    return Flow::Continue;
                }
                if !*frontend_checked {
                    *frontend_checked = true;
                    let outcome = self.vars.wait_until(
                        FRONTEND_LOADED_VAR,
                        |value| value.is_some(),
                        FRONTEND_WAIT_TIMEOUT,
                    );
                    if outcome == WaitOutcome::TimedOut {
                        tracing::warn!("frontend never signalled loaded; connecting anyway");
                    }
                }
                self.set_link(LinkState::Connecting);
                self.settle_cycle(ctrl_rx)
            }
            Ctrl::Disconnect => {
                self.conn.close(RequestError::ConnectionLost);
                self.set_link(LinkState::Disconnected);
                self.sink.log("Disconnected from deck device");
                Flow::Continue
            }
            Ctrl::Shutdown => {
                self.conn.close(RequestError::Shutdown);
                Flow::Stop
            }
        }
    }

    fn handle_conn_event(&self, event: ConnEvent, ctrl_rx: &Receiver<Ctrl>) -> Flow {
        match event {
            ConnEvent::Connected => {
                self.set_link(LinkState::Connected);
                self.sink
                    .log(&format!("Connected to deck device at {}", self.cfg.device_addr));
                self.push_snapshot();
                Flow::Continue
            }
            ConnEvent::Inbound(Message::Request { id, method, params }) => {
                let reply = match self.registry.dispatch(&method, &params) {
                    Ok(result) => Message::response_ok(id, result),
                    Err(body) => Message::response_err(id, body),
                };
                if let Err(e) = self.conn.send(&reply) {
                    tracing::warn!(id, error = %e, "dropping response to dead link");
                }
                Flow::Continue
            }
            ConnEvent::Inbound(other) => {
                // Devices only send requests; anything else is noise.
                tracing::warn!(?other, "ignoring unexpected inbound message");
                Flow::Continue
            }
            ConnEvent::Disconnected(err) => {
                self.sink.log(&format!("Connection lost: {err}"));
                if self.shutting_down.load(Ordering::SeqCst) {
                    return Flow::Continue;
                }
                self.set_link(LinkState::Reconnecting);
                self.settle_cycle(ctrl_rx)
            }
        }
    }

    /// Run one connection cycle and absorb any command that interrupted it.
    fn settle_cycle(&self, ctrl_rx: &Receiver<Ctrl>) -> Flow {
        match self.connect_cycle(ctrl_rx) {
            CycleEnd::Connected | CycleEnd::Offline => Flow::Continue,
            CycleEnd::Interrupted(Ctrl::Disconnect) => {
                self.conn.close(RequestError::ConnectionLost);
                self.set_link(LinkState::Disconnected);
                Flow::Continue
            }
            CycleEnd::Interrupted(_) => {
                self.conn.close(RequestError::Shutdown);
                Flow::Stop
            }
        }
    }

    /// Bounded attempt sequence: immediate first try, then a doubling delay
    /// capped at the configured maximum. Exhaustion latches [`LinkState::Offline`].
    fn connect_cycle(&self, ctrl_rx: &Receiver<Ctrl>) -> CycleEnd {
        let rc = &self.cfg.reconnect;
        let max_attempts = rc.max_attempts.max(1);
        let max_delay = Duration::from_millis(rc.max_delay_ms);
        let mut delay = Duration::from_millis(rc.initial_delay_ms);

        for attempt in 1..=max_attempts {
            match self.conn.connect(&self.cfg.device_addr) {
                Ok(()) => return CycleEnd::Connected,
                Err(e) => {
                    tracing::warn!(attempt, max_attempts, error = %e, "connect attempt failed");
                }
            }
            if attempt == max_attempts {
                break;
            }
            match ctrl_rx.recv_timeout(delay) {
                // Retry immediately on an explicit connect command.
                Ok(Ctrl::Connect) => {}
                Ok(ctrl) => return CycleEnd::Interrupted(ctrl),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return CycleEnd::Interrupted(Ctrl::Shutdown)
                }
            }
            delay = (delay * 2).min(max_delay);
        }

        self.set_link(LinkState::Offline);
        self.sink
            .log("Deck device unreachable; staying offline until reconnect");
        CycleEnd::Offline
    }

    /// Push the device a full picture of the studio right after connecting.
    fn push_snapshot(&self) {
        self.bus.fire(
            EventKind::SceneListBuilt,
            json!({
                "scenes": self.model.scenes(),
                "current": self.model.current_scene(),
            }),
        );
        self.bus.fire(
            EventKind::CollectionListBuilt,
            json!({
                "collections": self.model.collections(),
                "current": self.model.current_collection(),
            }),
        );
    }

    fn set_link(&self, state: LinkState) {
        *self.link.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }
}
