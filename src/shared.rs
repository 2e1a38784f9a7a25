//! Shared variable store: named slots with condvar-based wait/notify.
//!
//! Lets the socket thread block on signals set by host callback threads
//! ("frontend loaded", "collection loaded") without polling. Notification
//! happens under the same lock the wait predicate checks, so a waiter that
//! enters before a `set` never misses it.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Why a `wait_until` call returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The predicate held before the timeout elapsed.
    Satisfied,
    /// The timeout elapsed with the predicate still false.
    TimedOut,
}

/// One named slot. The value mutex doubles as the condvar's lock.
struct Slot {
    value: Mutex<Option<Value>>,
    changed: Condvar,
}

impl Slot {
    fn new() -> Self {
        Self {
            value: Mutex::new(None),
            changed: Condvar::new(),
        }
    }
}

/// Thread-safe key/value store with per-name wait/notify.
///
/// Operations on one name are mutually exclusive; different names never
/// block each other. The outer map lock is held only long enough to fetch
/// or create a slot handle.
pub struct SharedVars {
    slots: Mutex<HashMap<String, Arc<Slot>>>,
}

impl SharedVars {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, name: &str) -> Arc<Slot> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            slots
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Slot::new())),
        )
    }

    /// Store a value and wake every waiter on `name`.
    pub fn set(&self, name: &str, value: Value) {
        let slot = self.slot(name);
        let mut current = slot.value.lock().unwrap_or_else(|e| e.into_inner());
        *current = Some(value);
        // Notify while still holding the lock the waiters' predicate uses.
        slot.changed.notify_all();
    }

    /// Current value of `name`, if any has been set.
    pub fn get(&self, name: &str) -> Option<Value> {
        let slot = self.slot(name);
        let current = slot.value.lock().unwrap_or_else(|e| e.into_inner());
        current.clone()
    }

    /// Clear a name. Waiters are woken so their predicate can re-evaluate.
    pub fn unset(&self, name: &str) {
        let slot = self.slot(name);
        let mut current = slot.value.lock().unwrap_or_else(|e| e.into_inner());
        *current = None;
        slot.changed.notify_all();
    }

    /// Block until `predicate(current_value)` holds or `timeout` elapses.
    ///
    /// The predicate sees `None` while the name is unset. Safe to call from
    /// any thread, including the socket thread.
    pub fn wait_until<F>(&self, name: &str, predicate: F, timeout: Duration) -> WaitOutcome
    where
        F: Fn(Option<&Value>) -> bool,
    {
        let slot = self.slot(name);
        let deadline = Instant::now() + timeout;
        let mut current = slot.value.lock().unwrap_or_else(|e| e.into_inner());

        loop {
            if predicate(current.as_ref()) {
                return WaitOutcome::Satisfied;
            }
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::TimedOut;
            }
            let (guard, result) = slot
                .changed
                .wait_timeout(current, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            current = guard;
            if result.timed_out() && !predicate(current.as_ref()) {
                return WaitOutcome::TimedOut;
            }
        }
    }
}

impl Default for SharedVars {
    fn default() -> Self {
        Self::new()
    }
}
