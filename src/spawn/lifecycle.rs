use crate::models::SpawnKey;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnState {
    Spawned,
    Ready,
    Failed,
}

impl fmt::Display for SpawnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnState::Spawned => write!(f, "spawned"),
            SpawnState::Ready => write!(f, "ready"),
            SpawnState::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub key: SpawnKey,
    pub state: SpawnState,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Receives every lifecycle event as it is recorded.
pub trait LifecycleSink: Send + Sync {
    fn emit(&self, event: &LifecycleEvent);
}

#[derive(Default)]
struct TrackerInner {
    events: Vec<LifecycleEvent>,
    states: HashMap<SpawnKey, SpawnState>,
}

/// Append-only record of spawn lifecycle transitions.
///
/// A key with no current state is idle.
#[derive(Default)]
pub struct LifecycleTracker {
    inner: Mutex<TrackerInner>,
    timeouts: AtomicU64,
    sinks: Mutex<Vec<Arc<dyn LifecycleSink>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl LifecycleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sink(&self, sink: Arc<dyn LifecycleSink>) {
        lock(&self.sinks).push(sink);
    }

    pub fn report(&self, key: &SpawnKey, state: SpawnState, reason: Option<String>) {
        let event = LifecycleEvent {
            key: key.clone(),
            state,
            timestamp: Utc::now(),
            reason,
        };
        match state {
            SpawnState::Failed => tracing::warn!(key = %key, reason = ?event.reason, "Spawn failed"),
            _ => tracing::debug!(key = %key, %state, "Spawn lifecycle"),
        }

        // Sinks run under the record lock so they see events in record order.
        let mut inner = lock(&self.inner);
        inner.states.insert(key.clone(), state);
        inner.events.push(event.clone());
        for sink in lock(&self.sinks).iter() {
            sink.emit(&event);
        }
    }

    pub fn state(&self, key: &SpawnKey) -> Option<SpawnState> {
        lock(&self.inner).states.get(key).copied()
    }

    pub fn is_idle(&self, key: &SpawnKey) -> bool {
        self.state(key).is_none()
    }

    /// Return `key` to idle. The event log is left intact.
    pub fn reset(&self, key: &SpawnKey) {
        lock(&self.inner).states.remove(key);
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        lock(&self.inner).events.clone()
    }

    pub fn events_for(&self, key: &SpawnKey) -> Vec<LifecycleEvent> {
        lock(&self.inner)
            .events
            .iter()
            .filter(|e| &e.key == key)
            .cloned()
            .collect()
    }

    pub fn record_timeout(&self) -> u64 {
        self.timeouts.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn timeout_count(&self) -> u64 {
        self.timeouts.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub fn reset_for_tests(&self) {
        self.timeouts.store(0, Ordering::SeqCst);
        let mut inner = lock(&self.inner);
        inner.events.clear();
        inner.states.clear();
    }
}
