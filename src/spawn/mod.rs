mod lifecycle;
mod singleflight;

pub use lifecycle::{LifecycleEvent, LifecycleSink, LifecycleTracker, SpawnState};
pub use singleflight::SingleFlight;

use crate::config::SpawnSettings;
use crate::models::{AgentKind, SpawnKey, TabRole, TermSize};
use crate::pty::Backend;
use futures::future::{self, BoxFuture, FutureExt};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpawnError {
    #[error("start timed out after {}s for {key}", after.as_secs())]
    Timeout { key: SpawnKey, after: Duration },
    #[error("failed to start {key}: {message}")]
    Backend { key: SpawnKey, message: String },
    #[error("{key} is {state}, restart it to start again")]
    NotIdle { key: SpawnKey, state: SpawnState },
}

impl SpawnError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, SpawnError::Timeout { .. })
    }

    /// Timeouts and backend failures are recoverable by restarting.
    pub fn offers_restart(&self) -> bool {
        matches!(self, SpawnError::Timeout { .. } | SpawnError::Backend { .. })
    }

    pub fn key(&self) -> &SpawnKey {
        match self {
            SpawnError::Timeout { key, .. } | SpawnError::Backend { key, .. } | SpawnError::NotIdle { key, .. } => key,
        }
    }
}

pub type SpawnOutcome = Result<(), SpawnError>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Starts the process behind each terminal exactly once per key.
pub struct SpawnOrchestrator {
    backend: Arc<dyn Backend>,
    lifecycle: Arc<LifecycleTracker>,
    settings: SpawnSettings,
    flights: SingleFlight<SpawnKey, SpawnOutcome>,
    bootstrap_sizes: Mutex<HashMap<SpawnKey, TermSize>>,
    background_starts: Arc<Mutex<HashSet<SpawnKey>>>,
}

impl SpawnOrchestrator {
    pub fn new(backend: Arc<dyn Backend>, lifecycle: Arc<LifecycleTracker>, settings: SpawnSettings) -> Self {
        Self {
            backend,
            lifecycle,
            settings,
            flights: SingleFlight::new(),
            bootstrap_sizes: Mutex::new(HashMap::new()),
            background_starts: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleTracker> {
        &self.lifecycle
    }

    /// Start the process behind `key`, or join the start already in flight.
    ///
    /// A key that is already ready resolves immediately. A failed key stays
    /// failed until `restart_session_top`.
    pub fn start_session_top(
        &self,
        key: &SpawnKey,
        measured: Option<TermSize>,
        agent: &AgentKind,
    ) -> BoxFuture<'static, SpawnOutcome> {
        if let Some(flight) = self.flights.get(key) {
            tracing::debug!(key = %key, "Joining in-flight start");
            return flight.boxed();
        }

        match self.lifecycle.state(key) {
            None => {}
            Some(SpawnState::Ready) => return future::ready(Ok(())).boxed(),
            Some(state) => {
                return future::ready(Err(SpawnError::NotIdle {
                    key: key.clone(),
                    state,
                }))
                .boxed()
            }
        }

        let (flight, _) = self.flights.join_or_start(key, || self.launch(key, measured, agent));
        flight.boxed()
    }

    /// Return `key` to idle and start it again.
    pub fn restart_session_top(
        &self,
        key: &SpawnKey,
        measured: Option<TermSize>,
        agent: &AgentKind,
    ) -> BoxFuture<'static, SpawnOutcome> {
        if !self.flights.is_in_flight(key) {
            self.lifecycle.reset(key);
        }
        self.start_session_top(key, measured, agent)
    }

    fn launch(&self, key: &SpawnKey, measured: Option<TermSize>, agent: &AgentKind) -> BoxFuture<'static, SpawnOutcome> {
        let size = self.initial_size(key, measured);
        let window = self.settings.timeout_for(agent);

        lock(&self.background_starts).insert(key.clone());
        self.lifecycle.report(key, SpawnState::Spawned, None);
        tracing::info!(key = %key, agent = %agent, %size, timeout_secs = window.as_secs(), "Starting terminal process");

        let call = match TabRole::of(key) {
            TabRole::Orchestrator => self.backend.start_orchestrator(key, size),
            TabRole::Session => self.backend.start_session_agent(key, size),
        };
        let lifecycle = Arc::clone(&self.lifecycle);
        let background_starts = Arc::clone(&self.background_starts);
        let key = key.clone();

        async move {
            let mut handle = tokio::spawn(call);
            let outcome = match tokio::time::timeout(window, &mut handle).await {
                Ok(Ok(Ok(()))) => Ok(()),
                Ok(Ok(Err(e))) => Err(SpawnError::Backend {
                    key: key.clone(),
                    message: e.to_string(),
                }),
                Ok(Err(join_error)) => Err(SpawnError::Backend {
                    key: key.clone(),
                    message: join_error.to_string(),
                }),
                Err(_) => {
                    let total = lifecycle.record_timeout();
                    tracing::warn!(key = %key, timeouts = total, "Start timed out after {:?}", window);
                    let late_key = key.clone();
                    tokio::spawn(async move {
                        match handle.await {
                            Ok(Ok(())) => tracing::info!(key = %late_key, "Start resolved after its timeout"),
                            Ok(Err(e)) => tracing::warn!(key = %late_key, "Start failed after its timeout: {}", e),
                            Err(e) => tracing::debug!(key = %late_key, "Start task ended after its timeout: {}", e),
                        }
                    });
                    Err(SpawnError::Timeout {
                        key: key.clone(),
                        after: window,
                    })
                }
            };

            match &outcome {
                Ok(()) => lifecycle.report(&key, SpawnState::Ready, None),
                Err(e) => {
                    lock(&background_starts).remove(&key);
                    lifecycle.report(&key, SpawnState::Failed, Some(e.to_string()));
                }
            }
            outcome
        }
        .boxed()
    }

    /// Size used for the first PTY: measured, else remembered, else the
    /// bootstrap size, less the guard columns.
    pub fn initial_size(&self, key: &SpawnKey, measured: Option<TermSize>) -> TermSize {
        let base = measured
            .or_else(|| lock(&self.bootstrap_sizes).get(key).copied())
            .unwrap_or_else(|| TermSize::new(self.settings.bootstrap_cols, self.settings.bootstrap_rows));
        TermSize::new(
            base.cols.saturating_sub(self.settings.guard_columns).max(1),
            base.rows.max(1),
        )
    }

    pub fn remember_size(&self, key: &SpawnKey, size: TermSize) {
        lock(&self.bootstrap_sizes).insert(key.clone(), size);
    }

    pub fn is_in_flight(&self, key: &SpawnKey) -> bool {
        self.flights.is_in_flight(key)
    }

    pub fn is_background_start(&self, key: &SpawnKey) -> bool {
        lock(&self.background_starts).contains(key)
    }

    /// Called once a surface has mounted the terminal.
    pub fn clear_background_start(&self, key: &SpawnKey) {
        lock(&self.background_starts).remove(key);
    }

    /// The process behind `key` has gone away; a new start may begin.
    pub fn mark_exited(&self, key: &SpawnKey) {
        if !self.flights.is_in_flight(key) {
            self.lifecycle.reset(key);
        }
    }

    /// Drop everything known about `key`.
    pub fn forget(&self, key: &SpawnKey) {
        self.lifecycle.reset(key);
        lock(&self.bootstrap_sizes).remove(key);
        lock(&self.background_starts).remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pty::BackendError;
    use crate::test_utils::{BackendCall, FakeBackend};

    fn settings() -> SpawnSettings {
        SpawnSettings {
            timeout_secs: 20,
            extended_timeout_secs: 60,
            slow_agents: vec!["codex".to_string()],
            guard_columns: 2,
            bootstrap_cols: 80,
            bootstrap_rows: 24,
        }
    }

    fn orchestrator(backend: &FakeBackend) -> SpawnOrchestrator {
        SpawnOrchestrator::new(Arc::new(backend.clone()), Arc::new(LifecycleTracker::new()), settings())
    }

    fn states(orch: &SpawnOrchestrator, key: &SpawnKey) -> Vec<SpawnState> {
        orch.lifecycle().events_for(key).iter().map(|e| e.state).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_starts_issue_one_backend_call() {
        let backend = FakeBackend::with_start_delay(Duration::from_secs(1));
        let orch = orchestrator(&backend);
        let key = SpawnKey::new("session-abc-top");

        let first = orch.start_session_top(&key, Some(TermSize::new(100, 30)), &AgentKind::Claude);
        let second = orch.start_session_top(&key, Some(TermSize::new(120, 40)), &AgentKind::Claude);
        let third = orch.start_session_top(&key, None, &AgentKind::Claude);
        assert!(orch.is_in_flight(&key));

        let (a, b, c) = tokio::join!(first, second, third);
        assert_eq!(a, Ok(()));
        assert_eq!(b, Ok(()));
        assert_eq!(c, Ok(()));
        assert_eq!(backend.start_calls(), 1);
        assert_eq!(states(&orch, &key), vec![SpawnState::Spawned, SpawnState::Ready]);
        assert!(!orch.is_in_flight(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_a_failure() {
        let backend = FakeBackend::with_start_delay(Duration::from_millis(10));
        backend.fail_starts(Some(BackendError::Pty("no such binary".to_string())));
        let orch = orchestrator(&backend);
        let key = SpawnKey::new("session-x-top");

        let (a, b) = tokio::join!(
            orch.start_session_top(&key, None, &AgentKind::Gemini),
            orch.start_session_top(&key, None, &AgentKind::Gemini),
        );
        assert_eq!(a, b);
        let err = a.unwrap_err();
        assert!(!err.is_timeout());
        assert!(err.offers_restart());
        assert!(err.to_string().contains("no such binary"));
        assert_eq!(backend.start_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_distinct_and_counted_once() {
        let backend = FakeBackend::with_start_delay(Duration::from_secs(30));
        let orch = orchestrator(&backend);
        let key = SpawnKey::new("session-slow-top");

        let started = tokio::time::Instant::now();
        let result = orch.start_session_top(&key, None, &AgentKind::Claude).await;
        assert_eq!(started.elapsed(), Duration::from_secs(20));

        let err = result.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(
            err,
            SpawnError::Timeout {
                key: key.clone(),
                after: Duration::from_secs(20)
            }
        );
        assert_eq!(orch.lifecycle().timeout_count(), 1);
        assert!(!orch.is_background_start(&key));

        // Let the backend call resolve late.
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(orch.lifecycle().timeout_count(), 1);
        assert_eq!(orch.lifecycle().state(&key), Some(SpawnState::Failed));
        assert_eq!(states(&orch, &key), vec![SpawnState::Spawned, SpawnState::Failed]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_failure_after_timeout_changes_nothing() {
        let backend = FakeBackend::with_start_delay(Duration::from_secs(25));
        backend.fail_starts(Some(BackendError::Pty("agent crashed".to_string())));
        let orch = orchestrator(&backend);
        let key = SpawnKey::new("session-late-top");

        let result = orch.start_session_top(&key, None, &AgentKind::Gemini).await;
        let expected = Err(SpawnError::Timeout {
            key: key.clone(),
            after: Duration::from_secs(20),
        });
        assert_eq!(result, expected);
        assert!(!orch.is_background_start(&key));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(orch.lifecycle().timeout_count(), 1);
        assert_eq!(states(&orch, &key), vec![SpawnState::Spawned, SpawnState::Failed]);
        let reason = orch.lifecycle().events_for(&key)[1].reason.clone();
        assert!(reason.is_some_and(|r| r.contains("timed out")));
        assert!(!orch.is_background_start(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_agents_get_extended_window() {
        let backend = FakeBackend::with_start_delay(Duration::from_secs(45));
        let orch = orchestrator(&backend);
        let key = SpawnKey::new("session-codex-top");

        let result = orch.start_session_top(&key, None, &AgentKind::Codex).await;
        assert_eq!(result, Ok(()));
        assert_eq!(orch.lifecycle().timeout_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_key_does_not_start_again() {
        let backend = FakeBackend::new();
        let orch = orchestrator(&backend);
        let key = SpawnKey::new("session-a-top");

        orch.start_session_top(&key, None, &AgentKind::Claude).await.unwrap();
        orch.start_session_top(&key, None, &AgentKind::Claude).await.unwrap();
        assert_eq!(backend.start_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_key_needs_restart() {
        let backend = FakeBackend::new();
        backend.fail_starts(Some(BackendError::Io("broken pipe".to_string())));
        let orch = orchestrator(&backend);
        let key = SpawnKey::new("session-a-top");

        assert!(orch.start_session_top(&key, None, &AgentKind::Claude).await.is_err());
        assert!(!orch.is_background_start(&key));

        let again = orch.start_session_top(&key, None, &AgentKind::Claude).await;
        assert_eq!(
            again,
            Err(SpawnError::NotIdle {
                key: key.clone(),
                state: SpawnState::Failed
            })
        );
        assert_eq!(backend.start_calls(), 1);

        backend.fail_starts(None);
        orch.restart_session_top(&key, None, &AgentKind::Claude).await.unwrap();
        assert_eq!(backend.start_calls(), 2);
        assert_eq!(orch.lifecycle().state(&key), Some(SpawnState::Ready));
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_start_mark() {
        let backend = FakeBackend::with_start_delay(Duration::from_secs(1));
        let orch = orchestrator(&backend);
        let key = SpawnKey::new("session-a-top");

        let pending = orch.start_session_top(&key, None, &AgentKind::Claude);
        assert!(orch.is_background_start(&key));
        orch.clear_background_start(&key);
        assert!(!orch.is_background_start(&key));
        pending.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_size_prefers_measurement_then_memory() {
        let backend = FakeBackend::new();
        let orch = orchestrator(&backend);
        let key = SpawnKey::new("session-a-top");

        assert_eq!(orch.initial_size(&key, None), TermSize::new(78, 24));
        orch.remember_size(&key, TermSize::new(132, 50));
        assert_eq!(orch.initial_size(&key, None), TermSize::new(130, 50));
        assert_eq!(
            orch.initial_size(&key, Some(TermSize::new(100, 30))),
            TermSize::new(98, 30)
        );
        assert_eq!(orch.initial_size(&key, Some(TermSize::new(1, 1))), TermSize::new(1, 1));

        orch.start_session_top(&key, Some(TermSize::new(100, 30)), &AgentKind::Claude)
            .await
            .unwrap();
        assert_eq!(
            backend.calls(),
            vec![BackendCall::StartSession(key, TermSize::new(98, 30))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_orchestrator_keys_use_orchestrator_start() {
        let backend = FakeBackend::new();
        let orch = orchestrator(&backend);
        let key = SpawnKey::orchestrator("main");

        orch.start_session_top(&key, None, &AgentKind::Claude).await.unwrap();
        assert_eq!(
            backend.calls(),
            vec![BackendCall::StartOrchestrator(key, TermSize::new(78, 24))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exit_returns_key_to_idle() {
        let backend = FakeBackend::new();
        let orch = orchestrator(&backend);
        let key = SpawnKey::new("session-a-top");

        orch.start_session_top(&key, None, &AgentKind::Shell("bash".into())).await.unwrap();
        orch.mark_exited(&key);
        assert!(orch.lifecycle().is_idle(&key));
        orch.start_session_top(&key, None, &AgentKind::Shell("bash".into())).await.unwrap();
        assert_eq!(backend.start_calls(), 2);
    }
}
