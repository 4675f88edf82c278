use super::state::{AppState, PaneResize};
use super::Action;
use crate::input::{encode_wheel, filter_outbound, paste_chunks};
use crate::models::{AgentKind, TermSize, TerminalId};
use crate::pty::{BackendPump, LaunchSpec, PtyBackend};
use crate::resize::ResizeReason;
use crate::spawn::{SpawnOrchestrator, SpawnOutcome};
use crate::terminal::{queries, TerminalEmulator};
use anyhow::Result;
use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

const WHEEL_LINES: isize = 3;
const STOP_GRACE: Duration = Duration::from_millis(800);

/// Everything the handler talks to besides the state.
pub struct Services {
    /// Process control: launch commands, stopping, reaping.
    pub processes: PtyBackend,
    pub orchestrator: Arc<SpawnOrchestrator>,
    pub pump: BackendPump,
    pub action_tx: mpsc::UnboundedSender<Action>,
    pub workdir: PathBuf,
}

pub fn process_action(state: &mut AppState, action: Action, services: &Services) -> Result<()> {
    let now = Instant::now();
    match action {
        Action::Quit => {
            state.should_quit = true;
        }
        Action::Tick => {
            for (id, size) in state.poll_resizes(now) {
                services.pump.resize(&id, size);
            }
            let mounted: Vec<TerminalId> = state.panes.iter().filter_map(|p| p.terminal.clone()).collect();
            for id in mounted {
                if let Some(term) = state.registry.get_mut(&id) {
                    if term.take_repaint_request() {
                        state.needs_full_redraw = true;
                    }
                }
            }
        }
        Action::Resize(w, h) => {
            state.window = (w, h);
            let results = state.fit_panes(ResizeReason::Observer, now);
            dispatch_resizes(services, results);
        }

        Action::NewShell => {
            let (program, _) = state.config.launch_command(&AgentKind::Shell(String::new()));
            let name = Path::new(&program)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or(program);
            open_terminal(state, services, TerminalId::new_session(), AgentKind::Shell(name));
        }
        Action::NewAgent => {
            let kind = state.next_agent_kind();
            open_terminal(state, services, TerminalId::new_session(), kind);
        }
        Action::SelectTab(idx) => {
            let resize = state.select_tab(idx, now);
            after_mount(state, services, resize.into_iter().collect());
        }
        Action::NextTab => {
            let resize = state.cycle_tab(true, now);
            after_mount(state, services, resize.into_iter().collect());
        }
        Action::PrevTab => {
            let resize = state.cycle_tab(false, now);
            after_mount(state, services, resize.into_iter().collect());
        }
        Action::ToggleSplit => {
            let results = state.toggle_split(now);
            after_mount(state, services, results);
        }
        Action::FocusOtherPane => state.focus_other_pane(),
        Action::GrowLeftPane => dispatch_resizes(services, state.adjust_split(true, now)),
        Action::ShrinkLeftPane => dispatch_resizes(services, state.adjust_split(false, now)),
        Action::RestartTab => {
            if let Some(id) = state.focused_terminal().cloned() {
                state.last_error = None;
                let stop = services.processes.stop(&id, STOP_GRACE);
                let tx = services.action_tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = stop.await {
                        tracing::warn!(terminal = %id, "Failed to stop process for restart: {}", e);
                    }
                    let _ = tx.send(Action::StopFinished {
                        terminal: id,
                        restart: true,
                    });
                });
            }
        }
        Action::CloseTab => {
            if let Some(id) = state.focused_terminal().cloned() {
                close_terminal(state, services, &id, now);
            }
        }

        Action::ScrollUp => {
            let delta = half_page(state);
            state.scroll_focused(-delta);
        }
        Action::ScrollDown => {
            let delta = half_page(state);
            state.scroll_focused(delta);
        }
        Action::MouseWheel { up, column, row } => {
            let Some((pane, col, line)) = state.pane_at(column, row) else {
                return Ok(());
            };
            let Some(id) = state.panes[pane].terminal.clone() else {
                return Ok(());
            };
            if let Some(term) = state.registry.get_mut(&id) {
                let modes = term.input_modes();
                if modes.mouse_tracking {
                    services.pump.write(&id, encode_wheel(up, col, line, modes));
                } else {
                    term.scroll_lines(if up { -WHEEL_LINES } else { WHEEL_LINES });
                }
            }
        }

        Action::SendInput(data) => {
            let Some(id) = state.focused_terminal().cloned() else {
                return Ok(());
            };
            if let Some(term) = state.registry.get_mut(&id) {
                let data = filter_outbound(&data, term.input_modes());
                if data.is_empty() {
                    return Ok(());
                }
                if !term.buffer().is_following_output() {
                    term.scroll_to_bottom();
                }
                services.pump.write(&id, data);
            }
        }
        Action::Paste(text) => {
            let Some(id) = state.focused_terminal().cloned() else {
                return Ok(());
            };
            let chunk_size = state.config.paste.chunk_size;
            if let Some(term) = state.registry.get_mut(&id) {
                let modes = term.input_modes();
                let filtered = filter_outbound(text.as_bytes(), modes);
                let text = String::from_utf8_lossy(&filtered);
                if !term.buffer().is_following_output() {
                    term.scroll_to_bottom();
                }
                for chunk in paste_chunks(&text, chunk_size, modes.bracketed_paste) {
                    services.pump.write(&id, chunk.into_bytes());
                }
            }
        }

        Action::PtyOutput(id, seq, data) => {
            let (output, found) = queries::extract_queries(&data);
            if state.registry.write_output(&id, Some(seq), &output) && !found.is_empty() {
                if let Some(term) = state.registry.get(&id) {
                    let cursor = term.cursor_position();
                    for query in found {
                        services.pump.write(&id, queries::response(query, cursor));
                    }
                }
            }
        }
        Action::SessionExited(id, generation, code) => {
            if services.processes.reap(&id, generation) {
                tracing::info!(terminal = %id, code, "Terminal process exited");
                services.orchestrator.mark_exited(&id);
                if let Some(tab) = state.tab_mut(&id) {
                    tab.exited = Some(code);
                }
                let notice = format!("\r\n\x1b[2m[process exited with code {}]\x1b[0m\r\n", code);
                state.registry.write_output(&id, None, notice.as_bytes());
            }
        }
        Action::SpawnFinished(id, outcome) => {
            if state.tab(&id).is_none() {
                // Closed while starting.
                forget_process(services, &id);
                return Ok(());
            }
            match outcome {
                Ok(()) => {
                    if state.last_error.as_ref().is_some_and(|e| e.key() == &id) {
                        state.last_error = None;
                    }
                }
                Err(e) => state.last_error = Some(e),
            }
        }
        Action::StopFinished { terminal, restart } => {
            if restart && state.tab(&terminal).is_some() {
                if let Some(tab) = state.tab_mut(&terminal) {
                    tab.exited = None;
                }
                let start = with_measured_size(state, &terminal, |size, kind| {
                    services.orchestrator.restart_session_top(&terminal, size, kind)
                });
                if let Some(start) = start {
                    await_outcome(services, terminal.clone(), start);
                    services.orchestrator.clear_background_start(&terminal);
                }
            }
        }
        Action::Lifecycle(event) => {
            tracing::trace!(key = %event.key, state = %event.state, "Lifecycle event");
        }
    }
    Ok(())
}

fn half_page(state: &AppState) -> isize {
    let rows = state
        .focused_terminal()
        .and_then(|id| state.registry.get(id))
        .map(|term| term.size().rows as isize)
        .unwrap_or(2);
    (rows / 2).max(1)
}

/// Register, open and mount a new terminal, then start its process.
pub fn open_terminal(state: &mut AppState, services: &Services, id: TerminalId, kind: AgentKind) {
    let (program, args) = state.config.launch_command(&kind);
    services
        .processes
        .register(&id, LaunchSpec::new(program, args, services.workdir.clone()));
    state.add_tab(id.clone(), kind);
    let pane = state.focused_pane;
    let resize = state.mount(pane, &id, Instant::now());
    after_mount(state, services, resize.into_iter().collect());
}

fn close_terminal(state: &mut AppState, services: &Services, id: &TerminalId, now: Instant) {
    let pane = state.pane_showing(id);
    state.remove_tab(id);
    services.orchestrator.forget(id);
    forget_process(services, id);
    if state.last_error.as_ref().is_some_and(|e| e.key() == id) {
        state.last_error = None;
    }

    // Refill the emptied pane with a hidden tab, if any.
    if let Some(pane) = pane {
        let hidden = state
            .tabs
            .iter()
            .find(|tab| state.pane_showing(&tab.id).is_none())
            .map(|tab| tab.id.clone());
        if let Some(next) = hidden {
            let resize = state.mount(pane, &next, now);
            after_mount(state, services, resize.into_iter().collect());
        }
    }
}

fn forget_process(services: &Services, id: &TerminalId) {
    let forget = services.processes.forget(id);
    let id = id.clone();
    tokio::spawn(async move {
        if let Err(e) = forget.await {
            tracing::warn!(terminal = %id, "Failed to stop closed terminal: {}", e);
        }
    });
}

/// Push resize results to the PTY and start anything newly mounted.
fn after_mount(state: &mut AppState, services: &Services, results: Vec<PaneResize>) {
    let mounted: Vec<TerminalId> = results.iter().map(|r| r.terminal.clone()).collect();
    dispatch_resizes(services, results);
    for id in mounted {
        ensure_started(state, services, &id);
    }
}

fn dispatch_resizes(services: &Services, results: Vec<PaneResize>) {
    for result in results {
        if let Some(size) = result.applied {
            services.orchestrator.remember_size(&result.terminal, size);
        }
        if let Some(size) = result.notify {
            services.pump.resize(&result.terminal, size);
        }
    }
}

/// Start the process behind a mounted terminal unless it already runs.
fn ensure_started(state: &AppState, services: &Services, id: &TerminalId) {
    let orchestrator = &services.orchestrator;
    let exited = state.tab(id).map(|tab| tab.exited.is_some()).unwrap_or(true);
    if !exited && orchestrator.lifecycle().is_idle(id) && !orchestrator.is_in_flight(id) {
        let start = with_measured_size(state, id, |size, kind| orchestrator.start_session_top(id, size, kind));
        if let Some(start) = start {
            await_outcome(services, id.clone(), start);
        }
    }
    orchestrator.clear_background_start(id);
}

fn with_measured_size<F>(state: &AppState, id: &TerminalId, start: F) -> Option<BoxFuture<'static, SpawnOutcome>>
where
    F: FnOnce(Option<TermSize>, &AgentKind) -> BoxFuture<'static, SpawnOutcome>,
{
    let tab = state.tab(id)?;
    let size = state.registry.get(id).map(|term| term.size());
    Some(start(size, &tab.kind))
}

fn await_outcome(services: &Services, id: TerminalId, start: BoxFuture<'static, SpawnOutcome>) {
    let tx = services.action_tx.clone();
    tokio::spawn(async move {
        let outcome = start.await;
        let _ = tx.send(Action::SpawnFinished(id, outcome));
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::spawn::{LifecycleTracker, SpawnState};
    use crate::test_utils::{BackendCall, FakeBackend};

    struct Harness {
        state: AppState,
        services: Services,
        backend: FakeBackend,
        actions: mpsc::UnboundedReceiver<Action>,
    }

    fn harness() -> Harness {
        let backend = FakeBackend::new();
        let config = Config::default();
        let (pty_tx, _pty_rx) = mpsc::channel(8);
        let (action_tx, actions) = mpsc::unbounded_channel();
        let shared: Arc<dyn crate::pty::Backend> = Arc::new(backend.clone());
        let (pump, _task) = BackendPump::spawn(shared.clone());
        let orchestrator = Arc::new(SpawnOrchestrator::new(
            shared,
            Arc::new(LifecycleTracker::new()),
            config.spawn.clone(),
        ));
        Harness {
            state: AppState::new(config, (120, 40)),
            services: Services {
                processes: PtyBackend::new(pty_tx),
                orchestrator,
                pump,
                action_tx,
                workdir: std::env::temp_dir(),
            },
            backend,
            actions,
        }
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    fn writes(backend: &FakeBackend) -> Vec<Vec<u8>> {
        backend
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                BackendCall::Write(_, data) => Some(data),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_opening_a_shell_starts_it_once_at_pane_size() {
        let mut h = harness();
        process_action(&mut h.state, Action::NewShell, &h.services).unwrap();
        let id = h.state.focused_terminal().cloned().unwrap();
        settle().await;

        assert_eq!(
            h.backend.calls(),
            vec![BackendCall::StartSession(id.clone(), TermSize::new(116, 36))]
        );
        assert!(!h.services.orchestrator.is_background_start(&id));
        match h.actions.recv().await {
            Some(Action::SpawnFinished(finished, Ok(()))) => assert_eq!(finished, id),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(h.services.orchestrator.lifecycle().state(&id), Some(SpawnState::Ready));

        // Re-selecting the tab does not start it again.
        process_action(&mut h.state, Action::SelectTab(0), &h.services).unwrap();
        settle().await;
        assert_eq!(h.backend.start_calls(), 1);
    }

    #[tokio::test]
    async fn test_output_is_deduplicated_and_queries_answered() {
        let mut h = harness();
        let id = TerminalId::new("session-a-top");
        open_terminal(&mut h.state, &h.services, id.clone(), AgentKind::Codex);

        process_action(&mut h.state, Action::PtyOutput(id.clone(), 1, b"ab\x1b[6n".to_vec()), &h.services).unwrap();
        process_action(&mut h.state, Action::PtyOutput(id.clone(), 1, b"ab\x1b[6n".to_vec()), &h.services).unwrap();
        settle().await;

        assert_eq!(writes(&h.backend), vec![b"\x1b[1;3R".to_vec()]);
        assert_eq!(h.state.registry.last_sequence(&id), Some(1));
        let contents = h.state.registry.get(&id).unwrap().screen().contents();
        assert_eq!(contents.trim_end(), "ab");
    }

    #[tokio::test]
    async fn test_input_is_filtered_and_paste_is_chunked() {
        let mut h = harness();
        h.state.config.paste.chunk_size = 4;
        let id = TerminalId::new("session-a-top");
        open_terminal(&mut h.state, &h.services, id.clone(), AgentKind::Claude);
        // The program turns on bracketed paste.
        process_action(&mut h.state, Action::PtyOutput(id, 1, b"\x1b[?2004h".to_vec()), &h.services).unwrap();

        process_action(&mut h.state, Action::SendInput(b"\x1b[<0;1;1M".to_vec()), &h.services).unwrap();
        process_action(&mut h.state, Action::SendInput(b"ls\r".to_vec()), &h.services).unwrap();
        process_action(&mut h.state, Action::Paste("abcdef".to_string()), &h.services).unwrap();
        settle().await;

        assert_eq!(
            writes(&h.backend),
            vec![
                b"ls\r".to_vec(),
                b"\x1b[200~".to_vec(),
                b"abcd".to_vec(),
                b"ef".to_vec(),
                b"\x1b[201~".to_vec(),
            ]
        );
    }

    #[tokio::test]
    async fn test_paste_drops_mouse_reports_and_skips_markers_without_bracketed_mode() {
        let mut h = harness();
        let id = TerminalId::new("session-a-top");
        open_terminal(&mut h.state, &h.services, id.clone(), AgentKind::Claude);
        process_action(&mut h.state, Action::PtyOutput(id.clone(), 1, b"out\r\n".to_vec()), &h.services).unwrap();

        process_action(&mut h.state, Action::Paste("x\x1b[<0;1;1My".to_string()), &h.services).unwrap();
        settle().await;
        assert_eq!(writes(&h.backend), vec![b"xy".to_vec()]);

        process_action(&mut h.state, Action::PtyOutput(id, 2, b"\x1b[?2004h".to_vec()), &h.services).unwrap();
        process_action(&mut h.state, Action::Paste("x\x1b[<0;1;1My".to_string()), &h.services).unwrap();
        settle().await;
        assert_eq!(
            writes(&h.backend)[1..],
            [b"\x1b[200~".to_vec(), b"xy".to_vec(), b"\x1b[201~".to_vec()]
        );
    }

    #[tokio::test]
    async fn test_failed_start_is_reported_and_closing_disposes() {
        let mut h = harness();
        h.backend
            .fail_starts(Some(crate::pty::BackendError::Pty("missing binary".to_string())));
        let id = TerminalId::new("session-a-top");
        open_terminal(&mut h.state, &h.services, id.clone(), AgentKind::Grok);

        let finished = h.actions.recv().await.unwrap();
        process_action(&mut h.state, finished, &h.services).unwrap();
        let err = h.state.last_error.clone().unwrap();
        assert!(err.offers_restart());
        assert!(err.to_string().contains("missing binary"));

        process_action(&mut h.state, Action::CloseTab, &h.services).unwrap();
        assert!(h.state.last_error.is_none());
        assert!(!h.state.registry.has(&id));
        assert!(h.services.orchestrator.lifecycle().is_idle(&id));
    }

    #[tokio::test]
    async fn test_debounced_resize_reaches_backend_on_tick() {
        let mut h = harness();
        let id = TerminalId::new("session-a-top");
        open_terminal(&mut h.state, &h.services, id.clone(), AgentKind::Claude);

        process_action(&mut h.state, Action::Resize(100, 40), &h.services).unwrap();
        process_action(&mut h.state, Action::Tick, &h.services).unwrap();
        settle().await;
        assert!(!h.backend.calls().iter().any(|c| matches!(c, BackendCall::Resize(..))));

        std::thread::sleep(h.state.config.resize.debounce() + Duration::from_millis(20));
        process_action(&mut h.state, Action::Tick, &h.services).unwrap();
        settle().await;
        assert!(h
            .backend
            .calls()
            .contains(&BackendCall::Resize(id, TermSize::new(98, 36))));
    }
}
