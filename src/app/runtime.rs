use crate::app::{Action, AppState};
use crate::config::Config;
use crate::models::TerminalId;
use crate::pty::{Backend, BackendPump, PtyBackend};
use crate::spawn::{LifecycleEvent, LifecycleSink, LifecycleTracker, SpawnOrchestrator};
use crate::tui;
use crate::tui::event::EventHandler;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::handler::{open_terminal, process_action, Services};

// PTY actions handled per frame before redrawing.
const MAX_PTY_BATCH: usize = 64;

pub struct RunOptions {
    pub config: Config,
    pub workdir: PathBuf,
    pub orchestrator: bool,
}

/// Forwards lifecycle transitions into the main loop so the UI redraws.
struct ActionSink(mpsc::UnboundedSender<Action>);

impl LifecycleSink for ActionSink {
    fn emit(&self, event: &LifecycleEvent) {
        let _ = self.0.send(Action::Lifecycle(event.clone()));
    }
}

pub async fn run_tui(options: RunOptions) -> Result<()> {
    let mut terminal = tui::init()?;

    let result = run_main_loop(&mut terminal, options).await;

    tui::restore()?;

    result
}

async fn run_main_loop(terminal: &mut tui::Terminal, options: RunOptions) -> Result<()> {
    let size = terminal.size().context("Failed to read terminal size")?;

    let mut events = EventHandler::new();
    let action_tx = events.action_sender();

    let processes = PtyBackend::new(events.pty_sender());
    let backend: Arc<dyn Backend> = Arc::new(processes.clone());
    let lifecycle = Arc::new(LifecycleTracker::new());
    lifecycle.add_sink(Arc::new(ActionSink(action_tx.clone())));
    let orchestrator = Arc::new(SpawnOrchestrator::new(
        Arc::clone(&backend),
        lifecycle,
        options.config.spawn.clone(),
    ));
    let (pump, pump_task) = BackendPump::spawn(backend);

    let services = Services {
        processes,
        orchestrator,
        pump,
        action_tx,
        workdir: options.workdir,
    };
    let mut state = AppState::new(options.config, (size.width, size.height));

    if options.orchestrator {
        let agent = state.config.orchestrator_agent();
        open_terminal(&mut state, &services, TerminalId::orchestrator("main"), agent);
    } else {
        process_action(&mut state, Action::NewShell, &services)?;
    }
    tracing::info!(workdir = %services.workdir.display(), "termdeck started");

    loop {
        if state.needs_full_redraw {
            terminal.clear()?;
            state.needs_full_redraw = false;
        }
        terminal.draw(|frame| tui::ui::draw(frame, &state, services.orchestrator.lifecycle()))?;

        let action = events.next().await?;
        process_action(&mut state, action, &services)?;

        // Drain output bursts so one frame covers many chunks.
        for _ in 0..MAX_PTY_BATCH {
            let Some(action) = events.try_recv_pty_action() else {
                break;
            };
            process_action(&mut state, action, &services)?;
        }

        if state.should_quit {
            break;
        }
    }

    tracing::info!(terminals = state.tabs.len(), "Shutting down");
    state.close_all();
    services.processes.kill_all();
    pump_task.abort();
    Ok(())
}
