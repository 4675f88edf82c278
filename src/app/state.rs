use crate::config::Config;
use crate::models::{AgentKind, TermSize, TerminalId};
use crate::registry::InstanceRegistry;
use crate::resize::{CellMetrics, Measurement, ResizeCoordinator, ResizeOutcome, ResizeReason};
use crate::spawn::SpawnError;
use crate::terminal::{Surface, TerminalEmulator, Vt100Terminal};
use crate::tui::layout::{self, ScreenLayout, MAX_SPLIT_RATIO, MIN_SPLIT_RATIO};
use ratatui::layout::Rect;
use std::collections::HashMap;
use std::time::Instant;

pub const MAX_PANES: usize = 2;
const SPLIT_STEP: f32 = 0.05;

/// One open terminal. The tab holds a registry reference for as long as it
/// is open, so hidden terminals keep their scrollback.
#[derive(Debug, Clone)]
pub struct Tab {
    pub id: TerminalId,
    pub kind: AgentKind,
    pub exited: Option<i32>,
}

impl Tab {
    pub fn title(&self) -> String {
        if self.id.is_orchestrator() {
            format!("{} (orchestrator)", self.kind.display_name())
        } else {
            self.kind.display_name()
        }
    }
}

/// A visible pane and the terminal mounted in it.
#[derive(Debug, Default)]
pub struct Pane {
    pub terminal: Option<TerminalId>,
}

/// What a resize did to one mounted terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneResize {
    pub terminal: TerminalId,
    pub applied: Option<TermSize>,
    pub notify: Option<TermSize>,
}

impl PaneResize {
    fn from_outcome(terminal: &TerminalId, outcome: ResizeOutcome) -> Self {
        Self {
            terminal: terminal.clone(),
            applied: outcome.applied_size(),
            notify: outcome.notify(),
        }
    }
}

pub struct AppState {
    pub config: Config,
    pub tabs: Vec<Tab>,
    pub panes: Vec<Pane>,
    pub focused_pane: usize,
    pub split_ratio: f32,
    pub window: (u16, u16),
    pub registry: InstanceRegistry<Vt100Terminal>,
    /// One per open tab, so a pending PTY notification outlives unmounting.
    coordinators: HashMap<TerminalId, ResizeCoordinator>,
    pub last_error: Option<SpawnError>,
    pub needs_full_redraw: bool,
    pub should_quit: bool,
    next_agent: usize,
}

impl AppState {
    pub fn new(config: Config, window: (u16, u16)) -> Self {
        Self {
            config,
            tabs: Vec::new(),
            panes: vec![Pane::default()],
            focused_pane: 0,
            split_ratio: 0.5,
            window,
            registry: InstanceRegistry::new(),
            coordinators: HashMap::new(),
            last_error: None,
            needs_full_redraw: false,
            should_quit: false,
            next_agent: 0,
        }
    }

    pub fn is_split(&self) -> bool {
        self.panes.len() > 1
    }

    pub fn layout(&self) -> ScreenLayout {
        let (w, h) = self.window;
        layout::compute(Rect::new(0, 0, w, h), self.is_split(), self.split_ratio)
    }

    /// Content size of pane `idx` in cells.
    pub fn pane_measurement(&self, idx: usize) -> Option<Measurement> {
        let area = *self.layout().panes.get(idx)?;
        let inner = layout::inner(area);
        Some(Measurement::new(inner.width as f32, inner.height as f32))
    }

    fn pane_size_hint(&self, idx: usize) -> TermSize {
        let resize = &self.config.resize;
        match self.pane_measurement(idx) {
            Some(m) => TermSize::new(
                (m.width as u16).max(resize.min_cols),
                (m.height as u16).max(resize.min_rows),
            ),
            None => TermSize::new(self.config.spawn.bootstrap_cols, self.config.spawn.bootstrap_rows),
        }
    }

    pub fn tab_index(&self, id: &TerminalId) -> Option<usize> {
        self.tabs.iter().position(|tab| &tab.id == id)
    }

    pub fn tab(&self, id: &TerminalId) -> Option<&Tab> {
        self.tabs.iter().find(|tab| &tab.id == id)
    }

    pub fn tab_mut(&mut self, id: &TerminalId) -> Option<&mut Tab> {
        self.tabs.iter_mut().find(|tab| &tab.id == id)
    }

    pub fn pane_showing(&self, id: &TerminalId) -> Option<usize> {
        self.panes
            .iter()
            .position(|pane| pane.terminal.as_ref() == Some(id))
    }

    pub fn focused_terminal(&self) -> Option<&TerminalId> {
        self.panes.get(self.focused_pane)?.terminal.as_ref()
    }

    pub fn focused_tab(&self) -> Option<&Tab> {
        self.tab(self.focused_terminal()?)
    }

    /// Next agent in rotation for "new agent".
    pub fn next_agent_kind(&mut self) -> AgentKind {
        let kind = AgentKind::AGENTS[self.next_agent % AgentKind::AGENTS.len()].clone();
        self.next_agent += 1;
        kind
    }

    /// Open a tab, creating its emulator.
    pub fn add_tab(&mut self, id: TerminalId, kind: AgentKind) {
        if self.tab_index(&id).is_some() {
            return;
        }
        let size = self.pane_size_hint(self.focused_pane);
        let scrollback = self.config.terminal.scrollback_lines;
        self.registry
            .acquire(&id, || Vt100Terminal::new(size, scrollback));
        self.coordinators.insert(
            id.clone(),
            ResizeCoordinator::new(id.clone(), self.config.resize.clone(), CellMetrics::UNIT),
        );
        self.tabs.push(Tab {
            id,
            kind,
            exited: None,
        });
    }

    /// Close a tab, unmounting it first. Returns true when its emulator was
    /// disposed.
    pub fn remove_tab(&mut self, id: &TerminalId) -> bool {
        let Some(idx) = self.tab_index(id) else {
            return false;
        };
        while let Some(pane) = self.pane_showing(id) {
            self.unmount(pane);
        }
        self.tabs.remove(idx);
        if let Some(mut coordinator) = self.coordinators.remove(id) {
            coordinator.cancel();
        }
        self.registry.release(id)
    }

    /// Show `id` in pane `pane`.
    ///
    /// A terminal already visible in another pane is focused there instead,
    /// so one terminal never has two surfaces feeding it input.
    pub fn mount(&mut self, pane: usize, id: &TerminalId, now: Instant) -> Option<PaneResize> {
        if let Some(showing) = self.pane_showing(id) {
            self.focused_pane = showing;
            return None;
        }
        if pane >= self.panes.len() || !self.registry.has(id) {
            return None;
        }
        self.unmount(pane);

        let size = self.pane_size_hint(pane);
        let scrollback = self.config.terminal.scrollback_lines;
        self.registry
            .acquire(id, || Vt100Terminal::new(size, scrollback));
        self.registry.attach(id, Surface { pane });

        let measurement = self.pane_measurement(pane);
        let settings = &self.config.resize;
        let coordinator = self
            .coordinators
            .entry(id.clone())
            .or_insert_with(|| ResizeCoordinator::new(id.clone(), settings.clone(), CellMetrics::UNIT));
        let mut outcome = ResizeOutcome::Unchanged;
        if let Some(term) = self.registry.get_mut(id) {
            outcome = match measurement {
                // Same pane geometry as last time: only re-check the grid.
                Some(m) if coordinator.last_measurement() == Some(m) => coordinator.on_attach(term, now),
                Some(m) => coordinator.force_fit(term, m, now),
                None => coordinator.on_attach(term, now),
            };
            coordinator.force_refresh(term);
            term.focus();
        }

        self.panes[pane] = Pane {
            terminal: Some(id.clone()),
        };
        self.focused_pane = pane;
        self.needs_full_redraw = true;
        Some(PaneResize::from_outcome(id, outcome))
    }

    /// Empty pane `pane`, dropping its reference to the terminal. A pending
    /// PTY notification stays scheduled and is still sent by `poll_resizes`.
    pub fn unmount(&mut self, pane: usize) {
        let Some(slot) = self.panes.get_mut(pane) else {
            return;
        };
        let Some(id) = slot.terminal.take() else {
            return;
        };
        self.registry.detach(&id);
        self.registry.release(&id);
    }

    /// Re-fit every mounted terminal to its pane.
    pub fn fit_panes(&mut self, reason: ResizeReason, now: Instant) -> Vec<PaneResize> {
        let measurements: Vec<_> = (0..self.panes.len()).map(|idx| self.pane_measurement(idx)).collect();
        let mut results = Vec::new();
        for (pane, measurement) in self.panes.iter().zip(measurements) {
            let (Some(id), Some(measurement)) = (pane.terminal.as_ref(), measurement) else {
                continue;
            };
            let Some(coordinator) = self.coordinators.get_mut(id) else {
                continue;
            };
            let Some(term) = self.registry.get_mut(id) else {
                continue;
            };
            let outcome = match reason {
                ResizeReason::ForceFit => coordinator.force_fit(term, measurement, now),
                _ => coordinator.propose(term, measurement, reason, false, now),
            };
            results.push(PaneResize::from_outcome(id, outcome));
        }
        results
    }

    /// PTY notifications whose quiet period has elapsed, hidden tabs included.
    pub fn poll_resizes(&mut self, now: Instant) -> Vec<(TerminalId, TermSize)> {
        self.coordinators
            .iter_mut()
            .filter_map(|(id, coordinator)| Some((id.clone(), coordinator.poll(now)?)))
            .collect()
    }

    /// Repaint every visible terminal without resizing it.
    fn refresh_panes(&mut self) {
        for pane in &self.panes {
            let Some(id) = pane.terminal.as_ref() else {
                continue;
            };
            if let (Some(coordinator), Some(term)) = (self.coordinators.get_mut(id), self.registry.get_mut(id)) {
                coordinator.force_refresh(term);
            }
        }
    }

    pub fn select_tab(&mut self, idx: usize, now: Instant) -> Option<PaneResize> {
        let id = self.tabs.get(idx)?.id.clone();
        self.mount(self.focused_pane, &id, now)
    }

    /// Step through tabs from the focused one, skipping tabs shown elsewhere.
    pub fn cycle_tab(&mut self, forward: bool, now: Instant) -> Option<PaneResize> {
        let count = self.tabs.len();
        if count == 0 {
            return None;
        }
        let current = self
            .focused_terminal()
            .and_then(|id| self.tab_index(id))
            .unwrap_or(0);
        for step in 1..=count {
            let idx = if forward {
                (current + step) % count
            } else {
                (current + count - step % count) % count
            };
            let id = &self.tabs[idx].id;
            if self.pane_showing(id).is_none() {
                return self.select_tab(idx, now);
            }
        }
        None
    }

    /// Split into two panes or merge back into one.
    pub fn toggle_split(&mut self, now: Instant) -> Vec<PaneResize> {
        let mut results = Vec::new();
        if self.is_split() {
            let keep = self.focused_pane;
            let drop = 1 - keep;
            self.unmount(drop);
            self.panes.remove(drop);
            self.focused_pane = 0;
        } else {
            self.panes.push(Pane::default());
            let hidden = self
                .tabs
                .iter()
                .find(|tab| self.pane_showing(&tab.id).is_none())
                .map(|tab| tab.id.clone());
            if let Some(id) = hidden {
                let focus = self.focused_pane;
                results.extend(self.mount(1, &id, now));
                self.focused_pane = focus;
            }
        }
        self.needs_full_redraw = true;
        results.extend(self.fit_panes(ResizeReason::ForceFit, now));
        self.refresh_panes();
        results
    }

    pub fn focus_other_pane(&mut self) {
        if self.is_split() {
            self.focused_pane = 1 - self.focused_pane;
            if let Some(id) = self.focused_terminal().cloned() {
                if let Some(term) = self.registry.get_mut(&id) {
                    term.focus();
                }
            }
        }
    }

    /// Move the split divider; applied as a finished drag.
    pub fn adjust_split(&mut self, grow_left: bool, now: Instant) -> Vec<PaneResize> {
        if !self.is_split() {
            return Vec::new();
        }
        let delta = if grow_left { SPLIT_STEP } else { -SPLIT_STEP };
        self.split_ratio = (self.split_ratio + delta).clamp(MIN_SPLIT_RATIO, MAX_SPLIT_RATIO);
        self.fit_panes(ResizeReason::SplitDragEnd, now)
    }

    pub fn scroll_focused(&mut self, delta: isize) {
        if let Some(id) = self.focused_terminal().cloned() {
            if let Some(term) = self.registry.get_mut(&id) {
                term.scroll_lines(delta);
            }
        }
    }

    /// Pane index under screen cell (x, y), with the cell relative to the
    /// pane's content area.
    pub fn pane_at(&self, x: u16, y: u16) -> Option<(usize, u16, u16)> {
        self.layout()
            .panes
            .iter()
            .enumerate()
            .find_map(|(idx, area)| {
                let inner = layout::inner(*area);
                layout::contains(inner, x, y).then(|| (idx, x - inner.x, y - inner.y))
            })
    }

    /// Dispose every emulator on shutdown.
    pub fn close_all(&mut self) {
        for pane in 0..self.panes.len() {
            self.unmount(pane);
        }
        self.tabs.clear();
        self.coordinators.clear();
        self.registry.reset();
    }
}
