//! Per-surface resize coordination.
//!
//! Size proposals arrive from several independent triggers. Each is measured,
//! clamped, compared against the instance's current grid and applied only on
//! a real change; the PTY hears about it through a debounced scheduler.

mod scheduler;

pub use scheduler::ResizeScheduler;

use crate::config::ResizeSettings;
use crate::models::{TermSize, TerminalId};
use crate::terminal::TerminalEmulator;
use std::fmt;
use std::time::Instant;

/// Size of one character cell in measurement units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellMetrics {
    pub width: f32,
    pub height: f32,
}

impl CellMetrics {
    /// Measurements are already in cells (character-grid hosts).
    pub const UNIT: CellMetrics = CellMetrics {
        width: 1.0,
        height: 1.0,
    };
}

/// Measured size of the surface's content area.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub width: f32,
    pub height: f32,
}

impl Measurement {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeReason {
    Observer,
    SplitDragEnd,
    ForceFit,
    Attach,
}

impl fmt::Display for ResizeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResizeReason::Observer => "observer",
            ResizeReason::SplitDragEnd => "split-drag-end",
            ResizeReason::ForceFit => "force-fit",
            ResizeReason::Attach => "attach",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeRequest {
    pub cols: u16,
    pub rows: u16,
    pub reason: ResizeReason,
    pub immediate: bool,
    pub force: bool,
}

impl ResizeRequest {
    pub fn size(&self) -> TermSize {
        TermSize::new(self.cols, self.rows)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeOutcome {
    /// Measurement below the usable threshold; nothing changed.
    Rejected,
    /// Target equals the current grid; nothing changed.
    Unchanged,
    /// Grid left alone, PTY notification re-sent on request.
    Forced {
        size: TermSize,
        notify: Option<TermSize>,
    },
    /// Grid resized; `notify` is set when the PTY must hear about it now.
    Applied {
        size: TermSize,
        notify: Option<TermSize>,
    },
}

impl ResizeOutcome {
    pub fn notify(&self) -> Option<TermSize> {
        match self {
            ResizeOutcome::Forced { notify, .. } | ResizeOutcome::Applied { notify, .. } => *notify,
            _ => None,
        }
    }

    pub fn applied_size(&self) -> Option<TermSize> {
        match self {
            ResizeOutcome::Applied { size, .. } => Some(*size),
            _ => None,
        }
    }
}

pub struct ResizeCoordinator {
    terminal: TerminalId,
    settings: ResizeSettings,
    cell: CellMetrics,
    last_measurement: Option<Measurement>,
    effective: Option<TermSize>,
    scheduler: ResizeScheduler,
}

impl ResizeCoordinator {
    pub fn new(terminal: TerminalId, settings: ResizeSettings, cell: CellMetrics) -> Self {
        let scheduler = ResizeScheduler::new(settings.debounce());
        Self {
            terminal,
            settings,
            cell,
            last_measurement: None,
            effective: None,
            scheduler,
        }
    }

    pub fn terminal(&self) -> &TerminalId {
        &self.terminal
    }

    /// Last size this coordinator applied to the grid.
    pub fn effective_size(&self) -> Option<TermSize> {
        self.effective
    }

    pub fn last_measurement(&self) -> Option<Measurement> {
        self.last_measurement
    }

    /// Propose the size that fits `measurement`.
    pub fn propose<E>(
        &mut self,
        emulator: &mut E,
        measurement: Measurement,
        reason: ResizeReason,
        force: bool,
        now: Instant,
    ) -> ResizeOutcome
    where
        E: TerminalEmulator + ?Sized,
    {
        if !self.is_usable(measurement) {
            tracing::debug!(
                terminal = %self.terminal,
                width = measurement.width,
                height = measurement.height,
                %reason,
                "Ignored resize below usable size"
            );
            return ResizeOutcome::Rejected;
        }
        self.last_measurement = Some(measurement);

        let request = self.request_for(measurement, reason, force);
        self.apply(emulator, request, now)
    }

    /// Turn a measurement into a clamped request.
    pub fn request_for(&self, measurement: Measurement, reason: ResizeReason, force: bool) -> ResizeRequest {
        let raw_cols = cells(measurement.width, self.cell.width);
        let raw_rows = cells(measurement.height, self.cell.height);
        // A genuine collapse (sidebar closed, pane squeezed) is not jitter.
        let immediate = reason == ResizeReason::ForceFit || raw_cols < self.settings.immediate_below_cols;

        ResizeRequest {
            cols: raw_cols.max(self.settings.min_cols),
            rows: raw_rows.max(self.settings.min_rows),
            reason,
            immediate,
            force,
        }
    }

    pub fn apply<E>(&mut self, emulator: &mut E, request: ResizeRequest, now: Instant) -> ResizeOutcome
    where
        E: TerminalEmulator + ?Sized,
    {
        let target = request.size();
        let current = emulator.size();

        // Resizing to the same grid still disturbs the scroll offset.
        if target == current && !request.force {
            return ResizeOutcome::Unchanged;
        }

        if target == current {
            emulator.refresh();
            self.scheduler.schedule(target, true, now);
            let notify = if request.immediate { self.scheduler.flush() } else { None };
            tracing::debug!(terminal = %self.terminal, %target, reason = %request.reason, "Forced resize notification");
            return ResizeOutcome::Forced { size: target, notify };
        }

        let buffer = emulator.buffer();
        let follow = !buffer.alternate_screen && buffer.is_following_output();

        emulator.resize(target);
        self.effective = Some(target);
        self.scheduler.schedule(target, false, now);
        let notify = if request.immediate { self.scheduler.flush() } else { None };

        if follow {
            emulator.scroll_to_bottom();
        }

        tracing::debug!(
            terminal = %self.terminal,
            from = %current,
            to = %target,
            reason = %request.reason,
            immediate = request.immediate,
            "Applied resize"
        );
        ResizeOutcome::Applied { size: target, notify }
    }

    /// Re-evaluate the last good measurement after the surface (re)attaches.
    pub fn on_attach<E>(&mut self, emulator: &mut E, now: Instant) -> ResizeOutcome
    where
        E: TerminalEmulator + ?Sized,
    {
        match self.last_measurement {
            Some(measurement) => self.propose(emulator, measurement, ResizeReason::Attach, false, now),
            None => ResizeOutcome::Unchanged,
        }
    }

    /// Fit immediately, e.g. after a visibility transition.
    pub fn force_fit<E>(&mut self, emulator: &mut E, measurement: Measurement, now: Instant) -> ResizeOutcome
    where
        E: TerminalEmulator + ?Sized,
    {
        self.propose(emulator, measurement, ResizeReason::ForceFit, false, now)
    }

    /// Refresh paint and scrollbar state without touching the grid or the PTY.
    pub fn force_refresh<E>(&mut self, emulator: &mut E)
    where
        E: TerminalEmulator + ?Sized,
    {
        emulator.refresh();
    }

    /// PTY notification whose quiet period has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<TermSize> {
        self.scheduler.poll(now)
    }

    /// Pending PTY notification, regardless of the quiet period.
    pub fn flush(&mut self) -> Option<TermSize> {
        self.scheduler.flush()
    }

    pub fn cancel(&mut self) {
        self.scheduler.cancel();
    }

    pub fn has_pending_notification(&self) -> bool {
        self.scheduler.is_pending()
    }

    fn is_usable(&self, measurement: Measurement) -> bool {
        measurement.width.is_finite()
            && measurement.height.is_finite()
            && measurement.width >= self.settings.min_width
            && measurement.height >= self.settings.min_height
    }
}

fn cells(length: f32, cell: f32) -> u16 {
    if cell <= 0.0 {
        return 0;
    }
    (length / cell).floor().clamp(0.0, u16::MAX as f32) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeTerminal;
    use std::time::Duration;

    fn settings() -> ResizeSettings {
        ResizeSettings {
            min_width: 20.0,
            min_height: 4.0,
            min_cols: 20,
            min_rows: 4,
            immediate_below_cols: 30,
            debounce_ms: 100,
        }
    }

    fn coordinator() -> ResizeCoordinator {
        ResizeCoordinator::new(TerminalId::new("t"), settings(), CellMetrics::UNIT)
    }

    fn measure(cols: f32, rows: f32) -> Measurement {
        Measurement::new(cols, rows)
    }

    #[test]
    fn test_same_size_is_a_true_no_op() {
        let mut coord = coordinator();
        let mut term = FakeTerminal::with_scrollback(TermSize::new(80, 24), 50);
        let log = term.log();
        let now = Instant::now();

        let outcome = coord.propose(&mut term, measure(80.0, 24.0), ResizeReason::Observer, false, now);
        assert_eq!(outcome, ResizeOutcome::Unchanged);
        assert!(log.borrow().resizes.is_empty());
        assert!(log.borrow().refreshes == 0);
        assert_eq!(coord.poll(now + Duration::from_secs(1)), None);
    }

    #[test]
    fn test_rejects_measurements_below_threshold_and_resumes() {
        let mut coord = coordinator();
        let mut term = FakeTerminal::new(TermSize::new(80, 24));
        let log = term.log();
        let now = Instant::now();

        assert_eq!(
            coord.propose(&mut term, measure(0.0, 0.0), ResizeReason::Observer, false, now),
            ResizeOutcome::Rejected
        );
        assert_eq!(coord.last_measurement(), None);

        coord.propose(&mut term, measure(100.0, 30.0), ResizeReason::Observer, false, now);
        assert_eq!(
            coord.propose(&mut term, measure(5.0, 2.0), ResizeReason::Observer, false, now),
            ResizeOutcome::Rejected
        );
        assert_eq!(coord.last_measurement(), Some(measure(100.0, 30.0)));
        assert_eq!(log.borrow().resizes, vec![TermSize::new(100, 30)]);
    }

    #[test]
    fn test_rejects_non_finite_measurements() {
        let mut coord = coordinator();
        let mut term = FakeTerminal::new(TermSize::new(80, 24));
        let outcome = coord.propose(&mut term, measure(f32::NAN, 30.0), ResizeReason::Observer, false, Instant::now());
        assert_eq!(outcome, ResizeOutcome::Rejected);
    }

    #[test]
    fn test_clamps_rows_to_minimum() {
        let mut coord = coordinator();
        let mut term = FakeTerminal::new(TermSize::new(80, 24));
        let request = coord.request_for(measure(100.0, 4.5), ResizeReason::Observer, false);
        assert_eq!(request.size(), TermSize::new(100, 4));

        let mut settings = settings();
        settings.min_rows = 8;
        coord = ResizeCoordinator::new(TerminalId::new("t"), settings, CellMetrics::UNIT);
        let outcome = coord.propose(&mut term, measure(100.0, 5.0), ResizeReason::Observer, false, Instant::now());
        assert_eq!(outcome.applied_size(), Some(TermSize::new(100, 8)));
    }

    #[test]
    fn test_pixel_measurement_uses_cell_metrics() {
        let coord = ResizeCoordinator::new(
            TerminalId::new("t"),
            settings(),
            CellMetrics { width: 8.0, height: 16.0 },
        );
        let request = coord.request_for(measure(807.0, 490.0), ResizeReason::Observer, false);
        assert_eq!(request.size(), TermSize::new(100, 30));
    }

    #[test]
    fn test_rapid_resizes_notify_backend_once_with_last_size() {
        let mut coord = coordinator();
        let mut term = FakeTerminal::new(TermSize::new(80, 24));
        let log = term.log();
        let t0 = Instant::now();

        for (i, cols) in [90.0, 95.0, 101.0].into_iter().enumerate() {
            let at = t0 + Duration::from_millis(30 * i as u64);
            let outcome = coord.propose(&mut term, measure(cols, 30.0), ResizeReason::Observer, false, at);
            assert_eq!(outcome.notify(), None);
        }

        // Grid follows every change at once.
        assert_eq!(log.borrow().resizes.len(), 3);
        assert_eq!(coord.effective_size(), Some(TermSize::new(101, 30)));

        assert_eq!(coord.poll(t0 + Duration::from_millis(120)), None);
        assert_eq!(
            coord.poll(t0 + Duration::from_millis(160)),
            Some(TermSize::new(101, 30))
        );
        assert_eq!(coord.poll(t0 + Duration::from_secs(1)), None);
    }

    #[test]
    fn test_collapse_below_threshold_notifies_immediately() {
        let mut coord = coordinator();
        let mut term = FakeTerminal::new(TermSize::new(80, 24));
        let outcome = coord.propose(&mut term, measure(25.0, 24.0), ResizeReason::Observer, false, Instant::now());
        assert_eq!(
            outcome,
            ResizeOutcome::Applied {
                size: TermSize::new(25, 24),
                notify: Some(TermSize::new(25, 24)),
            }
        );
        assert!(!coord.has_pending_notification());
    }

    #[test]
    fn test_follows_output_after_resize_when_at_bottom() {
        let mut coord = coordinator();
        let mut term = FakeTerminal::with_scrollback(TermSize::new(80, 24), 100);
        let log = term.log();
        coord.propose(&mut term, measure(100.0, 30.0), ResizeReason::Observer, false, Instant::now());
        assert_eq!(log.borrow().bottom_scrolls, 1);
    }

    #[test]
    fn test_keeps_scrollback_position_when_scrolled_up() {
        let mut coord = coordinator();
        let mut term = FakeTerminal::with_scrollback(TermSize::new(80, 24), 100);
        term.buffer.viewport_y = 60;
        let log = term.log();
        coord.propose(&mut term, measure(100.0, 30.0), ResizeReason::Observer, false, Instant::now());
        assert_eq!(log.borrow().bottom_scrolls, 0);
        assert_eq!(term.buffer.viewport_y, 60);
    }

    #[test]
    fn test_full_screen_mode_is_never_re_anchored() {
        let mut coord = coordinator();
        let mut term = FakeTerminal::new(TermSize::new(80, 24));
        term.buffer.alternate_screen = true;
        let log = term.log();
        coord.propose(&mut term, measure(100.0, 30.0), ResizeReason::Observer, false, Instant::now());
        assert_eq!(log.borrow().bottom_scrolls, 0);
    }

    #[test]
    fn test_force_with_same_size_refreshes_and_notifies_without_resizing() {
        let mut coord = coordinator();
        let mut term = FakeTerminal::new(TermSize::new(80, 24));
        let log = term.log();
        let t0 = Instant::now();

        let outcome = coord.propose(&mut term, measure(80.0, 24.0), ResizeReason::SplitDragEnd, true, t0);
        assert!(matches!(outcome, ResizeOutcome::Forced { notify: None, .. }));
        assert!(log.borrow().resizes.is_empty());
        assert_eq!(log.borrow().refreshes, 1);
        assert_eq!(coord.poll(t0 + Duration::from_millis(100)), Some(TermSize::new(80, 24)));
    }

    #[test]
    fn test_force_refresh_never_touches_grid_or_backend() {
        let mut coord = coordinator();
        let mut term = FakeTerminal::new(TermSize::new(80, 24));
        let log = term.log();
        coord.force_refresh(&mut term);
        assert_eq!(log.borrow().refreshes, 1);
        assert!(log.borrow().resizes.is_empty());
        assert!(!coord.has_pending_notification());
    }

    #[test]
    fn test_force_fit_applies_and_notifies_now() {
        let mut coord = coordinator();
        let mut term = FakeTerminal::new(TermSize::new(80, 24));
        let outcome = coord.force_fit(&mut term, measure(120.0, 40.0), Instant::now());
        assert_eq!(outcome.notify(), Some(TermSize::new(120, 40)));
    }

    #[test]
    fn test_attach_re_evaluates_stale_instance() {
        let mut coord = coordinator();
        let mut term = FakeTerminal::new(TermSize::new(80, 24));
        let now = Instant::now();
        coord.propose(&mut term, measure(100.0, 30.0), ResizeReason::Observer, false, now);

        // Resized behind our back while detached.
        term.size = TermSize::new(60, 20);
        let outcome = coord.on_attach(&mut term, now);
        assert_eq!(outcome.applied_size(), Some(TermSize::new(100, 30)));

        // Second attach with nothing changed is a no-op.
        assert_eq!(coord.on_attach(&mut term, now), ResizeOutcome::Unchanged);
    }

    #[test]
    fn test_attach_without_measurement_does_nothing() {
        let mut coord = coordinator();
        let mut term = FakeTerminal::new(TermSize::new(80, 24));
        assert_eq!(coord.on_attach(&mut term, Instant::now()), ResizeOutcome::Unchanged);
    }

    #[test]
    fn test_cancel_drops_pending_notification() {
        let mut coord = coordinator();
        let mut term = FakeTerminal::new(TermSize::new(80, 24));
        let now = Instant::now();
        coord.propose(&mut term, measure(100.0, 30.0), ResizeReason::Observer, false, now);
        coord.cancel();
        assert_eq!(coord.flush(), None);
    }
}
