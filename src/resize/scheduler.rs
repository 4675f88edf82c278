use crate::models::TermSize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct Pending {
    size: TermSize,
    deadline: Instant,
    force: bool,
}

/// Debounces PTY resize notifications for one terminal.
///
/// Only the last scheduled size survives a quiet period. A size equal to the
/// last one handed out is not handed out again unless it was forced.
#[derive(Debug)]
pub struct ResizeScheduler {
    quiet: Duration,
    pending: Option<Pending>,
    last_sent: Option<TermSize>,
}

impl ResizeScheduler {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            pending: None,
            last_sent: None,
        }
    }

    /// Replace any pending notification and restart the quiet period.
    pub fn schedule(&mut self, size: TermSize, force: bool, now: Instant) {
        let force = force || self.pending.map(|p| p.force && p.size == size).unwrap_or(false);
        self.pending = Some(Pending {
            size,
            deadline: now + self.quiet,
            force,
        });
    }

    /// Hand out the pending size once its quiet period has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<TermSize> {
        match self.pending {
            Some(pending) if pending.deadline <= now => self.flush(),
            _ => None,
        }
    }

    /// Hand out the pending size immediately.
    pub fn flush(&mut self) -> Option<TermSize> {
        let pending = self.pending.take()?;
        if !pending.force && self.last_sent == Some(pending.size) {
            return None;
        }
        self.last_sent = Some(pending.size);
        Some(pending.size)
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.map(|p| p.deadline)
    }

    pub fn last_sent(&self) -> Option<TermSize> {
        self.last_sent
    }
}
