mod emulator;
pub mod queries;

pub use emulator::Vt100Terminal;

use crate::models::TermSize;

/// A visual mount point a terminal can be attached to (one per visible pane).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Surface {
    pub pane: usize,
}

/// Scroll geometry of the emulator buffer, xterm style: line `base_y` is the
/// top of the live screen, `viewport_y` the first visible line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferState {
    pub viewport_y: usize,
    pub base_y: usize,
    pub alternate_screen: bool,
}

impl BufferState {
    pub fn is_following_output(&self) -> bool {
        self.viewport_y >= self.base_y
    }

    pub fn distance_from_bottom(&self) -> usize {
        self.base_y.saturating_sub(self.viewport_y)
    }
}

/// Input protocols the hosted program has switched on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputModes {
    pub mouse_tracking: bool,
    pub sgr_mouse: bool,
    pub bracketed_paste: bool,
}

/// The terminal-emulation library as seen by the registry and resize logic.
pub trait TerminalEmulator {
    fn size(&self) -> TermSize;
    fn resize(&mut self, size: TermSize);
    fn write(&mut self, data: &[u8]);
    fn focus(&mut self);
    fn scroll_to_line(&mut self, line: usize);
    fn scroll_to_bottom(&mut self);
    fn buffer(&self) -> BufferState;
    fn input_modes(&self) -> InputModes;
    /// Zero-based (row, col) of the cursor on the live screen.
    fn cursor_position(&self) -> (u16, u16);
    /// Repaint without touching the grid size.
    fn refresh(&mut self);
    fn attach(&mut self, surface: &Surface);
    fn detach(&mut self);
    fn dispose(&mut self) -> anyhow::Result<()>;

    /// Scroll by `delta` lines (negative = towards older output).
    fn scroll_lines(&mut self, delta: isize) {
        let buffer = self.buffer();
        let target = if delta < 0 {
            buffer.viewport_y.saturating_sub(delta.unsigned_abs())
        } else {
            (buffer.viewport_y + delta as usize).min(buffer.base_y)
        };
        self.scroll_to_line(target);
    }
}
