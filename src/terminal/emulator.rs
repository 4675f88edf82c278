use super::{BufferState, InputModes, Surface, TerminalEmulator};
use crate::models::TermSize;
use anyhow::Result;

/// `TerminalEmulator` backed by a `vt100::Parser`.
///
/// vt100 tracks scrollback as an offset from the bottom; this adapter exposes
/// it as xterm-style absolute lines so scroll snapshots survive resizes.
pub struct Vt100Terminal {
    parser: vt100::Parser,
    base_y: usize,
    surface: Option<Surface>,
    focused: bool,
    repaint_requested: bool,
    disposed: bool,
}

impl Vt100Terminal {
    pub fn new(size: TermSize, scrollback_lines: usize) -> Self {
        Self {
            parser: vt100::Parser::new(size.rows, size.cols, scrollback_lines),
            base_y: 0,
            surface: None,
            focused: false,
            repaint_requested: false,
            disposed: false,
        }
    }

    pub fn screen(&self) -> &vt100::Screen {
        self.parser.screen()
    }

    pub fn surface(&self) -> Option<Surface> {
        self.surface
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Returns and clears a pending repaint request.
    pub fn take_repaint_request(&mut self) -> bool {
        std::mem::take(&mut self.repaint_requested)
    }

    // vt100 only exposes the scrollback length by clamping an oversized offset.
    fn measure_scrollback(&mut self) {
        let offset = self.parser.screen().scrollback();
        self.parser.set_scrollback(usize::MAX);
        self.base_y = self.parser.screen().scrollback();
        self.parser.set_scrollback(offset);
    }
}

impl TerminalEmulator for Vt100Terminal {
    fn size(&self) -> TermSize {
        let (rows, cols) = self.parser.screen().size();
        TermSize::new(cols, rows)
    }

    fn resize(&mut self, size: TermSize) {
        self.parser.set_size(size.rows, size.cols);
        self.measure_scrollback();
    }

    fn write(&mut self, data: &[u8]) {
        if self.disposed {
            return;
        }
        self.parser.process(data);
        self.measure_scrollback();
    }

    fn focus(&mut self) {
        self.focused = true;
    }

    fn scroll_to_line(&mut self, line: usize) {
        let offset = self.base_y.saturating_sub(line);
        self.parser.set_scrollback(offset);
    }

    fn scroll_to_bottom(&mut self) {
        self.parser.set_scrollback(0);
    }

    fn buffer(&self) -> BufferState {
        let screen = self.parser.screen();
        BufferState {
            viewport_y: self.base_y.saturating_sub(screen.scrollback()),
            base_y: self.base_y,
            alternate_screen: screen.alternate_screen(),
        }
    }

    fn input_modes(&self) -> InputModes {
        let screen = self.parser.screen();
        InputModes {
            mouse_tracking: screen.mouse_protocol_mode() != vt100::MouseProtocolMode::None,
            sgr_mouse: screen.mouse_protocol_encoding() == vt100::MouseProtocolEncoding::Sgr,
            bracketed_paste: screen.bracketed_paste(),
        }
    }

    fn cursor_position(&self) -> (u16, u16) {
        self.parser.screen().cursor_position()
    }

    fn refresh(&mut self) {
        self.repaint_requested = true;
    }

    fn attach(&mut self, surface: &Surface) {
        self.surface = Some(*surface);
        self.repaint_requested = true;
    }

    fn detach(&mut self) {
        self.surface = None;
        self.focused = false;
    }

    fn dispose(&mut self) -> Result<()> {
        if self.disposed {
            return Ok(());
        }
        self.detach();
        // Drop the scrollback eagerly; the record may outlive this call briefly.
        let (rows, cols) = self.parser.screen().size();
        self.parser = vt100::Parser::new(rows, cols, 0);
        self.base_y = 0;
        self.disposed = true;
        Ok(())
    }
}
