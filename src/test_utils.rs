//! Shared fakes for unit tests.

use crate::models::{TermSize, TerminalId};
use crate::pty::{Backend, BackendError, BackendResult};
use crate::terminal::{BufferState, InputModes, Surface, TerminalEmulator};
use futures::future::{BoxFuture, FutureExt};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Everything a `FakeTerminal` was asked to do.
#[derive(Debug, Default)]
pub struct FakeLog {
    pub resizes: Vec<TermSize>,
    pub scrolled_to: Vec<usize>,
    pub bottom_scrolls: usize,
    pub refreshes: usize,
    pub attaches: Vec<Surface>,
    pub detaches: usize,
    pub disposals: usize,
    pub writes: Vec<Vec<u8>>,
}

pub struct FakeTerminal {
    pub size: TermSize,
    pub buffer: BufferState,
    pub modes: InputModes,
    pub fail_dispose: bool,
    pub log: Rc<RefCell<FakeLog>>,
}

impl FakeTerminal {
    pub fn new(size: TermSize) -> Self {
        Self {
            size,
            buffer: BufferState::default(),
            modes: InputModes::default(),
            fail_dispose: false,
            log: Rc::new(RefCell::new(FakeLog::default())),
        }
    }

    /// Fake with `scrollback` lines above the live screen, viewport at the bottom.
    pub fn with_scrollback(size: TermSize, scrollback: usize) -> Self {
        let mut term = Self::new(size);
        term.buffer.base_y = scrollback;
        term.buffer.viewport_y = scrollback;
        term
    }

    pub fn log(&self) -> Rc<RefCell<FakeLog>> {
        self.log.clone()
    }
}

impl TerminalEmulator for FakeTerminal {
    fn size(&self) -> TermSize {
        self.size
    }

    fn resize(&mut self, size: TermSize) {
        self.size = size;
        self.log.borrow_mut().resizes.push(size);
    }

    fn write(&mut self, data: &[u8]) {
        let following = self.buffer.is_following_output();
        let newlines = data.iter().filter(|b| **b == b'\n').count();
        self.buffer.base_y += newlines;
        if following {
            self.buffer.viewport_y = self.buffer.base_y;
        }
        self.log.borrow_mut().writes.push(data.to_vec());
    }

    fn focus(&mut self) {}

    fn scroll_to_line(&mut self, line: usize) {
        self.buffer.viewport_y = line.min(self.buffer.base_y);
        self.log.borrow_mut().scrolled_to.push(line);
    }

    fn scroll_to_bottom(&mut self) {
        self.buffer.viewport_y = self.buffer.base_y;
        self.log.borrow_mut().bottom_scrolls += 1;
    }

    fn buffer(&self) -> BufferState {
        self.buffer
    }

    fn input_modes(&self) -> InputModes {
        self.modes
    }

    fn cursor_position(&self) -> (u16, u16) {
        (0, 0)
    }

    fn refresh(&mut self) {
        self.log.borrow_mut().refreshes += 1;
    }

    fn attach(&mut self, surface: &Surface) {
        self.log.borrow_mut().attaches.push(*surface);
    }

    fn detach(&mut self) {
        self.log.borrow_mut().detaches += 1;
    }

    fn dispose(&mut self) -> anyhow::Result<()> {
        self.log.borrow_mut().disposals += 1;
        if self.fail_dispose {
            anyhow::bail!("renderer already gone");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    StartSession(TerminalId, TermSize),
    StartOrchestrator(TerminalId, TermSize),
    Write(TerminalId, Vec<u8>),
    Resize(TerminalId, TermSize),
}

#[derive(Default)]
struct FakeBackendState {
    calls: Vec<BackendCall>,
    start_delay: Duration,
    start_error: Option<BackendError>,
    write_error: Option<BackendError>,
    resize_error: Option<BackendError>,
}

/// Backend that records every call at invocation and resolves after a
/// configurable delay.
#[derive(Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<FakeBackendState>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_start_delay(delay: Duration) -> Self {
        let backend = Self::new();
        backend.set_start_delay(delay);
        backend
    }

    pub fn set_start_delay(&self, delay: Duration) {
        self.state.lock().unwrap().start_delay = delay;
    }

    pub fn fail_starts(&self, error: Option<BackendError>) {
        self.state.lock().unwrap().start_error = error;
    }

    pub fn fail_writes(&self, error: Option<BackendError>) {
        self.state.lock().unwrap().write_error = error;
    }

    pub fn fail_resizes(&self, error: Option<BackendError>) {
        self.state.lock().unwrap().resize_error = error;
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn start_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, BackendCall::StartSession(..) | BackendCall::StartOrchestrator(..)))
            .count()
    }

    fn start(&self, call: BackendCall) -> BoxFuture<'static, BackendResult> {
        let (delay, error) = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(call);
            (state.start_delay, state.start_error.clone())
        };
        async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match error {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
        .boxed()
    }
}

impl Backend for FakeBackend {
    fn start_session_agent(&self, session_id: &TerminalId, size: TermSize) -> BoxFuture<'static, BackendResult> {
        self.start(BackendCall::StartSession(session_id.clone(), size))
    }

    fn start_orchestrator(&self, terminal_id: &TerminalId, size: TermSize) -> BoxFuture<'static, BackendResult> {
        self.start(BackendCall::StartOrchestrator(terminal_id.clone(), size))
    }

    fn write(&self, terminal_id: &TerminalId, data: Vec<u8>) -> BoxFuture<'static, BackendResult> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(BackendCall::Write(terminal_id.clone(), data));
        let result = state.write_error.clone().map_or(Ok(()), Err);
        futures::future::ready(result).boxed()
    }

    fn resize(&self, terminal_id: &TerminalId, size: TermSize) -> BoxFuture<'static, BackendResult> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(BackendCall::Resize(terminal_id.clone(), size));
        let result = state.resize_error.clone().map_or(Ok(()), Err);
        futures::future::ready(result).boxed()
    }
}
