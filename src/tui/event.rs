use crate::app::Action;
use crate::input::key_to_bytes;
use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MouseEventKind};
use std::time::Duration;
use tokio::sync::mpsc;

const PTY_QUEUE_SIZE: usize = 256;

/// Internal event type for terminal events
enum TerminalEvent {
    Key(KeyEvent),
    Paste(String),
    Wheel { up: bool, column: u16, row: u16 },
    Resize(u16, u16),
    Tick,
}

/// Merges keyboard, PTY output and internal actions into one stream.
pub struct EventHandler {
    action_tx: mpsc::UnboundedSender<Action>,
    action_rx: mpsc::UnboundedReceiver<Action>,
    pty_tx: mpsc::Sender<Action>,
    pty_rx: mpsc::Receiver<Action>,
    terminal_rx: mpsc::UnboundedReceiver<TerminalEvent>,
}

impl EventHandler {
    pub fn new() -> Self {
        let (action_tx, action_rx) = mpsc::unbounded_channel();
        let (pty_tx, pty_rx) = mpsc::channel(PTY_QUEUE_SIZE);
        let (terminal_tx, terminal_rx) = mpsc::unbounded_channel();

        // crossterm reads block, so they get their own thread.
        std::thread::spawn(move || {
            let poll_timeout = Duration::from_millis(50);
            loop {
                let event = if event::poll(poll_timeout).unwrap_or(false) {
                    match event::read() {
                        Ok(Event::Key(key)) if key.kind != KeyEventKind::Release => TerminalEvent::Key(key),
                        Ok(Event::Mouse(mouse)) => match mouse.kind {
                            MouseEventKind::ScrollUp => TerminalEvent::Wheel {
                                up: true,
                                column: mouse.column,
                                row: mouse.row,
                            },
                            MouseEventKind::ScrollDown => TerminalEvent::Wheel {
                                up: false,
                                column: mouse.column,
                                row: mouse.row,
                            },
                            _ => TerminalEvent::Tick,
                        },
                        Ok(Event::Resize(w, h)) => TerminalEvent::Resize(w, h),
                        Ok(Event::Paste(data)) => TerminalEvent::Paste(data),
                        _ => TerminalEvent::Tick,
                    }
                } else {
                    TerminalEvent::Tick
                };

                if terminal_tx.send(event).is_err() {
                    break;
                }
            }
        });

        Self {
            action_tx,
            action_rx,
            pty_tx,
            pty_rx,
            terminal_rx,
        }
    }

    pub fn action_sender(&self) -> mpsc::UnboundedSender<Action> {
        self.action_tx.clone()
    }

    pub fn pty_sender(&self) -> mpsc::Sender<Action> {
        self.pty_tx.clone()
    }

    /// Next PTY action without waiting, for draining output bursts.
    pub fn try_recv_pty_action(&mut self) -> Option<Action> {
        self.pty_rx.try_recv().ok()
    }

    pub async fn next(&mut self) -> Result<Action> {
        // Keyboard input is never queued behind PTY output.
        if let Ok(event) = self.terminal_rx.try_recv() {
            return Ok(translate(event));
        }
        if let Ok(action) = self.pty_rx.try_recv() {
            return Ok(action);
        }
        if let Ok(action) = self.action_rx.try_recv() {
            return Ok(action);
        }

        tokio::select! {
            biased;

            Some(event) = self.terminal_rx.recv() => Ok(translate(event)),
            Some(action) = self.pty_rx.recv() => Ok(action),
            Some(action) = self.action_rx.recv() => Ok(action),
            else => Ok(Action::Tick),
        }
    }
}

impl Default for EventHandler {
    fn default() -> Self {
        Self::new()
    }
}

fn translate(event: TerminalEvent) -> Action {
    match event {
        TerminalEvent::Key(key) => key_action(key),
        TerminalEvent::Paste(data) => Action::Paste(data),
        TerminalEvent::Wheel { up, column, row } => Action::MouseWheel { up, column, row },
        TerminalEvent::Resize(w, h) => Action::Resize(w, h),
        TerminalEvent::Tick => Action::Tick,
    }
}

/// Alt chords drive the host; everything else goes to the focused terminal.
pub fn key_action(key: KeyEvent) -> Action {
    if key.modifiers.contains(KeyModifiers::ALT) {
        if let Some(action) = shortcut(&key) {
            return action;
        }
    }
    match key_to_bytes(&key) {
        Some(bytes) => Action::SendInput(bytes),
        None => Action::Tick,
    }
}

fn shortcut(key: &KeyEvent) -> Option<Action> {
    let action = match key.code {
        KeyCode::Char('n') => Action::NewShell,
        KeyCode::Char('a') => Action::NewAgent,
        KeyCode::Char(c @ '1'..='9') => Action::SelectTab(c as usize - '1' as usize),
        KeyCode::Char('[') => Action::PrevTab,
        KeyCode::Char(']') => Action::NextTab,
        KeyCode::Char('s') => Action::ToggleSplit,
        KeyCode::Char('o') => Action::FocusOtherPane,
        KeyCode::Char('<') | KeyCode::Char(',') => Action::ShrinkLeftPane,
        KeyCode::Char('>') | KeyCode::Char('.') => Action::GrowLeftPane,
        KeyCode::Char('r') => Action::RestartTab,
        KeyCode::Char('w') => Action::CloseTab,
        KeyCode::Char('q') => Action::Quit,
        KeyCode::PageUp => Action::ScrollUp,
        KeyCode::PageDown => Action::ScrollDown,
        _ => return None,
    };
    Some(action)
}
