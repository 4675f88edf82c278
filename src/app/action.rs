use crate::models::TerminalId;
use crate::spawn::{LifecycleEvent, SpawnOutcome};

#[derive(Debug, Clone)]
pub enum Action {
    Quit,
    Tick,
    Resize(u16, u16),

    // Tabs and panes
    NewShell,
    NewAgent,
    SelectTab(usize),
    NextTab,
    PrevTab,
    ToggleSplit,
    FocusOtherPane,
    GrowLeftPane,
    ShrinkLeftPane,
    RestartTab,
    CloseTab,

    // Scrollback
    ScrollUp,
    ScrollDown,
    MouseWheel { up: bool, column: u16, row: u16 },

    // Input for the focused terminal
    SendInput(Vec<u8>),
    Paste(String),

    // Backend
    PtyOutput(TerminalId, u64, Vec<u8>),
    SessionExited(TerminalId, u64, i32), // (terminal, process generation, exit code)
    SpawnFinished(TerminalId, SpawnOutcome),
    StopFinished { terminal: TerminalId, restart: bool },
    Lifecycle(LifecycleEvent),
}
