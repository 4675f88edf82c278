use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of one logical terminal (and of the PTY process behind it).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TerminalId(String);

/// Spawns and lifecycle events are keyed by the terminal they start.
pub type SpawnKey = TerminalId;

impl TerminalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Top terminal of a fresh session, e.g. `session-3f2a9c1b-top`.
    pub fn new_session() -> Self {
        let id = Uuid::new_v4().to_string();
        Self(format!("session-{}-top", &id[..8]))
    }

    pub fn orchestrator(name: &str) -> Self {
        Self(format!("orchestrator-{}-top", name))
    }

    pub fn is_orchestrator(&self) -> bool {
        self.0.starts_with("orchestrator-")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TerminalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TerminalId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Terminal grid size in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TermSize {
    pub cols: u16,
    pub rows: u16,
}

impl TermSize {
    pub const fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }
}

impl fmt::Display for TermSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

/// Which backend entry point starts the process behind a terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TabRole {
    /// Top-level coordinator agent, started with `start_orchestrator`.
    Orchestrator,
    /// Per-session agent or shell, started with `start_session_agent`.
    Session,
}

impl TabRole {
    pub fn of(id: &TerminalId) -> Self {
        if id.is_orchestrator() {
            TabRole::Orchestrator
        } else {
            TabRole::Session
        }
    }
}
