mod manager;
mod pump;

pub use manager::{LaunchSpec, PtyBackend, PtyHandle};
pub use pump::BackendPump;

use crate::models::{TermSize, TerminalId};
use futures::future::BoxFuture;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("no launch command registered for terminal {0}")]
    NotRegistered(TerminalId),
    #[error("terminal {0} is not running")]
    NotRunning(TerminalId),
    #[error("pty error: {0}")]
    Pty(String),
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::Io(err.to_string())
    }
}

pub type BackendResult = Result<(), BackendError>;

/// Transport between terminals and the processes behind them.
///
/// Every call returns a `'static` future so callers can spawn it, time it out
/// or share it without holding a borrow of the backend.
pub trait Backend: Send + Sync {
    /// Resolves once the session's agent process is confirmed started.
    fn start_session_agent(&self, session_id: &TerminalId, size: TermSize) -> BoxFuture<'static, BackendResult>;

    /// Resolves once the top-level orchestrator process is confirmed started.
    fn start_orchestrator(&self, terminal_id: &TerminalId, size: TermSize) -> BoxFuture<'static, BackendResult>;

    fn write(&self, terminal_id: &TerminalId, data: Vec<u8>) -> BoxFuture<'static, BackendResult>;

    fn resize(&self, terminal_id: &TerminalId, size: TermSize) -> BoxFuture<'static, BackendResult>;
}
