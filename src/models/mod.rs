mod agent;
mod terminal;

pub use agent::AgentKind;
pub use terminal::{SpawnKey, TabRole, TermSize, TerminalId};
