use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentKind {
    Claude,
    Gemini,
    Codex,
    Grok,
    Shell(String), // Named shell with custom name
}

impl AgentKind {
    /// Agent kinds that can be launched directly by name.
    pub const AGENTS: [AgentKind; 4] = [
        AgentKind::Claude,
        AgentKind::Gemini,
        AgentKind::Codex,
        AgentKind::Grok,
    ];

    /// Key used for `[agents.<name>]` config lookups and `slow_agents`.
    pub fn name(&self) -> &str {
        match self {
            AgentKind::Claude => "claude",
            AgentKind::Gemini => "gemini",
            AgentKind::Codex => "codex",
            AgentKind::Grok => "grok",
            AgentKind::Shell(_) => "shell",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "claude" => Some(AgentKind::Claude),
            "gemini" => Some(AgentKind::Gemini),
            "codex" => Some(AgentKind::Codex),
            "grok" => Some(AgentKind::Grok),
            "shell" | "terminal" => Some(AgentKind::Shell("shell".to_string())),
            _ => None,
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            AgentKind::Claude => "Claude".to_string(),
            AgentKind::Gemini => "Gemini".to_string(),
            AgentKind::Codex => "Codex".to_string(),
            AgentKind::Grok => "Grok".to_string(),
            AgentKind::Shell(name) => name.clone(),
        }
    }

    pub fn badge(&self) -> &'static str {
        match self {
            AgentKind::Claude => "C",
            AgentKind::Gemini => "G",
            AgentKind::Codex => "X",
            AgentKind::Grok => "K",
            AgentKind::Shell(_) => "T",
        }
    }

    pub fn is_shell(&self) -> bool {
        matches!(self, AgentKind::Shell(_))
    }

    pub fn is_agent(&self) -> bool {
        !self.is_shell()
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
