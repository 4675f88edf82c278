use crate::models::AgentKind;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration embedded at compile time
const DEFAULT_CONFIG: &str = include_str!("defaults.toml");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub resize: ResizeSettings,
    pub spawn: SpawnSettings,
    pub paste: PasteSettings,
    pub terminal: TerminalSettings,
    pub orchestrator: OrchestratorSettings,
    pub agents: HashMap<String, AgentCommand>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResizeSettings {
    pub min_width: f32,
    pub min_height: f32,
    pub min_cols: u16,
    pub min_rows: u16,
    pub immediate_below_cols: u16,
    pub debounce_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnSettings {
    pub timeout_secs: u64,
    pub extended_timeout_secs: u64,
    pub slow_agents: Vec<String>,
    pub guard_columns: u16,
    pub bootstrap_cols: u16,
    pub bootstrap_rows: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PasteSettings {
    pub chunk_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalSettings {
    pub scrollback_lines: usize,
    pub shell: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    pub agent: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCommand {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        let agents = [
            ("claude", "claude", vec![]),
            ("gemini", "gemini", vec![]),
            ("codex", "codex", vec!["--no-alt-screen".to_string()]),
            ("grok", "grok", vec![]),
        ]
        .into_iter()
        .map(|(name, command, args)| {
            (
                name.to_string(),
                AgentCommand {
                    command: command.to_string(),
                    args,
                },
            )
        })
        .collect();

        Self {
            resize: ResizeSettings::default(),
            spawn: SpawnSettings::default(),
            paste: PasteSettings::default(),
            terminal: TerminalSettings::default(),
            orchestrator: OrchestratorSettings::default(),
            agents,
        }
    }
}

impl Default for ResizeSettings {
    fn default() -> Self {
        Self {
            min_width: 20.0,
            min_height: 4.0,
            min_cols: 20,
            min_rows: 4,
            immediate_below_cols: 30,
            debounce_ms: 120,
        }
    }
}

impl ResizeSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for SpawnSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 20,
            extended_timeout_secs: 60,
            slow_agents: vec!["codex".to_string()],
            guard_columns: 2,
            bootstrap_cols: 80,
            bootstrap_rows: 24,
        }
    }
}

impl SpawnSettings {
    /// Start window for an agent kind; slow starters get the extended window.
    pub fn timeout_for(&self, kind: &AgentKind) -> Duration {
        let slow = self
            .slow_agents
            .iter()
            .any(|name| name.eq_ignore_ascii_case(kind.name()));
        if slow {
            Duration::from_secs(self.extended_timeout_secs)
        } else {
            Duration::from_secs(self.timeout_secs)
        }
    }
}

impl Default for PasteSettings {
    fn default() -> Self {
        Self { chunk_size: 2048 }
    }
}

impl Default for TerminalSettings {
    fn default() -> Self {
        Self {
            scrollback_lines: 10000,
            shell: None,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            agent: "claude".to_string(),
        }
    }
}

impl Config {
    /// Program and arguments that launch `kind`.
    pub fn launch_command(&self, kind: &AgentKind) -> (String, Vec<String>) {
        if kind.is_shell() {
            let shell = self
                .terminal
                .shell
                .clone()
                .or_else(|| std::env::var("SHELL").ok())
                .unwrap_or_else(|| "/bin/bash".to_string());
            return (shell, Vec::new());
        }

        match self.agents.get(kind.name()) {
            Some(agent) => (agent.command.clone(), agent.args.clone()),
            None => (kind.name().to_string(), Vec::new()),
        }
    }

    /// Agent kind the orchestrator tab runs (falls back to Claude).
    pub fn orchestrator_agent(&self) -> AgentKind {
        AgentKind::from_name(&self.orchestrator.agent).unwrap_or(AgentKind::Claude)
    }
}

/// Get the path to user's config file
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("termdeck")
        .join("config.toml")
}

pub fn parse(contents: &str) -> Result<Config> {
    toml::from_str(contents).context("Invalid termdeck config")
}

pub fn embedded_defaults() -> &'static str {
    DEFAULT_CONFIG
}

/// Load configuration from `path` (or the default location).
///
/// An explicitly given path must exist; the default location may be absent,
/// in which case the built-in defaults are used.
pub fn load(path: Option<&Path>) -> Result<Config> {
    let (path, explicit) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => (default_config_path(), false),
    };

    if !path.exists() {
        if explicit {
            anyhow::bail!("Config file {} does not exist", path.display());
        }
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    parse(&contents).with_context(|| format!("Failed to parse {}", path.display()))
}
