//! Loop configuration stored in `ralph.toml` next to the prompt document.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Default config file name inside the loop directory.
pub const CONFIG_FILE: &str = "ralph.toml";

/// Loop configuration (TOML).
///
/// Every field is optional in the file; missing fields take the defaults of the
/// original shell loop (50 iterations, 2s cooldown, `claude` stream-json).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RalphConfig {
    /// Iteration budget used when the CLI does not pass one.
    pub max_iterations: u32,

    /// Pause between iterations that did not complete the run.
    pub cooldown_secs: u64,

    /// Kill an agent invocation after this many seconds. Unset waits forever.
    pub invocation_timeout_secs: Option<u64>,

    pub prompt_file: String,
    pub progress_file: String,
    pub knowledge_file: String,
    pub log_dir: String,

    /// Goal line used only when the built-in instruction payload is rendered.
    pub goal: String,

    /// Keep at most this many bytes of agent stderr for diagnostics.
    pub stderr_limit_bytes: usize,

    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Program and leading arguments. The instruction payload is appended as
    /// the final argument.
    pub command: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: [
                "claude",
                "--dangerously-skip-permissions",
                "--verbose",
                "--print",
                "--output-format",
                "stream-json",
                "-p",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
        }
    }
}

impl Default for RalphConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            cooldown_secs: 2,
            invocation_timeout_secs: None,
            prompt_file: "prompt.md".to_string(),
            progress_file: "progress.txt".to_string(),
            knowledge_file: "knowledge.md".to_string(),
            log_dir: "logs".to_string(),
            goal: String::new(),
            stderr_limit_bytes: 100_000,
            agent: AgentConfig::default(),
        }
    }
}

impl RalphConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.invocation_timeout_secs == Some(0) {
            return Err(anyhow!("invocation_timeout_secs must be > 0 when set"));
        }
        if self.stderr_limit_bytes == 0 {
            return Err(anyhow!("stderr_limit_bytes must be > 0"));
        }
        if self.agent.command.is_empty() || self.agent.command[0].trim().is_empty() {
            return Err(anyhow!("agent.command must be a non-empty array"));
        }
        for (name, value) in [
            ("prompt_file", &self.prompt_file),
            ("progress_file", &self.progress_file),
            ("knowledge_file", &self.knowledge_file),
            ("log_dir", &self.log_dir),
        ] {
            if value.trim().is_empty() {
                return Err(anyhow!("{name} must not be empty"));
            }
        }
        Ok(())
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn invocation_timeout(&self) -> Option<Duration> {
        self.invocation_timeout_secs.map(Duration::from_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RalphConfig::default()`.
pub fn load_config(path: &Path) -> Result<RalphConfig> {
    if !path.exists() {
        let cfg = RalphConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RalphConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}
