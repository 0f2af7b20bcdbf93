// ABOUTME: Tool-level configuration for crew, loaded from TOML with defaults
// ABOUTME: Also hosts the feature gates every command beyond init must pass

use crate::types::BackendMode;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Primary feature gate; must be truthy for any command beyond init/help.
pub const GATE_PRIMARY: &str = "CREW_ENABLED";
/// Agent-spawning feature gate; independent of the primary gate.
pub const GATE_AGENTS: &str = "CREW_AGENTS_ENABLED";

/// Policy for uncommitted tracked changes in the base repository, decided
/// once per session before any workspace is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirtyBasePolicy {
    /// Refuse to allocate from a dirty base.
    #[default]
    Forbid,
    /// Snapshot the dirty state once into an ephemeral base shared by all
    /// agents.
    Snapshot,
    /// Allocate from the requested base revision as-is.
    Ignore,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrewConfig {
    /// Directory containing agent workspaces (worktrees), `~` expanded.
    #[serde(default = "default_workspaces_dir")]
    pub workspaces_dir: String,

    /// Executable launched to do an agent's actual work. The control-plane
    /// passes it the task text and never interprets task semantics.
    #[serde(default = "default_agent_program")]
    pub agent_program: String,

    /// Extra arguments passed to the agent program before the task text.
    #[serde(default)]
    pub agent_args: Vec<String>,

    /// Default model name recorded on team members.
    #[serde(default = "default_model")]
    pub model: String,

    /// Default member profile recorded on team members.
    #[serde(default = "default_profile")]
    pub profile: String,

    /// Poll cadence for agent and supervisor loops, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Requested backend mode; `auto` resolves from the environment.
    #[serde(default)]
    pub backend_mode: BackendMode,

    /// How a dirty base repository is treated at allocation time.
    #[serde(default)]
    pub dirty_base: DirtyBasePolicy,
}

fn default_workspaces_dir() -> String {
    "~/crew/workspaces".to_string()
}

fn default_agent_program() -> String {
    "claude".to_string()
}

fn default_model() -> String {
    "default".to_string()
}

fn default_profile() -> String {
    "standard".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1500
}

impl Default for CrewConfig {
    fn default() -> Self {
        Self {
            workspaces_dir: default_workspaces_dir(),
            agent_program: default_agent_program(),
            agent_args: Vec::new(),
            model: default_model(),
            profile: default_profile(),
            poll_interval_ms: default_poll_interval_ms(),
            backend_mode: BackendMode::default(),
            dirty_base: DirtyBasePolicy::default(),
        }
    }
}

impl CrewConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: CrewConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        Ok(config)
    }

    /// Load from the default path, falling back to defaults if absent.
    pub fn load_or_default() -> Result<Self> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory {}", parent.display())
            })?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        Ok(())
    }

    /// Get the default config file path (~/.config/crew/crew.toml).
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .map(|h| h.join(".config"))
                    .unwrap_or_else(|| PathBuf::from("."))
            })
            .join("crew");
        Ok(config_dir.join("crew.toml"))
    }

    /// Expand ~ in the workspaces directory path.
    pub fn workspaces_dir_expanded(&self) -> PathBuf {
        shellexpand::tilde(&self.workspaces_dir).into_owned().into()
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms)
    }
}

fn truthy(value: Option<String>) -> bool {
    matches!(
        value.as_deref().map(str::trim),
        Some("1") | Some("true") | Some("yes")
    )
}

/// Returns the name of the first missing feature gate, or None when both are
/// enabled. Both gates must be enabled independently.
pub fn missing_gate() -> Option<&'static str> {
    if !truthy(std::env::var(GATE_PRIMARY).ok()) {
        return Some(GATE_PRIMARY);
    }
    if !truthy(std::env::var(GATE_AGENTS).ok()) {
        return Some(GATE_AGENTS);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn load_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            workspaces_dir = "~/teams"
            agent_program = "claude"
            poll_interval_ms = 500
            backend_mode = "hub"
            dirty_base = "snapshot"
        "#
        )
        .unwrap();

        let config = CrewConfig::load(file.path()).unwrap();
        assert_eq!(config.workspaces_dir, "~/teams");
        assert_eq!(config.poll_interval_ms, 500);
        assert_eq!(config.backend_mode, BackendMode::Hub);
        assert_eq!(config.dirty_base, DirtyBasePolicy::Snapshot);
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"workspaces_dir = "~/teams""#).unwrap();

        let config = CrewConfig::load(file.path()).unwrap();
        assert_eq!(config.backend_mode, BackendMode::Auto);
        assert_eq!(config.dirty_base, DirtyBasePolicy::Forbid);
        assert_eq!(config.agent_program, "claude");
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crew.toml");

        let config = CrewConfig {
            poll_interval_ms: 250,
            backend_mode: BackendMode::Process,
            ..CrewConfig::default()
        };
        config.save(&path).unwrap();

        let loaded = CrewConfig::load(&path).unwrap();
        assert_eq!(loaded.poll_interval_ms, 250);
        assert_eq!(loaded.backend_mode, BackendMode::Process);
    }

    #[test]
    fn workspaces_dir_expansion() {
        let config = CrewConfig::default();
        let expanded = config.workspaces_dir_expanded();
        assert!(!expanded.to_string_lossy().contains('~'));
    }

    #[test]
    fn truthy_values() {
        assert!(truthy(Some("1".to_string())));
        assert!(truthy(Some("true".to_string())));
        assert!(truthy(Some("yes".to_string())));
        assert!(!truthy(Some("0".to_string())));
        assert!(!truthy(Some("".to_string())));
        assert!(!truthy(None));
    }
}
