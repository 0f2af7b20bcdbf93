// ABOUTME: Filesystem mirror of session state under the per-session root
// ABOUTME: Atomic write-temp-then-rename JSON documents for pollers outside the bus

use crate::types::{AgentRuntimeRecord, ControlRequest, InboxItem, TeamConfig};
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Atomically replace a JSON document. Concurrent pollers never observe a
/// partially written file: the content lands in a sibling temp file first
/// and is renamed over the target.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .context("mirror path has no parent directory")?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create {}", parent.display()))?;

    let content = serde_json::to_vec_pretty(value).context("Failed to serialize mirror state")?;

    let file_name = path
        .file_name()
        .context("mirror path has no file name")?
        .to_string_lossy();
    let tmp = parent.join(format!(".{file_name}.tmp"));

    std::fs::write(&tmp, &content)
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to rename {} into place", tmp.display()))?;

    Ok(())
}

/// Read a JSON document written by [`atomic_write_json`].
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Writer for the session's filesystem-backed state documents.
///
/// Every document is derived from the bus store or the supervisor's runtime
/// table and rewritten in full; the mirror is never the store of record.
#[derive(Debug, Clone)]
pub struct SessionMirror {
    root: PathBuf,
}

impl SessionMirror {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn control_path(&self) -> PathBuf {
        self.root.join("control.json")
    }

    pub fn team_path(&self) -> PathBuf {
        self.root.join("config.json")
    }

    pub fn runtime_path(&self) -> PathBuf {
        self.root.join("runtime.json")
    }

    pub fn inbox_path(&self, agent: &str) -> PathBuf {
        self.root.join("inboxes").join(format!("{agent}.json"))
    }

    pub fn write_control(&self, requests: &[ControlRequest]) -> Result<()> {
        atomic_write_json(&self.control_path(), &requests)
    }

    pub fn read_control(&self) -> Result<Vec<ControlRequest>> {
        read_json(&self.control_path())
    }

    pub fn write_team(&self, team: &TeamConfig) -> Result<()> {
        atomic_write_json(&self.team_path(), team)
    }

    pub fn read_team(&self) -> Result<TeamConfig> {
        read_json(&self.team_path())
    }

    pub fn write_runtime(&self, records: &[AgentRuntimeRecord]) -> Result<()> {
        atomic_write_json(&self.runtime_path(), &records)
    }

    pub fn read_runtime(&self) -> Result<Vec<AgentRuntimeRecord>> {
        read_json(&self.runtime_path())
    }

    pub fn write_inbox(&self, agent: &str, items: &[InboxItem]) -> Result<()> {
        atomic_write_json(&self.inbox_path(agent), &items)
    }

    pub fn read_inbox(&self, agent: &str) -> Result<Vec<InboxItem>> {
        read_json(&self.inbox_path(agent))
    }
}
