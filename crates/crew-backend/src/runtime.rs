// ABOUTME: Persistent table of per-agent runtime records for one session
// ABOUTME: Atomic JSON replace; records survive termination for audit

use anyhow::Result;
use crew_core::mirror::{atomic_write_json, read_json};
use crew_core::{AgentRuntimeRecord, AgentStatus};
use std::path::{Path, PathBuf};

/// Runtime records for every agent spawned in a session. Loaded from and
/// saved to `runtime.json` with write-temp-then-rename, so concurrently
/// polling processes never read a torn document.
#[derive(Debug)]
pub struct RuntimeTable {
    path: PathBuf,
    records: Vec<AgentRuntimeRecord>,
}

impl RuntimeTable {
    /// Load the table, or start empty when no document exists yet.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = if path.exists() {
            read_json(&path).unwrap_or_default()
        } else {
            Vec::new()
        };
        Self { path, records }
    }

    pub fn records(&self) -> &[AgentRuntimeRecord] {
        &self.records
    }

    pub fn get(&self, agent: &str) -> Option<&AgentRuntimeRecord> {
        self.records.iter().find(|r| r.agent_name == agent)
    }

    /// Agents currently marked running.
    pub fn running(&self) -> impl Iterator<Item = &AgentRuntimeRecord> {
        self.records
            .iter()
            .filter(|r| r.status == AgentStatus::Running)
    }

    /// Insert or replace the record for an agent and persist.
    pub fn upsert(&mut self, record: AgentRuntimeRecord) -> Result<()> {
        match self
            .records
            .iter_mut()
            .find(|r| r.agent_name == record.agent_name)
        {
            Some(existing) => *existing = record,
            None => self.records.push(record),
        }
        self.save()
    }

    /// Transition an agent to Running, recording its live identity.
    pub fn mark_running(
        &mut self,
        agent: &str,
        process_id: Option<u32>,
        pane_id: Option<String>,
        window: Option<String>,
    ) -> Result<()> {
        if let Some(record) = self.records.iter_mut().find(|r| r.agent_name == agent) {
            record.status = AgentStatus::Running;
            record.process_id = process_id;
            record.pane_id = pane_id;
            record.window = window;
        }
        self.save()
    }

    /// Transition an agent to Terminated. The record is retained; its
    /// process/pane identity is cleared since it is no longer meaningful.
    pub fn mark_terminated(&mut self, agent: &str) -> Result<()> {
        if let Some(record) = self.records.iter_mut().find(|r| r.agent_name == agent) {
            record.status = AgentStatus::Terminated;
            record.process_id = None;
            record.pane_id = None;
            record.window = None;
        }
        self.save()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<()> {
        atomic_write_json(&self.path, &self.records)
    }
}
