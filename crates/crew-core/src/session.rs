// ABOUTME: Per-session storage layout and session name validation
// ABOUTME: Everything a session owns lives under one root directory

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment override for the data root; tests point this at a temp dir.
pub const DATA_DIR_ENV: &str = "CREW_DATA_DIR";

/// Resolve the data root: `$CREW_DATA_DIR`, else `<data_dir>/crew`.
pub fn data_root() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }
    dirs::data_dir()
        .map(|d| d.join("crew"))
        .context("could not determine data directory")
}

/// Paths for one session's storage: the bus database plus the JSON mirrors.
#[derive(Debug, Clone)]
pub struct SessionPaths {
    root: PathBuf,
}

impl SessionPaths {
    pub fn new(data_root: &Path, session: &str) -> Self {
        Self {
            root: data_root.join("sessions").join(session),
        }
    }

    /// Resolve from the environment/default data root.
    pub fn resolve(session: &str) -> Result<Self> {
        Ok(Self::new(&data_root()?, session))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn exists(&self) -> bool {
        self.root.exists()
    }

    pub fn bus_db(&self) -> PathBuf {
        self.root.join("bus.db")
    }

    pub fn inboxes_dir(&self) -> PathBuf {
        self.root.join("inboxes")
    }

    /// Create the session directory tree.
    pub fn ensure(&self) -> Result<()> {
        std::fs::create_dir_all(self.inboxes_dir())
            .with_context(|| format!("Failed to create session dir {}", self.root.display()))?;
        Ok(())
    }
}

/// Session names become directory and branch components, so keep them to a
/// conservative character set.
pub fn validate_session_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 64 {
        anyhow::bail!("session name must be 1-64 characters");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        anyhow::bail!("session name may contain only letters, digits, '-' and '_'");
    }
    Ok(())
}
