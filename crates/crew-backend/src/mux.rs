// ABOUTME: Typed wrapper over the tmux CLI for pane-backed agents
// ABOUTME: Every invocation is an explicit arg vector, never a shell string

use crate::error::BackendError;
use std::path::Path;
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, warn};

/// Typed tmux runner. Commands are built as argument vectors and launched
/// directly; pane and window identities are captured from tmux's own
/// formatted output rather than guessed.
pub struct Multiplexer {
    bin: String,
}

impl Default for Multiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl Multiplexer {
    pub fn new() -> Self {
        Self {
            bin: "tmux".to_string(),
        }
    }

    /// True when the current process runs inside a tmux session.
    pub fn in_session() -> bool {
        std::env::var_os("TMUX").is_some()
    }

    async fn run(&self, args: &[&str]) -> Result<Output, BackendError> {
        debug!(args = ?args, "Running tmux command");

        let output = Command::new(&self.bin).args(args).output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(args = ?args, stderr = %stderr, "tmux command failed");
            return Err(BackendError::Mux {
                command: args.join(" "),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(output)
    }

    /// Create a new window running the given command, returning
    /// `(window_id, pane_id)` as reported by tmux.
    pub async fn new_window(
        &self,
        name: &str,
        cwd: &Path,
        command: &[String],
    ) -> Result<(String, String), BackendError> {
        let cwd_str = cwd.to_string_lossy();
        let mut args: Vec<&str> = vec![
            "new-window",
            "-d",
            "-P",
            "-F",
            "#{window_id} #{pane_id}",
            "-n",
            name,
            "-c",
            &cwd_str,
        ];
        for part in command {
            args.push(part.as_str());
        }

        let output = self.run(&args).await?;
        let printed = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let (window, pane) = printed
            .split_once(' ')
            .ok_or_else(|| BackendError::Mux {
                command: "new-window".to_string(),
                stderr: format!("unexpected output: {printed}"),
            })?;

        Ok((window.to_string(), pane.to_string()))
    }

    /// Inject literal keystrokes into a pane, followed by Enter.
    pub async fn send_keys(&self, pane: &str, text: &str) -> Result<(), BackendError> {
        self.run(&["send-keys", "-t", pane, "-l", text]).await?;
        self.run(&["send-keys", "-t", pane, "Enter"]).await?;
        Ok(())
    }

    pub async fn kill_pane(&self, pane: &str) -> Result<(), BackendError> {
        self.run(&["kill-pane", "-t", pane]).await?;
        Ok(())
    }

    pub async fn kill_window(&self, window: &str) -> Result<(), BackendError> {
        self.run(&["kill-window", "-t", window]).await?;
        Ok(())
    }

    /// Panes of one window, for checking whether a window still belongs to a
    /// single agent before killing the whole window.
    pub async fn list_panes(&self, window: &str) -> Result<Vec<String>, BackendError> {
        let output = self
            .run(&["list-panes", "-t", window, "-F", "#{pane_id}"])
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_session_reflects_tmux_env() {
        // The variable is process-global; only assert the accessor is
        // consistent with the environment it sees.
        assert_eq!(Multiplexer::in_session(), std::env::var_os("TMUX").is_some());
    }
}
