// ABOUTME: Typed process launch for agent executables
// ABOUTME: ProcessDescriptor replaces string-templated wrapper scripts entirely

use crate::error::BackendError;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::info;

/// A fully-typed description of a process to launch: executable, argument
/// vector, environment additions, and working directory. No shell command
/// strings are ever built from this.
#[derive(Debug, Clone)]
pub struct ProcessDescriptor {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
}

impl ProcessDescriptor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        cmd
    }

    /// The command as an argument vector, for pane-backed launches where
    /// tmux receives the words directly.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }
}

/// A spawned agent child process. Output lines are forwarded through
/// tracing with the agent name attached; exit is observed with `try_wait`
/// from the supervisor's poll loop.
#[derive(Debug)]
pub struct AgentProcess {
    agent: String,
    child: Option<Child>,
    pid: Option<u32>,
}

impl AgentProcess {
    pub async fn spawn(agent: &str, descriptor: &ProcessDescriptor) -> Result<Self, BackendError> {
        let mut cmd = descriptor.command();
        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| BackendError::Spawn {
            agent: agent.to_string(),
            reason: e.to_string(),
        })?;

        let pid = child.id();
        info!(agent = %agent, pid = ?pid, program = %descriptor.program, "Spawned agent process");

        if let Some(stdout) = child.stdout.take() {
            let name = agent.to_string();
            tokio::spawn(async move {
                let reader = BufReader::new(stdout);
                let mut lines = reader.lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(agent = %name, "{line}");
                }
            });
        }

        if let Some(stderr) = child.stderr.take() {
            let name = agent.to_string();
            tokio::spawn(async move {
                let reader = BufReader::new(stderr);
                let mut lines = reader.lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(agent = %name, "{line}");
                }
            });
        }

        Ok(Self {
            agent: agent.to_string(),
            child: Some(child),
            pid,
        })
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Non-blocking exit check. Returns the exit code once the process has
    /// exited; subsequent calls return None.
    pub fn try_wait(&mut self) -> Option<Option<i32>> {
        let child = self.child.as_mut()?;
        match child.try_wait() {
            Ok(Some(status)) => {
                self.child = None;
                Some(status.code())
            }
            Ok(None) => None,
            Err(_) => {
                self.child = None;
                Some(None)
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    pub async fn kill(&mut self) -> Result<(), BackendError> {
        if let Some(child) = &mut self.child {
            child.kill().await?;
            self.child = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_builds_argv_in_order() {
        let desc = ProcessDescriptor::new("crew")
            .arg("agent")
            .args(["--session", "s1"])
            .env("CREW_AGENT", "worker-1")
            .cwd("/tmp");

        assert_eq!(desc.argv(), vec!["crew", "agent", "--session", "s1"]);
        assert_eq!(desc.env, vec![("CREW_AGENT".to_string(), "worker-1".to_string())]);
        assert_eq!(desc.cwd.as_deref(), Some(std::path::Path::new("/tmp")));
    }

    #[tokio::test]
    async fn spawn_and_observe_exit() {
        let desc = ProcessDescriptor::new("true");
        let mut proc = AgentProcess::spawn("worker-1", &desc).await.unwrap();
        assert!(proc.pid().is_some());

        // poll until the process exits
        let mut code = None;
        for _ in 0..100 {
            if let Some(c) = proc.try_wait() {
                code = c;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(code, Some(0));
        assert!(!proc.is_running());
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let desc = ProcessDescriptor::new("/no/such/binary-crew");
        let err = AgentProcess::spawn("worker-1", &desc).await.unwrap_err();
        assert!(matches!(err, BackendError::Spawn { .. }));
    }

    #[tokio::test]
    async fn kill_terminates_running_process() {
        let desc = ProcessDescriptor::new("sleep").arg("30");
        let mut proc = AgentProcess::spawn("worker-1", &desc).await.unwrap();
        assert!(proc.is_running());
        proc.kill().await.unwrap();
        assert!(!proc.is_running());
    }
}
