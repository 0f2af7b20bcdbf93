// ABOUTME: crew CLI parser and error-to-exit-code mapping
// ABOUTME: Usage errors exit 2, environment/precondition failures exit 1

pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "crew")]
#[command(about = "Coordinate a lead plus workers on a shared code change")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a default configuration file
    Init,

    /// Create (or recompute) a team for a session
    Teamcreate {
        /// Session name
        session: String,
        /// Worker count (2-4) or "auto" to size from the description
        #[arg(long, default_value = "auto")]
        workers: String,
        /// Task description used by auto sizing
        #[arg(long)]
        description: Option<String>,
    },

    /// Allocate workspaces, spawn the team, and delegate a task
    #[command(alias = "run")]
    Up {
        /// Session name
        session: String,
        /// Task to delegate after spawning
        #[arg(long)]
        task: Option<String>,
        /// Backend mode: auto, pane, process, or hub
        #[arg(long, default_value = "auto")]
        backend: String,
        /// Worker count (2-4) or "auto"
        #[arg(long, default_value = "auto")]
        workers: String,
    },

    /// Show room, mailbox, and runtime status for a session
    Status {
        /// Session name
        session: String,
    },

    /// Send a message or create/resolve a control request
    Sendmessage {
        /// Session name
        session: String,
        /// Message kind or control request type
        #[arg(long = "type")]
        kind: String,
        /// Sending agent
        #[arg(long)]
        from: String,
        /// Recipient agent, or "all" to broadcast
        #[arg(long)]
        to: String,
        /// Message body
        #[arg(long)]
        content: String,
        /// Correlation id (supplied on request creation, required on respond)
        #[arg(long)]
        request_id: Option<String>,
        /// Approve the pending request named by --request-id
        #[arg(long)]
        approve: bool,
        /// Reject the pending request named by --request-id
        #[arg(long)]
        reject: bool,
    },

    /// Tear down a session's team
    Teamdelete {
        /// Session name
        session: String,
        /// Also stop running agents and remove the session directory
        #[arg(long)]
        force: bool,
    },

    /// Run one agent's poll loop (internal, spawned by the supervisor)
    #[command(hide = true)]
    Agent {
        #[arg(long)]
        session: String,
        #[arg(long)]
        name: String,
    },

    /// Run the shared hub hosting all agent loops (internal)
    #[command(hide = true)]
    Hub {
        #[arg(long)]
        session: String,
    },
}

/// Command failure with a distinct exit code per class.
#[derive(Debug)]
pub enum CliError {
    /// Bad arguments or invalid values; nothing was mutated. Exit 2.
    Usage(String),
    /// Environment or precondition not met. Exit 1.
    Precondition(String),
    /// Unexpected internal failure. Exit 1.
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        CliError::Internal(err)
    }
}

impl CliError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            CliError::Usage(_) => ExitCode::from(2),
            CliError::Precondition(_) | CliError::Internal(_) => ExitCode::from(1),
        }
    }

    pub fn message(&self) -> String {
        match self {
            CliError::Usage(msg) | CliError::Precondition(msg) => msg.clone(),
            CliError::Internal(err) => format!("{err:#}"),
        }
    }
}

pub async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Init => commands::init().await,
        Commands::Teamcreate {
            session,
            workers,
            description,
        } => commands::teamcreate(&session, &workers, description.as_deref()).await,
        Commands::Up {
            session,
            task,
            backend,
            workers,
        } => commands::up(&session, task, &backend, &workers).await,
        Commands::Status { session } => commands::status(&session).await,
        Commands::Sendmessage {
            session,
            kind,
            from,
            to,
            content,
            request_id,
            approve,
            reject,
        } => {
            commands::sendmessage(
                &session, &kind, &from, &to, &content, request_id, approve, reject,
            )
            .await
        }
        Commands::Teamdelete { session, force } => commands::teamdelete(&session, force).await,
        Commands::Agent { session, name } => {
            commands::gate_check()?;
            crate::agent::run_agent(&session, &name)
                .await
                .map_err(CliError::Internal)
        }
        Commands::Hub { session } => {
            commands::gate_check()?;
            crate::supervisor::hub::run_hub(&session)
                .await
                .map_err(CliError::Internal)
        }
    }
}
