// ABOUTME: Lead-side fan-out of role-specific task prompts
// ABOUTME: Dispatches via bus send, inbox mirror documents, and pane keystrokes

use crate::supervisor::SpawnOutcome;
use anyhow::Result;
use crew_backend::Multiplexer;
use crew_core::{
    Bus, MessageKind, Role, SessionMirror, TeamConfig, TeamMember,
};

/// Fixed execution contract embedded in every delegated prompt.
const EXECUTION_CONTRACT: &str = "\
Operating contract:\n\
- Stay inside your assigned scope. If the work grows beyond it, send a \
blocker message to the lead instead of expanding scope yourself.\n\
- Send a status message after each meaningful step so the team can follow \
your progress.\n\
- Send a question message to the lead when requirements are ambiguous; do \
not guess silently.\n\
- When you finish, send a final status message with evidence: files \
changed, tests run, and their results.";

/// Build the role-specific prompt for one member.
pub fn build_prompt(member: &TeamMember, task_text: &str, session: &str) -> String {
    let role_brief = match member.role {
        Role::Worker => {
            "Deliver your slice of the task below. Coordinate with the other \
             workers through the bus rather than assuming their state."
        }
        Role::Utility => {
            "Support the workers on the task below: review their changes, fill \
             test gaps, and handle integration chores they escalate."
        }
        Role::Lead | Role::System => "Coordinate the team on the task below.",
    };

    format!(
        "You are {name}, a {role} on team {session}.\n\n{brief}\n\nTask:\n{task}\n\n{contract}",
        name = member.name,
        role = member.role,
        session = session,
        brief = role_brief,
        task = task_text,
        contract = EXECUTION_CONTRACT,
    )
}

/// Fan one task out to every worker and the utility member.
///
/// Each prompt is dispatched twice: a bus `task` message, and a refresh of
/// the member's inbox mirror document so filesystem pollers see it. For
/// pane-backed members whose pane is not already occupied by a boot prompt,
/// the prompt is additionally injected as literal keystrokes.
pub async fn delegate(
    bus: &Bus,
    mirror: &SessionMirror,
    mux: Option<&Multiplexer>,
    outcomes: &[SpawnOutcome],
    team: &TeamConfig,
    room: &str,
    task_text: &str,
) -> Result<()> {
    for member in team
        .members
        .iter()
        .filter(|m| matches!(m.role, Role::Worker | Role::Utility))
    {
        let prompt = build_prompt(member, task_text, &team.session_id);

        bus.send(
            room,
            "lead",
            &member.name,
            MessageKind::Task,
            &prompt,
            serde_json::json!({ "delegated": true }),
        )
        .await?;

        let inbox = bus.inbox(&member.name, false, false).await?;
        if let Err(e) = mirror.write_inbox(&member.name, &inbox) {
            tracing::warn!(agent = %member.name, error = %e, "Inbox mirror write failed");
        }

        let outcome = outcomes.iter().find(|o| o.record.agent_name == member.name);
        if let (Some(mux), Some(outcome)) = (mux, outcome) {
            if let (Some(pane), false) = (&outcome.record.pane_id, outcome.boot_prompted) {
                mux.send_keys(pane, &prompt).await?;
                tracing::debug!(agent = %member.name, pane = %pane, "Injected prompt into pane");
            }
        }

        tracing::info!(agent = %member.name, role = %member.role, "Delegated task");
    }

    Ok(())
}
