// ABOUTME: Request/response correlation protocol layered on the bus
// ABOUTME: Exactly-once resolution with a derived filesystem mirror

use crate::bus::{parse_timestamp, Bus};
use crate::clock::Ticker;
use crate::error::ControlError;
use crate::mirror::SessionMirror;
use crate::types::{ControlKind, ControlRequest, Decision, RequestStatus};
use chrono::Utc;

/// Control-plane operations: approval-style request/response exchanges.
///
/// Requests are persisted twice: the bus store is the store of record, and
/// `control.json` is a derived mirror rewritten after every mutation. A
/// mirror failure degrades to single-store persistence with a warning and
/// converges on the next successful mutation.
#[derive(Clone)]
pub struct ControlPlane {
    bus: Bus,
    mirror: SessionMirror,
}

impl ControlPlane {
    pub fn new(bus: Bus, mirror: SessionMirror) -> Self {
        Self { bus, mirror }
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Create a pending request and emit the matching `<kind>_request` bus
    /// message so the interaction is visible in history. Caller-supplied ids
    /// must be session-unique.
    pub async fn request(
        &self,
        kind: ControlKind,
        room: &str,
        sender: &str,
        recipient: &str,
        body: &str,
        summary: &str,
        request_id: Option<String>,
    ) -> Result<String, ControlError> {
        let supplied = request_id.is_some();
        let id = request_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO control_requests
                (request_id, room, kind, sender, recipient, body, summary, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', ?)
            "#,
        )
        .bind(&id)
        .bind(room)
        .bind(kind.as_str())
        .bind(sender)
        .bind(recipient)
        .bind(body)
        .bind(summary)
        .bind(now.to_rfc3339())
        .execute(self.bus.pool())
        .await?;

        if result.rows_affected() == 0 {
            // Only a caller-supplied id can collide; a fresh uuid colliding
            // would mean the generator is broken.
            debug_assert!(supplied);
            return Err(ControlError::DuplicateRequest(id));
        }

        self.bus
            .send(
                room,
                sender,
                recipient,
                kind.request_kind(),
                summary,
                serde_json::json!({ "request_id": id, "body": body }),
            )
            .await?;

        self.rewrite_mirror().await;

        tracing::info!(request_id = %id, kind = %kind, sender = %sender, recipient = %recipient, "Control request created");
        Ok(id)
    }

    /// Resolve a pending request exactly once. A second respond on the same
    /// id is rejected with NotPending and the original resolution is
    /// unchanged; an unknown id is NotFound with no side effects.
    ///
    /// Returns the resolved request so callers can apply side effects (e.g.
    /// shutdown) only after the transition is durably recorded.
    pub async fn respond(
        &self,
        request_id: &str,
        responder: &str,
        decision: Decision,
        body: &str,
    ) -> Result<ControlRequest, ControlError> {
        let now = Utc::now();
        let status = decision.status();

        let result = sqlx::query(
            "UPDATE control_requests SET status = ?, resolved_at = ? WHERE request_id = ? AND status = 'pending'",
        )
        .bind(status.as_str())
        .bind(now.to_rfc3339())
        .bind(request_id)
        .execute(self.bus.pool())
        .await?;

        if result.rows_affected() == 0 {
            return match self.get(request_id).await? {
                Some(_) => Err(ControlError::NotPending(request_id.to_string())),
                None => Err(ControlError::NotFound(request_id.to_string())),
            };
        }

        let request = self
            .get(request_id)
            .await?
            .ok_or_else(|| ControlError::NotFound(request_id.to_string()))?;

        self.bus
            .send(
                &request.room,
                responder,
                &request.sender,
                request.kind.response_kind(),
                body,
                serde_json::json!({
                    "request_id": request_id,
                    "decision": match decision {
                        Decision::Approve => "approve",
                        Decision::Reject => "reject",
                    },
                }),
            )
            .await?;

        self.rewrite_mirror().await;

        tracing::info!(
            request_id = %request_id,
            responder = %responder,
            status = %status.as_str(),
            "Control request resolved"
        );

        Ok(request)
    }

    /// Pending requests addressed to or initiated by the agent.
    pub async fn pending(&self, agent: &str) -> Result<Vec<ControlRequest>, ControlError> {
        let rows = sqlx::query_as::<_, ControlRow>(
            r#"
            SELECT request_id, room, kind, sender, recipient, body, summary, status,
                   created_at, resolved_at
            FROM control_requests
            WHERE status = 'pending' AND (recipient = ? OR sender = ?)
            ORDER BY created_at ASC
            "#,
        )
        .bind(agent)
        .bind(agent)
        .fetch_all(self.bus.pool())
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    /// Resolved requests of one kind and status; used by the supervisor to
    /// apply shutdown approvals it has not acted on yet.
    pub async fn resolved(
        &self,
        kind: ControlKind,
        status: RequestStatus,
    ) -> Result<Vec<ControlRequest>, ControlError> {
        let rows = sqlx::query_as::<_, ControlRow>(
            r#"
            SELECT request_id, room, kind, sender, recipient, body, summary, status,
                   created_at, resolved_at
            FROM control_requests
            WHERE kind = ? AND status = ?
            ORDER BY resolved_at ASC
            "#,
        )
        .bind(kind.as_str())
        .bind(status.as_str())
        .fetch_all(self.bus.pool())
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    pub async fn get(&self, request_id: &str) -> Result<Option<ControlRequest>, ControlError> {
        let row = sqlx::query_as::<_, ControlRow>(
            r#"
            SELECT request_id, room, kind, sender, recipient, body, summary, status,
                   created_at, resolved_at
            FROM control_requests
            WHERE request_id = ?
            "#,
        )
        .bind(request_id)
        .fetch_optional(self.bus.pool())
        .await?;

        Ok(row.map(|r| r.into()))
    }

    pub async fn all(&self) -> Result<Vec<ControlRequest>, ControlError> {
        let rows = sqlx::query_as::<_, ControlRow>(
            r#"
            SELECT request_id, room, kind, sender, recipient, body, summary, status,
                   created_at, resolved_at
            FROM control_requests
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(self.bus.pool())
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    /// Requester-side synchronous wait: poll until the request leaves
    /// pending, at the caller's cadence and budget. There is no core-defined
    /// timeout; a pending request outlives any wait.
    pub async fn wait(
        &self,
        request_id: &str,
        ticker: &mut dyn Ticker,
        max_polls: u32,
    ) -> Result<ControlRequest, ControlError> {
        for _ in 0..max_polls {
            match self.get(request_id).await? {
                Some(req) if req.status != RequestStatus::Pending => return Ok(req),
                Some(_) => {}
                None => return Err(ControlError::NotFound(request_id.to_string())),
            }
            ticker.tick().await;
        }
        Err(ControlError::WaitExhausted(request_id.to_string()))
    }

    /// Rewrite the derived mirror from the store of record. Failures warn
    /// and never block the caller; the next mutation reconverges.
    async fn rewrite_mirror(&self) {
        match self.all().await {
            Ok(requests) => {
                if let Err(e) = self.mirror.write_control(&requests) {
                    tracing::warn!(error = %e, "Control mirror write failed, continuing on log alone");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not read control requests for mirror rewrite");
            }
        }
    }
}

#[derive(sqlx::FromRow)]
struct ControlRow {
    request_id: String,
    room: String,
    kind: String,
    sender: String,
    recipient: String,
    body: String,
    summary: String,
    status: String,
    created_at: String,
    resolved_at: Option<String>,
}

impl From<ControlRow> for ControlRequest {
    fn from(row: ControlRow) -> Self {
        ControlRequest {
            request_id: row.request_id,
            room: row.room,
            kind: ControlKind::parse(&row.kind).unwrap_or(ControlKind::Permission),
            sender: row.sender,
            recipient: row.recipient,
            body: row.body,
            summary: row.summary,
            status: RequestStatus::parse(&row.status),
            created_at: parse_timestamp(&row.created_at),
            resolved_at: row.resolved_at.as_deref().map(parse_timestamp),
        }
    }
}
