// ABOUTME: SQLite-backed message log with per-recipient mailbox projection
// ABOUTME: Handles membership, ordered sends with fanout, tailing, and read state

use crate::error::BusError;
use crate::types::{
    InboxItem, Message, MessageKind, ReadState, Role, BROADCAST, SYSTEM_SENDER,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqliteConnection, SqlitePool,
};
use std::path::Path;
use std::str::FromStr;

/// Durable, ordered message log per room with mailbox projection.
///
/// The bus and the session mirror documents are the only shared mutable
/// resources between agents; every write here is one transaction so
/// concurrent pollers never observe a message without its fanout rows.
#[derive(Clone)]
pub struct Bus {
    pool: SqlitePool,
}

impl Bus {
    /// Open or create the bus store at the given path.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, BusError> {
        let url = format!("sqlite:{}?mode=rwc", path.as_ref().display());

        let options = SqliteConnectOptions::from_str(&url)?
            .foreign_keys(true)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS members (
                room TEXT NOT NULL,
                agent TEXT NOT NULL,
                role TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                joined_at TEXT NOT NULL,
                PRIMARY KEY (room, agent)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                room TEXT NOT NULL,
                kind TEXT NOT NULL,
                sender TEXT NOT NULL,
                recipient TEXT NOT NULL,
                body TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mailbox (
                room TEXT NOT NULL,
                recipient TEXT NOT NULL,
                message_id INTEGER NOT NULL,
                state TEXT NOT NULL DEFAULT 'unread',
                created_at TEXT NOT NULL,
                PRIMARY KEY (room, recipient, message_id),
                FOREIGN KEY (message_id) REFERENCES messages(id)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS control_requests (
                request_id TEXT PRIMARY KEY,
                room TEXT NOT NULL,
                kind TEXT NOT NULL,
                sender TEXT NOT NULL,
                recipient TEXT NOT NULL,
                body TEXT NOT NULL,
                summary TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL,
                resolved_at TEXT
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_room ON messages(room, id)")
            .execute(&pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_mailbox_recipient ON mailbox(recipient, state)",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_control_status ON control_requests(status, recipient)",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the underlying pool; required before deleting the store file.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Idempotent upsert of room membership. Re-registering reactivates a
    /// deactivated member and updates its role.
    pub async fn register(&self, room: &str, agent: &str, role: Role) -> Result<(), BusError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO members (room, agent, role, active, joined_at)
            VALUES (?, ?, ?, 1, ?)
            ON CONFLICT (room, agent) DO UPDATE SET role = excluded.role, active = 1
            "#,
        )
        .bind(room)
        .bind(agent)
        .bind(role.as_str())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        tracing::debug!(room = %room, agent = %agent, role = %role, "Registered member");
        Ok(())
    }

    /// Remove a member from future fanout without deleting history.
    pub async fn deactivate(&self, room: &str, agent: &str) -> Result<(), BusError> {
        sqlx::query("UPDATE members SET active = 0 WHERE room = ? AND agent = ?")
            .bind(room)
            .bind(agent)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Active members of a room, with roles.
    pub async fn members(&self, room: &str) -> Result<Vec<(String, Role)>, BusError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT agent, role FROM members WHERE room = ? AND active = 1 ORDER BY agent",
        )
        .bind(room)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(agent, role)| (agent, Role::parse(&role).unwrap_or(Role::Worker)))
            .collect())
    }

    /// Append one message and its mailbox fanout rows in a single
    /// transaction. Returns the message id (strictly increasing per room).
    ///
    /// `recipient = "all"` expands to every active member except the sender.
    /// An unknown room or unregistered agent is an error; the well-known
    /// `system` sender is auto-registered.
    pub async fn send(
        &self,
        room: &str,
        sender: &str,
        recipient: &str,
        kind: MessageKind,
        body: &str,
        metadata: serde_json::Value,
    ) -> Result<i64, BusError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let member_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM members WHERE room = ?")
                .bind(room)
                .fetch_one(&mut *tx)
                .await?;
        if member_count == 0 {
            return Err(BusError::UnknownRoom(room.to_string()));
        }

        if !Self::is_active_member(&mut tx, room, sender).await? {
            if sender == SYSTEM_SENDER {
                sqlx::query(
                    "INSERT INTO members (room, agent, role, active, joined_at) VALUES (?, ?, ?, 1, ?)",
                )
                .bind(room)
                .bind(sender)
                .bind(Role::System.as_str())
                .bind(now.to_rfc3339())
                .execute(&mut *tx)
                .await?;
            } else {
                return Err(BusError::UnknownAgent {
                    room: room.to_string(),
                    agent: sender.to_string(),
                });
            }
        }

        let targets: Vec<String> = if recipient == BROADCAST {
            sqlx::query_scalar(
                "SELECT agent FROM members WHERE room = ? AND active = 1 AND agent != ?",
            )
            .bind(room)
            .bind(sender)
            .fetch_all(&mut *tx)
            .await?
        } else {
            if !Self::is_active_member(&mut tx, room, recipient).await? {
                return Err(BusError::UnknownAgent {
                    room: room.to_string(),
                    agent: recipient.to_string(),
                });
            }
            vec![recipient.to_string()]
        };

        let result = sqlx::query(
            r#"
            INSERT INTO messages (room, kind, sender, recipient, body, metadata, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(room)
        .bind(kind.as_str())
        .bind(sender)
        .bind(recipient)
        .bind(body)
        .bind(metadata.to_string())
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        let message_id = result.last_insert_rowid();

        for target in &targets {
            sqlx::query(
                "INSERT INTO mailbox (room, recipient, message_id, state, created_at) VALUES (?, ?, ?, 'unread', ?)",
            )
            .bind(room)
            .bind(target)
            .bind(message_id)
            .bind(now.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::debug!(
            room = %room,
            sender = %sender,
            recipient = %recipient,
            kind = %kind,
            message_id = message_id,
            fanout = targets.len(),
            "Message sent"
        );

        Ok(message_id)
    }

    async fn is_active_member(
        conn: &mut SqliteConnection,
        room: &str,
        agent: &str,
    ) -> Result<bool, BusError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM members WHERE room = ? AND agent = ? AND active = 1",
        )
        .bind(room)
        .bind(agent)
        .fetch_one(conn)
        .await?;
        Ok(count > 0)
    }

    /// Lazy, restartable cursor over a room's log at or after `since_id`.
    pub fn tail(&self, room: &str, since_id: i64, for_agent: Option<&str>) -> Tail {
        Tail {
            bus: self.clone(),
            room: room.to_string(),
            next_id: since_id,
            for_agent: for_agent.map(|s| s.to_string()),
        }
    }

    /// This agent's mailbox entries across all rooms, oldest first.
    /// With `mark_read`, the returned unread entries are flipped to read in
    /// the same call; flipping an already-read entry is a no-op.
    pub async fn inbox(
        &self,
        agent: &str,
        unread_only: bool,
        mark_read: bool,
    ) -> Result<Vec<InboxItem>, BusError> {
        let state_clause = if unread_only {
            "AND b.state = 'unread'"
        } else {
            ""
        };
        let sql = format!(
            r#"
            SELECT m.id, m.room, m.kind, m.sender, m.recipient, m.body, m.metadata,
                   m.created_at, b.state, b.created_at AS delivered_at
            FROM mailbox b
            JOIN messages m ON m.id = b.message_id
            WHERE b.recipient = ? {state_clause}
            ORDER BY m.id ASC
            "#
        );

        let rows = sqlx::query_as::<_, InboxRow>(&sql)
            .bind(agent)
            .fetch_all(&self.pool)
            .await?;

        if mark_read {
            sqlx::query("UPDATE mailbox SET state = 'read' WHERE recipient = ? AND state = 'unread'")
                .bind(agent)
                .execute(&self.pool)
                .await?;
        }

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    /// Mark one delivered message read. Idempotent: re-marking is a no-op,
    /// never an error.
    pub async fn mark_read(
        &self,
        room: &str,
        agent: &str,
        message_id: i64,
    ) -> Result<(), BusError> {
        sqlx::query(
            "UPDATE mailbox SET state = 'read' WHERE room = ? AND recipient = ? AND message_id = ?",
        )
        .bind(room)
        .bind(agent)
        .bind(message_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Unread entry count for one member of one room.
    pub async fn unread_count(&self, room: &str, agent: &str) -> Result<i64, BusError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM mailbox WHERE room = ? AND recipient = ? AND state = 'unread'",
        )
        .bind(room)
        .bind(agent)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Aggregate counts for diagnostics.
    pub async fn status(&self, room: &str) -> Result<RoomStatus, BusError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE room = ?")
            .bind(room)
            .fetch_one(&self.pool)
            .await?;

        let by_kind: Vec<(String, i64)> = sqlx::query_as(
            "SELECT kind, COUNT(*) FROM messages WHERE room = ? GROUP BY kind ORDER BY kind",
        )
        .bind(room)
        .fetch_all(&self.pool)
        .await?;

        let by_sender: Vec<(String, i64)> = sqlx::query_as(
            "SELECT sender, COUNT(*) FROM messages WHERE room = ? GROUP BY sender ORDER BY sender",
        )
        .bind(room)
        .fetch_all(&self.pool)
        .await?;

        let unread: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT recipient, COUNT(*) FROM mailbox
            WHERE room = ? AND state = 'unread'
            GROUP BY recipient ORDER BY recipient
            "#,
        )
        .bind(room)
        .fetch_all(&self.pool)
        .await?;

        Ok(RoomStatus {
            room: room.to_string(),
            total_messages: total,
            by_kind,
            by_sender,
            unread,
        })
    }
}

/// Restartable cursor over a room's message log.
///
/// Each `next_batch` yields messages not yet seen by this cursor, ordered by
/// id, and advances past them; a crashed consumer restarts from its last
/// seen id without skips or duplicates.
pub struct Tail {
    bus: Bus,
    room: String,
    next_id: i64,
    for_agent: Option<String>,
}

impl Tail {
    pub async fn next_batch(&mut self) -> Result<Vec<Message>, BusError> {
        let rows = match &self.for_agent {
            Some(agent) => {
                sqlx::query_as::<_, MessageRow>(
                    r#"
                    SELECT id, room, kind, sender, recipient, body, metadata, created_at
                    FROM messages
                    WHERE room = ? AND id >= ?
                      AND (sender = ? OR recipient = ? OR recipient = 'all')
                    ORDER BY id ASC
                    "#,
                )
                .bind(&self.room)
                .bind(self.next_id)
                .bind(agent)
                .bind(agent)
                .fetch_all(self.bus.pool())
                .await?
            }
            None => {
                sqlx::query_as::<_, MessageRow>(
                    r#"
                    SELECT id, room, kind, sender, recipient, body, metadata, created_at
                    FROM messages
                    WHERE room = ? AND id >= ?
                    ORDER BY id ASC
                    "#,
                )
                .bind(&self.room)
                .bind(self.next_id)
                .fetch_all(self.bus.pool())
                .await?
            }
        };

        if let Some(last) = rows.last() {
            self.next_id = last.id + 1;
        }

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    /// The id the next batch will start from; persist this to restart the
    /// tail after a crash.
    pub fn position(&self) -> i64 {
        self.next_id
    }
}

/// Aggregate counts for one room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomStatus {
    pub room: String,
    pub total_messages: i64,
    pub by_kind: Vec<(String, i64)>,
    pub by_sender: Vec<(String, i64)>,
    pub unread: Vec<(String, i64)>,
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: i64,
    room: String,
    kind: String,
    sender: String,
    recipient: String,
    body: String,
    metadata: String,
    created_at: String,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Message {
            id: row.id,
            room: row.room,
            kind: MessageKind::parse(&row.kind).unwrap_or(MessageKind::Message),
            sender: row.sender,
            recipient: row.recipient,
            body: row.body,
            metadata: serde_json::from_str(&row.metadata).unwrap_or(serde_json::Value::Null),
            created_at: parse_timestamp(&row.created_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct InboxRow {
    id: i64,
    room: String,
    kind: String,
    sender: String,
    recipient: String,
    body: String,
    metadata: String,
    created_at: String,
    state: String,
    delivered_at: String,
}

impl From<InboxRow> for InboxItem {
    fn from(row: InboxRow) -> Self {
        InboxItem {
            message: Message {
                id: row.id,
                room: row.room,
                kind: MessageKind::parse(&row.kind).unwrap_or(MessageKind::Message),
                sender: row.sender,
                recipient: row.recipient,
                body: row.body,
                metadata: serde_json::from_str(&row.metadata)
                    .unwrap_or(serde_json::Value::Null),
                created_at: parse_timestamp(&row.created_at),
            },
            state: ReadState::parse(&row.state),
            delivered_at: parse_timestamp(&row.delivered_at),
        }
    }
}

pub(crate) fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn temp_bus() -> (TempDir, Bus) {
        let dir = TempDir::new().unwrap();
        let bus = Bus::open(dir.path().join("bus.db")).await.unwrap();
        (dir, bus)
    }

    async fn kickoff_room(bus: &Bus) {
        bus.register("main", "lead", Role::Lead).await.unwrap();
        bus.register("main", "worker-1", Role::Worker).await.unwrap();
        bus.register("main", "worker-2", Role::Worker).await.unwrap();
    }

    #[tokio::test]
    async fn broadcast_fans_out_to_all_but_sender() {
        let (_dir, bus) = temp_bus().await;
        kickoff_room(&bus).await;

        bus.send(
            "main",
            "lead",
            BROADCAST,
            MessageKind::Broadcast,
            "kickoff",
            serde_json::json!({}),
        )
        .await
        .unwrap();

        assert_eq!(bus.unread_count("main", "worker-1").await.unwrap(), 1);
        assert_eq!(bus.unread_count("main", "worker-2").await.unwrap(), 1);
        assert_eq!(bus.unread_count("main", "lead").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn direct_send_produces_one_mailbox_row() {
        let (_dir, bus) = temp_bus().await;
        kickoff_room(&bus).await;

        bus.send(
            "main",
            "lead",
            "worker-1",
            MessageKind::Task,
            "do the thing",
            serde_json::json!({}),
        )
        .await
        .unwrap();

        assert_eq!(bus.unread_count("main", "worker-1").await.unwrap(), 1);
        assert_eq!(bus.unread_count("main", "worker-2").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn mark_read_is_idempotent_and_private() {
        let (_dir, bus) = temp_bus().await;
        kickoff_room(&bus).await;

        bus.send(
            "main",
            "lead",
            BROADCAST,
            MessageKind::Broadcast,
            "kickoff",
            serde_json::json!({}),
        )
        .await
        .unwrap();

        let items = bus.inbox("worker-1", true, true).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(bus.unread_count("main", "worker-1").await.unwrap(), 0);

        // worker-2's read state is untouched by worker-1's mark-read
        assert_eq!(bus.unread_count("main", "worker-2").await.unwrap(), 1);

        // marking again is a no-op, never an error
        bus.mark_read("main", "worker-1", items[0].message.id)
            .await
            .unwrap();
        assert_eq!(bus.unread_count("main", "worker-1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn tail_is_ordered_and_restartable_without_gaps() {
        let (_dir, bus) = temp_bus().await;
        kickoff_room(&bus).await;

        let mut sent = Vec::new();
        for i in 0..5 {
            let id = bus
                .send(
                    "main",
                    "lead",
                    BROADCAST,
                    MessageKind::Status,
                    &format!("update {i}"),
                    serde_json::json!({}),
                )
                .await
                .unwrap();
            sent.push(id);
        }

        let mut tail = bus.tail("main", 0, None);
        let first = tail.next_batch().await.unwrap();
        assert_eq!(first.len(), 5);
        let ids: Vec<i64> = first.iter().map(|m| m.id).collect();
        assert_eq!(ids, sent);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));

        // nothing new: empty batch, no duplicates
        assert!(tail.next_batch().await.unwrap().is_empty());

        // new message arrives only in the next batch, exactly once
        let id6 = bus
            .send(
                "main",
                "lead",
                BROADCAST,
                MessageKind::Status,
                "update 5",
                serde_json::json!({}),
            )
            .await
            .unwrap();
        let second = tail.next_batch().await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, id6);

        // a restarted tail from a persisted position sees the same suffix
        let mut restarted = bus.tail("main", id6, None);
        let replay = restarted.next_batch().await.unwrap();
        assert_eq!(replay.len(), 1);
        assert_eq!(replay[0].id, id6);
    }

    #[tokio::test]
    async fn tail_filters_to_agent_including_broadcast() {
        let (_dir, bus) = temp_bus().await;
        kickoff_room(&bus).await;

        bus.send("main", "lead", "worker-1", MessageKind::Task, "a", serde_json::json!({}))
            .await
            .unwrap();
        bus.send("main", "lead", "worker-2", MessageKind::Task, "b", serde_json::json!({}))
            .await
            .unwrap();
        bus.send("main", "lead", BROADCAST, MessageKind::Broadcast, "c", serde_json::json!({}))
            .await
            .unwrap();

        let mut tail = bus.tail("main", 0, Some("worker-1"));
        let msgs = tail.next_batch().await.unwrap();
        let bodies: Vec<&str> = msgs.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn unknown_room_and_agent_are_errors() {
        let (_dir, bus) = temp_bus().await;

        let err = bus
            .send("nowhere", "lead", BROADCAST, MessageKind::Message, "x", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::UnknownRoom(_)));

        kickoff_room(&bus).await;
        let err = bus
            .send("main", "ghost", BROADCAST, MessageKind::Message, "x", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::UnknownAgent { .. }));

        let err = bus
            .send("main", "lead", "ghost", MessageKind::Message, "x", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::UnknownAgent { .. }));
    }

    #[tokio::test]
    async fn system_sender_is_auto_registered() {
        let (_dir, bus) = temp_bus().await;
        kickoff_room(&bus).await;

        bus.send(
            "main",
            SYSTEM_SENDER,
            BROADCAST,
            MessageKind::System,
            "supervisor online",
            serde_json::json!({}),
        )
        .await
        .unwrap();

        let members = bus.members("main").await.unwrap();
        assert!(members
            .iter()
            .any(|(agent, role)| agent == SYSTEM_SENDER && *role == Role::System));
    }

    #[tokio::test]
    async fn deactivated_member_is_excluded_from_fanout() {
        let (_dir, bus) = temp_bus().await;
        kickoff_room(&bus).await;

        bus.deactivate("main", "worker-2").await.unwrap();
        bus.send(
            "main",
            "lead",
            BROADCAST,
            MessageKind::Broadcast,
            "kickoff",
            serde_json::json!({}),
        )
        .await
        .unwrap();

        assert_eq!(bus.unread_count("main", "worker-1").await.unwrap(), 1);
        assert_eq!(bus.unread_count("main", "worker-2").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn register_is_idempotent_upsert() {
        let (_dir, bus) = temp_bus().await;
        bus.register("main", "lead", Role::Lead).await.unwrap();
        bus.register("main", "lead", Role::Lead).await.unwrap();

        bus.deactivate("main", "lead").await.unwrap();
        bus.register("main", "lead", Role::Lead).await.unwrap();

        let members = bus.members("main").await.unwrap();
        assert_eq!(members.len(), 1);
    }

    #[tokio::test]
    async fn status_aggregates_counts() {
        let (_dir, bus) = temp_bus().await;
        kickoff_room(&bus).await;

        bus.send("main", "lead", BROADCAST, MessageKind::Task, "t", serde_json::json!({}))
            .await
            .unwrap();
        bus.send("main", "worker-1", "lead", MessageKind::Status, "s", serde_json::json!({}))
            .await
            .unwrap();

        let status = bus.status("main").await.unwrap();
        assert_eq!(status.total_messages, 2);
        assert!(status.by_kind.contains(&("task".to_string(), 1)));
        assert!(status.by_kind.contains(&("status".to_string(), 1)));
        assert!(status.by_sender.contains(&("lead".to_string(), 1)));
    }
}
