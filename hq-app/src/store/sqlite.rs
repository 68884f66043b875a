use super::Store;
use crate::models::{
    AuditEntry, DecideOutcome, DecisionRecord, Job, JobStatus, JobUpdate, Message, NewAuditEntry,
    NewJob, NewMessage, NewNotification, NewProposal, Notification, NotificationQuery, Proposal,
    ProposalStatus, Thread,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS threads (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    thread_id TEXT NOT NULL,
    role TEXT NOT NULL,
    agent TEXT,
    content TEXT NOT NULL,
    meta TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id, created_at);
CREATE TABLE IF NOT EXISTS proposals (
    id TEXT PRIMARY KEY,
    thread_id TEXT NOT NULL,
    agent TEXT NOT NULL,
    type TEXT NOT NULL,
    status TEXT NOT NULL,
    title TEXT NOT NULL,
    payload TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    decided_at TEXT,
    decision_by TEXT
);
CREATE INDEX IF NOT EXISTS idx_proposals_status ON proposals(status, created_at);
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    proposal_id TEXT,
    type TEXT NOT NULL,
    status TEXT NOT NULL,
    input TEXT NOT NULL DEFAULT '{}',
    output TEXT NOT NULL DEFAULT '{}',
    error TEXT,
    created_at TEXT NOT NULL,
    started_at TEXT,
    finished_at TEXT
);
CREATE TABLE IF NOT EXISTS notifications (
    id TEXT PRIMARY KEY,
    recipient TEXT NOT NULL,
    type TEXT NOT NULL,
    title TEXT NOT NULL,
    body TEXT NOT NULL,
    payload TEXT NOT NULL DEFAULT '{}',
    read_at TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_notifications_recipient ON notifications(recipient, created_at);
CREATE TABLE IF NOT EXISTS audit_log (
    id TEXT PRIMARY KEY,
    actor TEXT NOT NULL,
    action TEXT NOT NULL,
    object_type TEXT NOT NULL,
    object_id TEXT,
    meta TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);
"#;

const PROPOSAL_COLUMNS: &str =
    "id, thread_id, agent, type, status, title, payload, created_at, decided_at, decision_by";
const JOB_COLUMNS: &str = "id, proposal_id, type, status, input, output, error, created_at, started_at, finished_at";
const NOTIFICATION_COLUMNS: &str =
    "id, recipient, type, title, body, payload, read_at, created_at";

/// SQLite-backed store. JSON columns are TEXT; timestamps are fixed-width
/// RFC 3339 so they sort lexicographically. Every statement runs on the
/// blocking pool so a slow disk never stalls the async workers.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| anyhow::anyhow!("create {}: {e}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| anyhow::anyhow!("open sqlite {}: {e}", path.display()))?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(path = %path.display(), journal_mode = %mode, "sqlite opened");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = db
                .lock()
                .map_err(|_| anyhow::anyhow!("sqlite connection lock poisoned"))?;
            f(&mut *conn)
        })
        .await?
    }
}

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn conversion_error(idx: usize, e: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into())
}

fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn opt_uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| Uuid::parse_str(&s).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn ts_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn opt_ts_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| conversion_error(idx, e))
    })
    .transpose()
}

fn json_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<serde_json::Value> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn enum_at<T: FromStr<Err = String>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: String| conversion_error(idx, e))
}

fn proposal_from_row(row: &Row<'_>) -> rusqlite::Result<Proposal> {
    Ok(Proposal {
        id: uuid_at(row, 0)?,
        thread_id: uuid_at(row, 1)?,
        agent: row.get(2)?,
        kind: row.get(3)?,
        status: enum_at(row, 4)?,
        title: row.get(5)?,
        payload: json_at(row, 6)?,
        created_at: ts_at(row, 7)?,
        decided_at: opt_ts_at(row, 8)?,
        decision_by: row.get(9)?,
    })
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    Ok(Job {
        id: uuid_at(row, 0)?,
        proposal_id: opt_uuid_at(row, 1)?,
        kind: row.get(2)?,
        status: enum_at(row, 3)?,
        input: json_at(row, 4)?,
        output: json_at(row, 5)?,
        error: row.get(6)?,
        created_at: ts_at(row, 7)?,
        started_at: opt_ts_at(row, 8)?,
        finished_at: opt_ts_at(row, 9)?,
    })
}

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: uuid_at(row, 0)?,
        recipient: row.get(1)?,
        kind: enum_at(row, 2)?,
        title: row.get(3)?,
        body: row.get(4)?,
        payload: json_at(row, 5)?,
        read_at: opt_ts_at(row, 6)?,
        created_at: ts_at(row, 7)?,
    })
}

fn load_proposal(db: &Connection, id: Uuid) -> rusqlite::Result<Option<Proposal>> {
    db.query_row(
        &format!("SELECT {PROPOSAL_COLUMNS} FROM proposals WHERE id = ?1"),
        params![id.to_string()],
        proposal_from_row,
    )
    .optional()
}

fn load_job(db: &Connection, id: Uuid) -> rusqlite::Result<Option<Job>> {
    db.query_row(
        &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
        params![id.to_string()],
        job_from_row,
    )
    .optional()
}

fn load_notification(db: &Connection, id: Uuid) -> rusqlite::Result<Option<Notification>> {
    db.query_row(
        &format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?1"),
        params![id.to_string()],
        notification_from_row,
    )
    .optional()
}

#[async_trait]
impl Store for SqliteStore {
    fn is_persistent(&self) -> bool {
        true
    }

    async fn ping(&self) -> Result<()> {
        self.with_conn(|db| {
            db.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
    }

    async fn ensure_thread(&self, id: Option<Uuid>, title: &str) -> Result<Thread> {
        let title = title.to_string();
        self.with_conn(move |db| {
            if let Some(id) = id {
                let existing = db
                    .query_row(
                        "SELECT id, title, created_at FROM threads WHERE id = ?1",
                        params![id.to_string()],
                        |row| {
                            Ok(Thread {
                                id: uuid_at(row, 0)?,
                                title: row.get(1)?,
                                created_at: ts_at(row, 2)?,
                            })
                        },
                    )
                    .optional()?;
                if let Some(thread) = existing {
                    return Ok(thread);
                }
            }
            let thread = Thread {
                id: id.unwrap_or_else(Uuid::new_v4),
                title,
                created_at: Utc::now(),
            };
            db.execute(
                "INSERT INTO threads (id, title, created_at) VALUES (?1, ?2, ?3)",
                params![thread.id.to_string(), thread.title, ts(thread.created_at)],
            )?;
            Ok(thread)
        })
        .await
    }

    async fn append_message(&self, message: NewMessage) -> Result<Message> {
        let row = Message {
            id: Uuid::new_v4(),
            thread_id: message.thread_id,
            role: message.role,
            agent: message.agent,
            content: message.content,
            meta: message.meta,
            created_at: Utc::now(),
        };
        self.with_conn(move |db| {
            db.execute(
                "INSERT INTO messages (id, thread_id, role, agent, content, meta, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    row.id.to_string(),
                    row.thread_id.to_string(),
                    row.role.as_str(),
                    row.agent,
                    row.content,
                    row.meta.to_string(),
                    ts(row.created_at),
                ],
            )?;
            Ok(row)
        })
        .await
    }

    async fn list_messages(&self, thread_id: Uuid) -> Result<Vec<Message>> {
        self.with_conn(move |db| {
            let mut stmt = db.prepare(
                "SELECT id, thread_id, role, agent, content, meta, created_at FROM messages
                 WHERE thread_id = ?1 ORDER BY created_at ASC, rowid ASC",
            )?;
            let rows = stmt.query_map(params![thread_id.to_string()], |row| {
                Ok(Message {
                    id: uuid_at(row, 0)?,
                    thread_id: uuid_at(row, 1)?,
                    role: enum_at(row, 2)?,
                    agent: row.get(3)?,
                    content: row.get(4)?,
                    meta: json_at(row, 5)?,
                    created_at: ts_at(row, 6)?,
                })
            })?;

            let mut results = Vec::new();
            for row in rows {
                results.push(row?);
            }
            Ok(results)
        })
        .await
    }

    async fn create_proposal(&self, proposal: NewProposal) -> Result<Proposal> {
        let row = Proposal {
            id: Uuid::new_v4(),
            thread_id: proposal.thread_id,
            agent: proposal.agent,
            kind: proposal.kind,
            status: ProposalStatus::Pending,
            title: proposal.title,
            payload: proposal.payload,
            created_at: Utc::now(),
            decided_at: None,
            decision_by: None,
        };
        self.with_conn(move |db| {
            db.execute(
                "INSERT INTO proposals (id, thread_id, agent, type, status, title, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    row.id.to_string(),
                    row.thread_id.to_string(),
                    row.agent,
                    row.kind,
                    row.status.as_str(),
                    row.title,
                    row.payload.to_string(),
                    ts(row.created_at),
                ],
            )?;
            Ok(row)
        })
        .await
    }

    async fn get_proposal(&self, id: Uuid) -> Result<Option<Proposal>> {
        self.with_conn(move |db| Ok(load_proposal(db, id)?)).await
    }

    async fn list_proposals(
        &self,
        status: ProposalStatus,
        limit: usize,
    ) -> Result<Vec<Proposal>> {
        self.with_conn(move |db| {
            let mut stmt = db.prepare(&format!(
                "SELECT {PROPOSAL_COLUMNS} FROM proposals WHERE status = ?1
                 ORDER BY created_at DESC, rowid DESC LIMIT ?2"
            ))?;
            let rows =
                stmt.query_map(params![status.as_str(), limit as i64], proposal_from_row)?;

            let mut results = Vec::new();
            for row in rows {
                results.push(row?);
            }
            Ok(results)
        })
        .await
    }

    async fn decide_proposal(&self, id: Uuid, record: &DecisionRecord) -> Result<DecideOutcome> {
        let status = record.decision.status();
        let at = ts(record.at);
        let by = record.by.clone();
        let decision = record.to_json().to_string();
        self.with_conn(move |db| {
            let updated = db.execute(
                "UPDATE proposals
                 SET status = ?2,
                     decided_at = ?3,
                     decision_by = ?4,
                     payload = json_set(
                         CASE WHEN json_valid(payload) AND json_type(payload) = 'object'
                              THEN payload ELSE '{}' END,
                         '$.decision', json(?5))
                 WHERE id = ?1 AND status = 'pending'",
                params![id.to_string(), status.as_str(), at, by, decision],
            )?;

            let current = load_proposal(db, id)?;
            Ok(match (updated, current) {
                (_, None) => DecideOutcome::NotFound,
                (1, Some(p)) => DecideOutcome::Applied(p),
                (_, Some(p)) => DecideOutcome::AlreadyDecided(p),
            })
        })
        .await
    }

    async fn create_job(&self, job: NewJob) -> Result<Job> {
        let row = Job {
            id: Uuid::new_v4(),
            proposal_id: job.proposal_id,
            kind: job.kind,
            status: JobStatus::Queued,
            input: job.input,
            output: serde_json::json!({}),
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        self.with_conn(move |db| {
            db.execute(
                "INSERT INTO jobs (id, proposal_id, type, status, input, output, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    row.id.to_string(),
                    row.proposal_id.map(|id| id.to_string()),
                    row.kind,
                    row.status.as_str(),
                    row.input.to_string(),
                    row.output.to_string(),
                    ts(row.created_at),
                ],
            )?;
            Ok(row)
        })
        .await
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        self.with_conn(move |db| Ok(load_job(db, id)?)).await
    }

    async fn update_job(&self, id: Uuid, update: &JobUpdate) -> Result<Option<Job>> {
        let update = update.clone();
        self.with_conn(move |db| {
            let tx = db.transaction()?;
            let Some(mut job) = load_job(&tx, id)? else {
                return Ok(None);
            };
            job.apply_update(&update);
            tx.execute(
                "UPDATE jobs SET status = ?2, output = ?3, error = ?4, started_at = ?5, finished_at = ?6
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    job.status.as_str(),
                    job.output.to_string(),
                    job.error,
                    job.started_at.map(ts),
                    job.finished_at.map(ts),
                ],
            )?;
            tx.commit()?;
            Ok(Some(job))
        })
        .await
    }

    async fn create_notification(&self, notification: NewNotification) -> Result<Notification> {
        let row = Notification {
            id: Uuid::new_v4(),
            recipient: notification.recipient,
            kind: notification.kind,
            title: notification.title,
            body: notification.body,
            payload: notification.payload,
            read_at: None,
            created_at: Utc::now(),
        };
        self.with_conn(move |db| {
            db.execute(
                "INSERT INTO notifications (id, recipient, type, title, body, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    row.id.to_string(),
                    row.recipient,
                    row.kind.as_str(),
                    row.title,
                    row.body,
                    row.payload.to_string(),
                    ts(row.created_at),
                ],
            )?;
            Ok(row)
        })
        .await
    }

    async fn list_notifications(&self, query: &NotificationQuery) -> Result<Vec<Notification>> {
        let recipient = query.recipient.clone();
        let unread_only = query.unread_only as i64;
        let limit = query.limit as i64;
        self.with_conn(move |db| {
            let mut stmt = db.prepare(&format!(
                "SELECT {NOTIFICATION_COLUMNS} FROM notifications
                 WHERE recipient = ?1 AND (?2 = 0 OR read_at IS NULL)
                 ORDER BY created_at DESC, rowid DESC LIMIT ?3"
            ))?;
            let rows = stmt.query_map(
                params![recipient, unread_only, limit],
                notification_from_row,
            )?;

            let mut results = Vec::new();
            for row in rows {
                results.push(row?);
            }
            Ok(results)
        })
        .await
    }

    async fn mark_notification_read(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Notification>> {
        self.with_conn(move |db| {
            db.execute(
                "UPDATE notifications SET read_at = ?2 WHERE id = ?1 AND read_at IS NULL",
                params![id.to_string(), ts(at)],
            )?;
            Ok(load_notification(db, id)?)
        })
        .await
    }

    async fn append_audit(&self, entry: NewAuditEntry) -> Result<AuditEntry> {
        let row = AuditEntry {
            id: Uuid::new_v4(),
            actor: entry.actor,
            action: entry.action,
            object_type: entry.object_type,
            object_id: entry.object_id,
            meta: entry.meta,
            created_at: Utc::now(),
        };
        self.with_conn(move |db| {
            db.execute(
                "INSERT INTO audit_log (id, actor, action, object_type, object_id, meta, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    row.id.to_string(),
                    row.actor,
                    row.action,
                    row.object_type,
                    row.object_id,
                    row.meta.to_string(),
                    ts(row.created_at),
                ],
            )?;
            Ok(row)
        })
        .await
    }

    async fn list_audit(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        self.with_conn(move |db| {
            let mut stmt = db.prepare(
                "SELECT id, actor, action, object_type, object_id, meta, created_at FROM audit_log
                 ORDER BY created_at DESC, rowid DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit as i64], |row| {
                Ok(AuditEntry {
                    id: uuid_at(row, 0)?,
                    actor: row.get(1)?,
                    action: row.get(2)?,
                    object_type: row.get(3)?,
                    object_id: row.get(4)?,
                    meta: json_at(row, 5)?,
                    created_at: ts_at(row, 6)?,
                })
            })?;

            let mut results = Vec::new();
            for row in rows {
                results.push(row?);
            }
            Ok(results)
        })
        .await
    }
}
