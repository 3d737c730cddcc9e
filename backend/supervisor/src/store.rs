use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use stepforge_core::{
    EventType, PersistenceStore, Session, SessionFilter, SessionId, Step, StepKind, StreamEvent,
};

/// SQLite-backed store for sessions, their steps, and their stream events.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the store at the given path.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        info!(path = %path, "Session store opened");
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory SQLite")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.lock().execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                body TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);
            CREATE INDEX IF NOT EXISTS idx_sessions_agent ON sessions(agent_id);

            CREATE TABLE IF NOT EXISTS steps (
                session_id TEXT NOT NULL,
                idx INTEGER NOT NULL,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                PRIMARY KEY (session_id, idx)
            );

            CREATE TABLE IF NOT EXISTS events (
                session_id TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                type TEXT NOT NULL,
                data TEXT NOT NULL,
                terminal INTEGER NOT NULL,
                PRIMARY KEY (session_id, sequence)
            );",
        )?;
        Ok(())
    }

    /// Count persisted events for a session.
    pub fn event_count(&self, session_id: &SessionId) -> Result<u64> {
        let count: i64 = self.conn.lock().query_row(
            "SELECT COUNT(*) FROM events WHERE session_id = ?1",
            params![session_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

fn kind_from_str(s: &str) -> Result<StepKind> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .with_context(|| format!("Unknown step kind '{s}'"))
}

fn event_type_from_str(s: &str) -> Result<EventType> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .with_context(|| format!("Unknown event type '{s}'"))
}

fn row_to_event(
    sequence: i64,
    event_type: &str,
    data: &str,
    terminal: bool,
) -> Result<StreamEvent> {
    Ok(StreamEvent {
        sequence: sequence as u64,
        event_type: event_type_from_str(event_type)?,
        data: serde_json::from_str(data)?,
        terminal,
    })
}

impl PersistenceStore for SqliteStore {
    /// Upsert a session. A row already in a terminal status is left as is.
    fn save_session(&self, session: &Session) -> Result<()> {
        let body = serde_json::to_string(session)?;
        self.conn.lock().execute(
            "INSERT INTO sessions (id, agent_id, status, created_at, body)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET status = excluded.status, body = excluded.body
             WHERE sessions.status NOT IN ('completed', 'failed', 'cancelled', 'timed_out')",
            params![
                session.id.to_string(),
                session.agent_id,
                session.status.as_str(),
                session.created_at.to_rfc3339(),
                body,
            ],
        )?;
        Ok(())
    }

    fn load_session(&self, id: &SessionId) -> Result<Option<Session>> {
        let body: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT body FROM sessions WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        body.map(|b| serde_json::from_str(&b).context("Corrupt session record"))
            .transpose()
    }

    fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<Session>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT body FROM sessions
             WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR agent_id = ?2)
             ORDER BY created_at DESC
             LIMIT ?3",
        )?;
        let limit = filter.limit.map(|l| l as i64).unwrap_or(-1);
        let rows = stmt.query_map(
            params![filter.status.map(|s| s.as_str()), filter.agent_id, limit],
            |row| row.get::<_, String>(0),
        )?;

        let mut sessions = Vec::new();
        for body in rows {
            sessions.push(serde_json::from_str(&body?).context("Corrupt session record")?);
        }
        Ok(sessions)
    }

    fn append_step(&self, session_id: &SessionId, step: &Step) -> Result<()> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO steps (session_id, idx, kind, payload, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    session_id.to_string(),
                    step.index as i64,
                    step.kind.as_str(),
                    serde_json::to_string(&step.payload)?,
                    step.timestamp.to_rfc3339(),
                ],
            )
            .with_context(|| format!("Failed to append step {} for {session_id}", step.index))?;
        Ok(())
    }

    fn load_steps(&self, session_id: &SessionId) -> Result<Vec<Step>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT idx, kind, payload, timestamp FROM steps
             WHERE session_id = ?1 ORDER BY idx ASC",
        )?;
        let rows = stmt.query_map(params![session_id.to_string()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut steps = Vec::new();
        for row in rows {
            let (index, kind, payload, timestamp) = row?;
            steps.push(Step {
                session_id: *session_id,
                index: index as u64,
                kind: kind_from_str(&kind)?,
                payload: serde_json::from_str(&payload)?,
                timestamp: chrono::DateTime::parse_from_rfc3339(&timestamp)?
                    .with_timezone(&chrono::Utc),
            });
        }
        Ok(steps)
    }

    fn append_event(&self, session_id: &SessionId, event: &StreamEvent) -> Result<()> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO events (session_id, sequence, type, data, terminal)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    session_id.to_string(),
                    event.sequence as i64,
                    event.event_type.to_string(),
                    serde_json::to_string(&event.data)?,
                    event.terminal,
                ],
            )
            .with_context(|| {
                format!("Failed to append event {} for {session_id}", event.sequence)
            })?;
        Ok(())
    }

    fn load_log(&self, session_id: &SessionId, from_sequence: u64) -> Result<Vec<StreamEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT sequence, type, data, terminal FROM events
             WHERE session_id = ?1 AND sequence > ?2 ORDER BY sequence ASC",
        )?;
        let rows = stmt.query_map(
            params![
                session_id.to_string(),
                i64::try_from(from_sequence).unwrap_or(i64::MAX)
            ],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, bool>(3)?,
                ))
            },
        )?;

        let mut events = Vec::new();
        for row in rows {
            let (sequence, event_type, data, terminal) = row?;
            events.push(row_to_event(sequence, &event_type, &data, terminal)?);
        }
        Ok(events)
    }

    fn last_event(&self, session_id: &SessionId) -> Result<Option<StreamEvent>> {
        let row = self
            .conn
            .lock()
            .query_row(
                "SELECT sequence, type, data, terminal FROM events
                 WHERE session_id = ?1 ORDER BY sequence DESC LIMIT 1",
                params![session_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, bool>(3)?,
                    ))
                },
            )
            .optional()?;
        row.map(|(sequence, event_type, data, terminal)| {
            row_to_event(sequence, &event_type, &data, terminal)
        })
        .transpose()
    }
}
