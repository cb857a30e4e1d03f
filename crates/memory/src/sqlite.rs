//! SQLite session store.
//!
//! Uses a single SQLite database file with three tables:
//! - `sessions` - one row per conversation, with session-scoped state as JSON
//! - `events` - the append-only event log, ordered by an integer rowid
//! - `user_state` - user-scoped (`user:`-prefixed) state shared by a user's sessions
//!
//! Writes are serialized through one in-process lock and run inside a
//! transaction, so `update_state` is an atomic read-modify-write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mnemo_core::error::StoreError;
use mnemo_core::session::{Event, Part, Session, SessionId, SessionState};
use mnemo_core::store::{SessionStore, StateMutation};
use serde_json::{Map, Value};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// A durable session store backed by SQLite.
pub struct SqliteSessionStore {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl SqliteSessionStore {
    /// Open (or create) a store at `path`.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database (useful for tests).
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        // An in-memory database lives and dies with its connection.
        let ephemeral = path.contains(":memory:");
        let mut pool_options = SqlitePoolOptions::new().max_connections(if ephemeral {
            1
        } else {
            4
        });
        if ephemeral {
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self::from_pool(pool).await?;
        info!("SQLite session store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self {
            pool,
            write_lock: Mutex::new(()),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run schema migrations - creates tables and indexes.
    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                app_name         TEXT NOT NULL,
                user_id          TEXT NOT NULL,
                id               TEXT NOT NULL,
                state            TEXT NOT NULL DEFAULT '{}',
                created_at       TEXT NOT NULL,
                last_update_time TEXT NOT NULL,
                PRIMARY KEY (app_name, user_id, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("sessions table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                iid        INTEGER PRIMARY KEY AUTOINCREMENT,
                app_name   TEXT NOT NULL,
                user_id    TEXT NOT NULL,
                session_id TEXT NOT NULL,
                id         TEXT NOT NULL,
                author     TEXT NOT NULL,
                content    TEXT NOT NULL DEFAULT '[]',
                timestamp  TEXT NOT NULL,
                FOREIGN KEY (app_name, user_id, session_id)
                    REFERENCES sessions(app_name, user_id, id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("events table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_state (
                app_name TEXT NOT NULL,
                user_id  TEXT NOT NULL,
                state    TEXT NOT NULL DEFAULT '{}',
                PRIMARY KEY (app_name, user_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("user_state table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_events_session ON events(app_name, user_id, session_id, iid)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("events index: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sessions_updated ON sessions(app_name, last_update_time DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("sessions index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    /// Insert a fully-formed session as-is, keeping its timestamps and events.
    pub async fn import_session(&self, session: Session) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.begin().await?;

        let (session_state, user_state) = session.state.clone().split_scopes();
        insert_session_row(
            &mut tx,
            &session,
            &Value::Object(session_state).to_string(),
        )
        .await?;
        if !user_state.is_empty() {
            let mut merged = load_user_state(&mut tx, &session.app_name, &session.user_id).await?;
            merged.extend(user_state);
            save_user_state(&mut tx, &session.app_name, &session.user_id, merged).await?;
        }
        for event in &session.events {
            insert_event(&mut tx, &session.app_name, &session.user_id, &session.id, event).await?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("COMMIT failed: {e}")))
    }

    async fn begin(&self) -> Result<Transaction<'static, Sqlite>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("BEGIN failed: {e}")))
    }

    async fn load_events(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &SessionId,
    ) -> Result<Vec<Event>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, author, content, timestamp FROM events
            WHERE app_name = ?1 AND user_id = ?2 AND session_id = ?3
            ORDER BY iid ASC
            "#,
        )
        .bind(app_name)
        .bind(user_id)
        .bind(session_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("SELECT events: {e}")))?;

        rows.iter().map(|row| row_to_event(row, session_id)).collect()
    }

    async fn user_state_map(
        &self,
        app_name: &str,
        user_id: &str,
    ) -> Result<Map<String, Value>, StoreError> {
        let row = sqlx::query("SELECT state FROM user_state WHERE app_name = ?1 AND user_id = ?2")
            .bind(app_name)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("SELECT user_state: {e}")))?;

        match row {
            Some(r) => parse_state_column(&r, "user_state"),
            None => Ok(Map::new()),
        }
    }
}

// ── Row mapping ─────────────────────────────────────────────────────────────

fn column<T>(row: &SqliteRow, name: &str) -> Result<T, StoreError>
where
    T: for<'r> sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(name)
        .map_err(|e| StoreError::QueryFailed(format!("{name} column: {e}")))
}

fn parse_time(value: &str, session_id: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            session_id: session_id.into(),
            reason: format!("bad timestamp {value:?}: {e}"),
        })
}

fn parse_state_column(row: &SqliteRow, owner: &str) -> Result<Map<String, Value>, StoreError> {
    let raw: String = column(row, "state")?;
    serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
        session_id: owner.into(),
        reason: format!("state is not a JSON object: {e}"),
    })
}

fn row_to_session(row: &SqliteRow) -> Result<Session, StoreError> {
    let id: String = column(row, "id")?;
    let state = parse_state_column(row, &id)?;
    let created_at: String = column(row, "created_at")?;
    let last_update_time: String = column(row, "last_update_time")?;

    Ok(Session {
        app_name: column(row, "app_name")?,
        user_id: column(row, "user_id")?,
        events: Vec::new(),
        state: SessionState::from_map(state),
        created_at: parse_time(&created_at, &id)?,
        last_update_time: parse_time(&last_update_time, &id)?,
        id: SessionId(id),
    })
}

fn row_to_event(row: &SqliteRow, session_id: &SessionId) -> Result<Event, StoreError> {
    let content: String = column(row, "content")?;
    let content: Vec<Part> = serde_json::from_str(&content).map_err(|e| StoreError::Corrupt {
        session_id: session_id.0.clone(),
        reason: format!("event content: {e}"),
    })?;
    let timestamp: String = column(row, "timestamp")?;

    Ok(Event {
        id: column(row, "id")?,
        author: column(row, "author")?,
        content,
        timestamp: parse_time(&timestamp, session_id.as_str())?,
    })
}

// ── Transaction helpers ─────────────────────────────────────────────────────

async fn insert_session_row(
    tx: &mut Transaction<'static, Sqlite>,
    session: &Session,
    state_json: &str,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO sessions (app_name, user_id, id, state, created_at, last_update_time)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(&session.app_name)
    .bind(&session.user_id)
    .bind(session.id.as_str())
    .bind(state_json)
    .bind(session.created_at.to_rfc3339())
    .bind(session.last_update_time.to_rfc3339())
    .execute(&mut **tx)
    .await
    .map_err(|e| StoreError::Storage(format!("INSERT session failed: {e}")))?;
    Ok(())
}

async fn insert_event(
    tx: &mut Transaction<'static, Sqlite>,
    app_name: &str,
    user_id: &str,
    session_id: &SessionId,
    event: &Event,
) -> Result<(), StoreError> {
    let content = serde_json::to_string(&event.content)
        .map_err(|e| StoreError::Storage(format!("Event serialization: {e}")))?;

    sqlx::query(
        r#"
        INSERT INTO events (app_name, user_id, session_id, id, author, content, timestamp)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(app_name)
    .bind(user_id)
    .bind(session_id.as_str())
    .bind(&event.id)
    .bind(&event.author)
    .bind(content)
    .bind(event.timestamp.to_rfc3339())
    .execute(&mut **tx)
    .await
    .map_err(|e| StoreError::Storage(format!("INSERT event failed: {e}")))?;
    Ok(())
}

async fn load_user_state(
    tx: &mut Transaction<'static, Sqlite>,
    app_name: &str,
    user_id: &str,
) -> Result<Map<String, Value>, StoreError> {
    let row = sqlx::query("SELECT state FROM user_state WHERE app_name = ?1 AND user_id = ?2")
        .bind(app_name)
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("SELECT user_state: {e}")))?;

    match row {
        Some(r) => parse_state_column(&r, "user_state"),
        None => Ok(Map::new()),
    }
}

async fn save_user_state(
    tx: &mut Transaction<'static, Sqlite>,
    app_name: &str,
    user_id: &str,
    state: Map<String, Value>,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO user_state (app_name, user_id, state) VALUES (?1, ?2, ?3)
        ON CONFLICT(app_name, user_id) DO UPDATE SET state = excluded.state
        "#,
    )
    .bind(app_name)
    .bind(user_id)
    .bind(Value::Object(state).to_string())
    .execute(&mut **tx)
    .await
    .map_err(|e| StoreError::Storage(format!("UPSERT user_state failed: {e}")))?;
    Ok(())
}

async fn touch_session(
    tx: &mut Transaction<'static, Sqlite>,
    app_name: &str,
    user_id: &str,
    session_id: &SessionId,
    state_json: Option<&str>,
) -> Result<u64, StoreError> {
    let now = Utc::now().to_rfc3339();
    let result = match state_json {
        Some(state) => sqlx::query(
            r#"
            UPDATE sessions SET state = ?4, last_update_time = ?5
            WHERE app_name = ?1 AND user_id = ?2 AND id = ?3
            "#,
        )
        .bind(app_name)
        .bind(user_id)
        .bind(session_id.as_str())
        .bind(state)
        .bind(now),
        None => sqlx::query(
            r#"
            UPDATE sessions SET last_update_time = ?4
            WHERE app_name = ?1 AND user_id = ?2 AND id = ?3
            "#,
        )
        .bind(app_name)
        .bind(user_id)
        .bind(session_id.as_str())
        .bind(now),
    }
    .execute(&mut **tx)
    .await
    .map_err(|e| StoreError::Storage(format!("UPDATE session failed: {e}")))?;

    Ok(result.rows_affected())
}

fn not_found(user_id: &str, session_id: &SessionId) -> StoreError {
    StoreError::NotFound {
        user_id: user_id.into(),
        session_id: session_id.0.clone(),
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: Option<SessionId>,
        state: SessionState,
    ) -> Result<Session, StoreError> {
        let mut session = Session::new(app_name, user_id);
        if let Some(id) = session_id {
            session.id = id;
        }
        let (session_state, user_state) = state.split_scopes();

        let _guard = self.write_lock.lock().await;
        let mut tx = self.begin().await?;

        insert_session_row(
            &mut tx,
            &session,
            &Value::Object(session_state.clone()).to_string(),
        )
        .await?;

        let mut merged_user = load_user_state(&mut tx, app_name, user_id).await?;
        if !user_state.is_empty() {
            merged_user.extend(user_state);
            save_user_state(&mut tx, app_name, user_id, merged_user.clone()).await?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("COMMIT failed: {e}")))?;

        session.state = SessionState::from_map(session_state);
        session.state.merge_user_scope(&merged_user);
        debug!(session_id = %session.id.short(), user_id, "Created session");
        Ok(session)
    }

    async fn get_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &SessionId,
    ) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query("SELECT * FROM sessions WHERE app_name = ?1 AND user_id = ?2 AND id = ?3")
            .bind(app_name)
            .bind(user_id)
            .bind(session_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("SELECT session: {e}")))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut session = row_to_session(&row)?;
        session.events = self.load_events(app_name, user_id, session_id).await?;
        let user = self.user_state_map(app_name, user_id).await?;
        session.state.merge_user_scope(&user);
        Ok(Some(session))
    }

    async fn list_sessions(
        &self,
        app_name: &str,
        user_id: Option<&str>,
    ) -> Result<Vec<Session>, StoreError> {
        let rows = match user_id {
            Some(user) => {
                sqlx::query("SELECT * FROM sessions WHERE app_name = ?1 AND user_id = ?2")
                    .bind(app_name)
                    .bind(user)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                sqlx::query("SELECT * FROM sessions WHERE app_name = ?1")
                    .bind(app_name)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(|e| StoreError::QueryFailed(format!("LIST sessions: {e}")))?;

        let user_rows = match user_id {
            Some(user) => {
                sqlx::query("SELECT * FROM user_state WHERE app_name = ?1 AND user_id = ?2")
                    .bind(app_name)
                    .bind(user)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                sqlx::query("SELECT * FROM user_state WHERE app_name = ?1")
                    .bind(app_name)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(|e| StoreError::QueryFailed(format!("LIST user_state: {e}")))?;

        let mut user_states = std::collections::HashMap::new();
        for row in &user_rows {
            let user: String = column(row, "user_id")?;
            user_states.insert(user, parse_state_column(row, "user_state")?);
        }

        rows.iter()
            .map(|row| {
                let mut session = row_to_session(row)?;
                if let Some(user) = user_states.get(&session.user_id) {
                    session.state.merge_user_scope(user);
                }
                Ok(session)
            })
            .collect()
    }

    async fn delete_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &SessionId,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("DELETE FROM sessions WHERE app_name = ?1 AND user_id = ?2 AND id = ?3")
            .bind(app_name)
            .bind(user_id)
            .bind(session_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("DELETE failed: {e}")))?;

        debug!(
            session_id = %session_id.short(),
            removed = result.rows_affected(),
            "Deleted session"
        );
        Ok(())
    }

    async fn append_event(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &SessionId,
        event: Event,
    ) -> Result<Session, StoreError> {
        {
            let _guard = self.write_lock.lock().await;
            let mut tx = self.begin().await?;

            if touch_session(&mut tx, app_name, user_id, session_id, None).await? == 0 {
                return Err(not_found(user_id, session_id));
            }
            insert_event(&mut tx, app_name, user_id, session_id, &event).await?;

            tx.commit()
                .await
                .map_err(|e| StoreError::Storage(format!("COMMIT failed: {e}")))?;
        }

        self.get_session(app_name, user_id, session_id)
            .await?
            .ok_or_else(|| not_found(user_id, session_id))
    }

    async fn update_state(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &SessionId,
        mutation: StateMutation,
    ) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.begin().await?;

        let row = sqlx::query("SELECT state FROM sessions WHERE app_name = ?1 AND user_id = ?2 AND id = ?3")
            .bind(app_name)
            .bind(user_id)
            .bind(session_id.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("SELECT state: {e}")))?
            .ok_or_else(|| not_found(user_id, session_id))?;

        let mut state = SessionState::from_map(parse_state_column(&row, session_id.as_str())?);
        let user = load_user_state(&mut tx, app_name, user_id).await?;
        state.merge_user_scope(&user);

        if !mutation(&mut state) {
            // Dropping the transaction rolls it back.
            return Ok(false);
        }

        let (session_state, user_state) = state.split_scopes();
        touch_session(
            &mut tx,
            app_name,
            user_id,
            session_id,
            Some(&Value::Object(session_state).to_string()),
        )
        .await?;
        save_user_state(&mut tx, app_name, user_id, user_state).await?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("COMMIT failed: {e}")))?;
        Ok(true)
    }
}
