//! In-memory session store - useful for testing and ephemeral deployments.

use async_trait::async_trait;
use chrono::Utc;
use mnemo_core::error::StoreError;
use mnemo_core::session::{Event, Session, SessionId, SessionState};
use mnemo_core::store::{SessionStore, StateMutation};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

type SessionKey = (String, String, String);
type UserKey = (String, String);

#[derive(Default)]
struct Inner {
    sessions: HashMap<SessionKey, Session>,
    user_state: HashMap<UserKey, Map<String, Value>>,
}

impl Inner {
    /// A copy of the session with user-scoped state merged in.
    fn view(&self, session: &Session, with_events: bool) -> Session {
        let mut out = if with_events {
            session.clone()
        } else {
            Session {
                events: Vec::new(),
                ..session.clone()
            }
        };
        if let Some(user) = self
            .user_state
            .get(&(session.app_name.clone(), session.user_id.clone()))
        {
            out.state.merge_user_scope(user);
        }
        out
    }
}

/// A session store that keeps everything behind a single `RwLock`.
pub struct InMemorySessionStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }

    /// Insert a fully-formed session as-is, keeping its timestamps.
    ///
    /// User-scoped keys in its state are moved to the user scope.
    pub async fn import_session(&self, session: Session) {
        let mut inner = self.inner.write().await;
        let Session {
            id,
            app_name,
            user_id,
            events,
            state,
            created_at,
            last_update_time,
        } = session;

        let (session_state, user_state) = state.split_scopes();
        if !user_state.is_empty() {
            inner
                .user_state
                .entry((app_name.clone(), user_id.clone()))
                .or_default()
                .extend(user_state);
        }

        let key = (app_name.clone(), user_id.clone(), id.0.clone());
        inner.sessions.insert(
            key,
            Session {
                id,
                app_name,
                user_id,
                events,
                state: SessionState::from_map(session_state),
                created_at,
                last_update_time,
            },
        );
    }

    /// Number of stored sessions across all apps and users.
    pub async fn len(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.sessions.is_empty()
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

fn key(app_name: &str, user_id: &str, session_id: &SessionId) -> SessionKey {
    (app_name.into(), user_id.into(), session_id.0.clone())
}

fn not_found(user_id: &str, session_id: &SessionId) -> StoreError {
    StoreError::NotFound {
        user_id: user_id.into(),
        session_id: session_id.0.clone(),
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    fn name(&self) -> &str {
        "in_memory"
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

        let mut inner = self.inner.write().await;
        let k = key(app_name, user_id, &session.id);
        if inner.sessions.contains_key(&k) {
            return Err(StoreError::Storage(format!(
                "session {} already exists",
                session.id
            )));
        }

        let (session_state, user_state) = state.split_scopes();
        if !user_state.is_empty() {
            inner
                .user_state
                .entry((app_name.into(), user_id.into()))
                .or_default()
                .extend(user_state);
        }
        session.state = SessionState::from_map(session_state);

        let view = inner.view(&session, true);
        inner.sessions.insert(k, session);
        Ok(view)
    }

    async fn get_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &SessionId,
    ) -> Result<Option<Session>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .sessions
            .get(&key(app_name, user_id, session_id))
            .map(|s| inner.view(s, true)))
    }

    async fn list_sessions(
        &self,
        app_name: &str,
        user_id: Option<&str>,
    ) -> Result<Vec<Session>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .sessions
            .values()
            .filter(|s| s.app_name == app_name)
            .filter(|s| user_id.is_none_or(|u| s.user_id == u))
            .map(|s| inner.view(s, false))
            .collect())
    }

    async fn delete_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &SessionId,
    ) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .sessions
            .remove(&key(app_name, user_id, session_id));
        Ok(())
    }

    async fn append_event(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &SessionId,
        event: Event,
    ) -> Result<Session, StoreError> {
        let mut inner = self.inner.write().await;
        let session = inner
            .sessions
            .get_mut(&key(app_name, user_id, session_id))
            .ok_or_else(|| not_found(user_id, session_id))?;
        session.events.push(event);
        session.last_update_time = Utc::now();
        let snapshot = session.clone();
        Ok(inner.view(&snapshot, true))
    }

    async fn update_state(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &SessionId,
        mutation: StateMutation,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let k = key(app_name, user_id, session_id);
        let user_key = (app_name.to_string(), user_id.to_string());

        let current = inner
            .sessions
            .get(&k)
            .ok_or_else(|| not_found(user_id, session_id))?;
        let mut state = inner.view(current, false).state;

        if !mutation(&mut state) {
            return Ok(false);
        }

        let (session_state, user_state) = state.split_scopes();
        inner.user_state.insert(user_key, user_state);
        if let Some(session) = inner.sessions.get_mut(&k) {
            session.state = SessionState::from_map(session_state);
            session.last_update_time = Utc::now();
        }
        Ok(true)
    }
}
