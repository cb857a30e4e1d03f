//! SessionStore trait - the durable session store contract.
//!
//! The memory subsystem only relies on list/get/delete plus two write paths:
//! appending an event and an atomic read-modify-write of the state map.
//!
//! Implementations: SQLite, in-memory (for testing).

use crate::error::StoreError;
use crate::session::{Event, Session, SessionId, SessionState};
use async_trait::async_trait;

/// A state mutation applied under the store's per-session write lock.
///
/// Returns `true` if it changed anything; the store only persists and bumps
/// `last_update_time` in that case.
pub type StateMutation = Box<dyn FnOnce(&mut SessionState) -> bool + Send>;

/// The core SessionStore trait.
///
/// State keys prefixed with `user:` are stored once per `(app_name, user_id)`
/// and merged into every session of that user on read.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    /// Create a new session. A fresh id is generated when `session_id` is `None`.
    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: Option<SessionId>,
        state: SessionState,
    ) -> Result<Session, StoreError>;

    /// Load a session with its full event log.
    async fn get_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &SessionId,
    ) -> Result<Option<Session>, StoreError>;

    /// List sessions with their state but without events.
    ///
    /// `user_id = None` lists across all users.
    async fn list_sessions(
        &self,
        app_name: &str,
        user_id: Option<&str>,
    ) -> Result<Vec<Session>, StoreError>;

    /// Delete a session. Deleting a missing session is not an error.
    async fn delete_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &SessionId,
    ) -> Result<(), StoreError>;

    /// Append one event and return the updated session.
    async fn append_event(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &SessionId,
        event: Event,
    ) -> Result<Session, StoreError>;

    /// Atomically read, mutate and write a session's state.
    async fn update_state(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &SessionId,
        mutation: StateMutation,
    ) -> Result<bool, StoreError>;
}
