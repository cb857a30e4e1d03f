//! Cross-session recall - carries memory into a user's new session.

use mnemo_core::session::SessionId;
use mnemo_core::store::SessionStore;
use std::sync::Arc;
use tracing::{info, warn};

/// Looks up the newest summary among a user's sessions.
pub struct CrossSessionRecall {
    store: Arc<dyn SessionStore>,
    app_name: String,
}

impl CrossSessionRecall {
    pub fn new(store: Arc<dyn SessionStore>, app_name: impl Into<String>) -> Self {
        Self {
            store,
            app_name: app_name.into(),
        }
    }

    /// The most recent non-empty summary for `user_id`, or `""`.
    ///
    /// Sessions are visited newest first; each contributes its in-session
    /// summary, falling back to its user-scoped one. `exclude` skips the
    /// session currently being served. Store failures degrade to `""`.
    pub async fn load(&self, user_id: &str, exclude: Option<&SessionId>) -> String {
        let mut sessions = match self.store.list_sessions(&self.app_name, Some(user_id)).await {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(user_id, error = %e, "Cross-session recall failed");
                return String::new();
            }
        };

        sessions.sort_by(|a, b| b.last_update_time.cmp(&a.last_update_time));

        for session in sessions
            .iter()
            .filter(|s| exclude.is_none_or(|id| &s.id != id))
        {
            let summary = session
                .state
                .conversation_summary()
                .or_else(|| session.state.user_summary());
            if let Some(summary) = summary {
                info!(
                    user_id,
                    from_session = %session.id.short(),
                    chars = summary.chars().count(),
                    "Found cross-session summary"
                );
                return summary.to_string();
            }
        }

        String::new()
    }
}
