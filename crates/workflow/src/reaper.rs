//! Retention sweep for aged-out sessions.
//!
//! A session idle for longer than the TTL is finalized (summarized if it has
//! never been compacted) and then deleted. Each session is handled under its
//! own timeout so one hung provider call or store write cannot stall the
//! whole sweep.

use chrono::{DateTime, Utc};
use mnemo_agent::Summarizer;
use mnemo_core::error::StoreError;
use mnemo_core::session::{Session, keys};
use mnemo_core::store::SessionStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default upper bound on finalize + delete for a single session.
pub const DEFAULT_ITEM_TIMEOUT: Duration = Duration::from_secs(120);

/// Aggregate result of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepStats {
    /// Sessions looked at
    pub checked: usize,
    /// Sessions older than the TTL
    pub expired: usize,
    /// Expired sessions that had (or got) a conversation summary
    pub summarized: usize,
    /// Expired sessions removed from the store
    pub deleted: usize,
    /// Expired sessions whose finalize or delete failed or timed out
    pub failed: usize,
}

/// What happened to one expired session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reaped {
    Deleted { summarized: bool },
    Vanished,
}

/// Finalizes and deletes sessions idle past the retention horizon.
pub struct RetentionReaper {
    store: Arc<dyn SessionStore>,
    summarizer: Arc<Summarizer>,
    app_name: String,
    ttl: chrono::Duration,
    item_timeout: Duration,
}

impl RetentionReaper {
    pub fn new(
        store: Arc<dyn SessionStore>,
        summarizer: Arc<Summarizer>,
        app_name: impl Into<String>,
        ttl: chrono::Duration,
    ) -> Self {
        Self {
            store,
            summarizer,
            app_name: app_name.into(),
            ttl,
            item_timeout: DEFAULT_ITEM_TIMEOUT,
        }
    }

    /// Build from the `[retention]` config section.
    pub fn from_config(
        store: Arc<dyn SessionStore>,
        summarizer: Arc<Summarizer>,
        app_name: impl Into<String>,
        config: &mnemo_config::RetentionConfig,
    ) -> Self {
        Self::new(
            store,
            summarizer,
            app_name,
            chrono::Duration::days(i64::from(config.ttl_days)),
        )
        .with_item_timeout(Duration::from_secs(config.item_timeout_secs))
    }

    pub fn with_item_timeout(mut self, timeout: Duration) -> Self {
        self.item_timeout = timeout;
        self
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }

    /// Whether `session` is past the retention horizon at `now`.
    ///
    /// A session exactly at the horizon is kept.
    pub fn is_expired(&self, session: &Session, now: DateTime<Utc>) -> bool {
        session.age(now) > self.ttl
    }

    /// Run one sweep over every session of the app.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepStats {
        self.sweep_until(now, &CancellationToken::new()).await
    }

    /// Like [`sweep`](Self::sweep) but stops between sessions once `cancel`
    /// fires. A session already being finalized is finished first.
    pub async fn sweep_until(&self, now: DateTime<Utc>, cancel: &CancellationToken) -> SweepStats {
        let mut stats = SweepStats::default();

        let sessions = match self.store.list_sessions(&self.app_name, None).await {
            Ok(sessions) => sessions,
            Err(e) => {
                error!(error = %e, "Retention sweep could not list sessions");
                return stats;
            }
        };

        info!(sessions = sessions.len(), ttl_days = self.ttl.num_days(), "Retention sweep started");

        for session in sessions {
            if cancel.is_cancelled() {
                info!("Retention sweep cancelled");
                break;
            }

            stats.checked += 1;
            if !self.is_expired(&session, now) {
                continue;
            }
            stats.expired += 1;

            debug!(
                session_id = %session.id.short(),
                user_id = %session.user_id,
                age_days = session.age_days(now),
                "Session expired"
            );

            match tokio::time::timeout(self.item_timeout, self.reap(&session)).await {
                Ok(Ok(Reaped::Deleted { summarized })) => {
                    stats.deleted += 1;
                    if summarized {
                        stats.summarized += 1;
                    }
                }
                Ok(Ok(Reaped::Vanished)) => {
                    debug!(session_id = %session.id.short(), "Session already gone");
                }
                Ok(Err(e)) => {
                    stats.failed += 1;
                    warn!(session_id = %session.id.short(), error = %e, "Failed to reap session");
                }
                Err(_) => {
                    stats.failed += 1;
                    warn!(
                        session_id = %session.id.short(),
                        timeout_secs = self.item_timeout.as_secs(),
                        "Reaping session timed out"
                    );
                }
            }
        }

        info!(
            checked = stats.checked,
            expired = stats.expired,
            summarized = stats.summarized,
            deleted = stats.deleted,
            failed = stats.failed,
            "Retention sweep finished"
        );
        stats
    }

    /// Finalize then delete one expired session.
    async fn reap(&self, listed: &Session) -> Result<Reaped, StoreError> {
        let Some(session) = self
            .store
            .get_session(&self.app_name, &listed.user_id, &listed.id)
            .await?
        else {
            return Ok(Reaped::Vanished);
        };

        let summarized = self.finalize(&session).await?;

        self.store
            .delete_session(&self.app_name, &session.user_id, &session.id)
            .await?;
        info!(session_id = %session.id.short(), summarized, "Deleted expired session");

        Ok(Reaped::Deleted { summarized })
    }

    /// Make sure the conversation is summarized before it disappears.
    ///
    /// A fresh summary is kept in the user scope unless the user already has
    /// one, so it outlives the session.
    async fn finalize(&self, session: &Session) -> Result<bool, StoreError> {
        if session
            .state
            .conversation_summary()
            .is_some_and(|s| !s.is_empty())
        {
            return Ok(true);
        }
        if session.events.is_empty() {
            return Ok(false);
        }

        let summary = self.summarizer.summarize(&session.events, None).await;
        if summary.is_empty() {
            return Ok(false);
        }

        let persisted = self
            .store
            .update_state(
                &self.app_name,
                &session.user_id,
                &session.id,
                Box::new(move |state| {
                    if state.user_summary().is_some_and(|s| !s.is_empty()) {
                        return false;
                    }
                    state.set(keys::USER_SUMMARY, summary);
                    true
                }),
            )
            .await?;
        debug!(session_id = %session.id.short(), persisted, "Finalized session summary");

        Ok(true)
    }

    /// Run sweeps in the background until `cancel` fires.
    ///
    /// Waits `startup_delay`, sweeps, then sweeps again every `interval`.
    pub fn spawn(
        self: Arc<Self>,
        interval: Duration,
        startup_delay: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = interval.as_secs(),
                startup_delay_secs = startup_delay.as_secs(),
                "Retention reaper scheduled"
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Retention reaper stopped before first sweep");
                    return;
                }
                _ = tokio::time::sleep(startup_delay) => {}
            }

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.sweep_until(Utc::now(), &cancel).await;
                    }
                }
            }

            info!("Retention reaper stopped");
        })
    }
}
