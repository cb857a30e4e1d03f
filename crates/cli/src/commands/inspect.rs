//! `mnemo inspect` - Memory projection of one session.

use chrono::Utc;
use mnemo_agent::SessionMemoryInfo;
use mnemo_core::session::SessionId;

pub async fn run(user_id: &str, session_id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let services = super::build_services().await?;
    let session = services
        .store
        .get_session(&services.config.app_name, user_id, &SessionId::from(session_id))
        .await?
        .ok_or_else(|| format!("Session {session_id} not found for user {user_id}"))?;

    let info = SessionMemoryInfo::from_session(&session, &services.estimator, Utc::now());
    println!("{}", serde_json::to_string_pretty(&info)?);

    Ok(())
}
