//! Subcommands and the service wiring they share.

pub mod chat;
pub mod config_cmd;
pub mod inspect;
pub mod serve;
pub mod status;
pub mod sweep;

use mnemo_agent::{MemoryContextBuilder, ProviderRuntime, Summarizer, TokenEstimator, TurnProcessor};
use mnemo_config::AppConfig;
use mnemo_core::store::SessionStore;
use mnemo_memory::{InMemorySessionStore, SqliteSessionStore};
use mnemo_workflow::RetentionReaper;
use std::sync::Arc;
use tracing::warn;

/// Everything a command needs, built once from config.
pub struct Services {
    pub config: AppConfig,
    pub store: Arc<dyn SessionStore>,
    pub processor: Arc<TurnProcessor>,
    pub reaper: Arc<RetentionReaper>,
    pub estimator: TokenEstimator,
}

/// Load the config and wire the store, provider, processor and reaper.
pub async fn build_services() -> Result<Services, Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    build_services_from(config).await
}

pub async fn build_services_from(
    config: AppConfig,
) -> Result<Services, Box<dyn std::error::Error>> {
    let store = open_store(&config).await?;

    if !config.has_api_key() {
        warn!("No API key configured; replies and summaries will fail until one is set");
    }
    let provider = mnemo_providers::build_from_config(&config)
        .default()
        .ok_or("No default provider configured")?;

    let summarizer = Arc::new(Summarizer::from_config(provider.clone(), &config.memory));
    let runtime = Arc::new(ProviderRuntime::from_config(provider, &config));
    let processor = Arc::new(TurnProcessor::new(
        store.clone(),
        runtime,
        summarizer.clone(),
        MemoryContextBuilder::from_config(&config.memory),
        config.app_name.clone(),
    ));
    let reaper = Arc::new(RetentionReaper::from_config(
        store.clone(),
        summarizer,
        config.app_name.clone(),
        &config.retention,
    ));

    Ok(Services {
        estimator: TokenEstimator::new(config.memory.chars_per_token),
        config,
        store,
        processor,
        reaper,
    })
}

/// Open the configured session store backend.
pub async fn open_store(
    config: &AppConfig,
) -> Result<Arc<dyn SessionStore>, Box<dyn std::error::Error>> {
    let store: Arc<dyn SessionStore> = match config.store.backend.as_str() {
        "in_memory" => Arc::new(InMemorySessionStore::new()),
        _ => {
            let path = config.store.resolved_path();
            if let Some(parent) = std::path::Path::new(&path).parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)?;
            }
            let url = format!("sqlite://{path}");
            Arc::new(SqliteSessionStore::new(&url).await?)
        }
    };
    Ok(store)
}
