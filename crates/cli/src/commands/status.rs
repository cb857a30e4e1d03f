//! `mnemo status` - Show system status.

use mnemo_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    println!("Mnemo Status");
    println!("============");
    println!("  Config dir:     {}", AppConfig::config_dir().display());
    println!("  Provider:       {}", config.default_provider);
    println!("  Reply model:    {}", config.default_model);
    println!("  Summary model:  {}", config.memory.summarization_model);
    println!("  API key:        {}", if config.has_api_key() { "set" } else { "missing" });
    println!("  Store:          {}", config.store.backend);
    if config.store.backend == "sqlite" {
        println!("  Database:       {}", config.store.resolved_path());
    }
    println!(
        "  Compaction:     every {} events, keep {} raw",
        config.memory.summarization_threshold, config.memory.keep_recent_events
    );
    println!("  Context budget: {} tokens", config.memory.max_context_tokens);
    println!(
        "  Retention:      {} days ({})",
        config.retention.ttl_days,
        if config.retention.enabled { "reaper on" } else { "reaper off" }
    );
    println!("  Gateway:        {}:{}", config.gateway.host, config.gateway.port);

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("\n  Config file found");
    } else {
        println!("\n  No config file - run `mnemo config init` first");
    }

    Ok(())
}
