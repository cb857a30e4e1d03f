//! `mnemo config` - Configuration management commands.

use mnemo_config::AppConfig;

pub async fn init(force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let dir = AppConfig::config_dir();
    let path = dir.join("config.toml");

    if path.exists() && !force {
        println!("Config already exists at {}", path.display());
        println!("   Use --force to overwrite");
        return Ok(());
    }

    std::fs::create_dir_all(&dir)?;
    std::fs::write(&path, AppConfig::default_toml())?;
    println!("Wrote default config to {}", path.display());
    println!("   Set MNEMO_API_KEY (or OPENROUTER_API_KEY) before serving");

    Ok(())
}

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   Config parsed successfully");

            let mut warnings = Vec::new();
            if !config.has_api_key() {
                warnings.push("No API key set (set MNEMO_API_KEY or OPENROUTER_API_KEY env var)");
            }
            if config.memory.keep_recent_events >= config.memory.summarization_threshold {
                warnings.push("keep_recent_events >= summarization_threshold; nothing will be summarized");
            }
            if config.gateway.host == "0.0.0.0" && config.gateway.admin_token.is_none() {
                warnings.push("Gateway bound to 0.0.0.0 without an admin_token");
            }

            if warnings.is_empty() {
                println!("   All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   warning: {w}");
                }
            }

            println!();
            println!("   Provider:  {}", config.default_provider);
            println!("   Model:     {}", config.default_model);
            println!("   Store:     {}", config.store.backend);
            println!("   TTL:       {} days", config.retention.ttl_days);
        }
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}
