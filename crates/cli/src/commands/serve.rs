//! `mnemo serve` - HTTP gateway plus background retention reaper.

use mnemo_gateway::GatewayState;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub async fn run(port_override: Option<u16>, no_reaper: bool) -> Result<(), Box<dyn std::error::Error>> {
    let services = super::build_services().await?;
    let config = &services.config;
    let port = port_override.unwrap_or(config.gateway.port);
    let reaper_enabled = config.retention.enabled && !no_reaper;

    println!("Mnemo Gateway");
    println!("   Listening: {}:{}", config.gateway.host, port);
    println!("   Store:     {}", services.store.name());
    println!(
        "   Reaper:    {}",
        if reaper_enabled {
            format!(
                "every {}s, TTL {} days",
                config.retention.sweep_interval_secs, config.retention.ttl_days
            )
        } else {
            "disabled".into()
        }
    );

    let shutdown = CancellationToken::new();

    let reaper_handle = reaper_enabled.then(|| {
        services.reaper.clone().spawn(
            Duration::from_secs(config.retention.sweep_interval_secs),
            Duration::from_secs(config.retention.startup_delay_secs),
            shutdown.child_token(),
        )
    });

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
        }
        signal.cancel();
    });

    let state = Arc::new(GatewayState::new(
        services.processor.clone(),
        services.reaper.clone(),
        services.estimator,
        config.gateway.admin_token.clone(),
    ));
    let served = mnemo_gateway::serve(state, &config.gateway.host, port, shutdown.clone()).await;

    shutdown.cancel();
    if let Some(handle) = reaper_handle {
        handle.await?;
    }

    served
}
