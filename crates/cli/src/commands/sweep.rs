//! `mnemo sweep` - Run one retention sweep on demand.

use chrono::Utc;

pub async fn run(json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let services = super::build_services().await?;
    let stats = services.reaper.sweep(Utc::now()).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Retention sweep (TTL {} days)", services.config.retention.ttl_days);
    println!("   Checked:     {}", stats.checked);
    println!("   Expired:     {}", stats.expired);
    println!("   Summarized:  {}", stats.summarized);
    println!("   Deleted:     {}", stats.deleted);
    println!("   Failed:      {}", stats.failed);

    Ok(())
}
