//! `mnemo chat` - Send one message through the memory lifecycle.

use mnemo_core::session::SessionId;

pub async fn run(
    user_id: &str,
    session_id: Option<String>,
    message: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let services = super::build_services().await?;

    let outcome = services
        .processor
        .process(user_id, session_id.map(SessionId::from), message)
        .await?;

    if outcome.paused {
        println!("(a human agent has taken over this conversation)");
    } else {
        println!("{}: {}", outcome.author, outcome.reply);
    }
    println!();
    println!("   Session:  {}", outcome.session_id);
    println!("   Events:   {}", outcome.event_count);
    if outcome.summarized {
        println!("   Older messages were folded into the conversation summary");
    }

    Ok(())
}
