//! Event log → speaker-labelled transcript.

use mnemo_core::session::Event;

/// Label for lines spoken by the end user.
pub const CUSTOMER_LABEL: &str = "Customer";

/// Render events as one `Label: text` line per event with usable text.
///
/// Sentinel and whitespace-only parts are dropped; an event left with no
/// usable text produces no line. Returns `""` when nothing is usable.
pub fn to_transcript(events: &[Event]) -> String {
    events
        .iter()
        .filter_map(|event| {
            let text = event.usable_text()?;
            Some(if event.is_from_user() {
                format!("{CUSTOMER_LABEL}: {text}")
            } else {
                format!("Agent ({}): {text}", event.author)
            })
        })
        .collect::<Vec<_>>()
        .join("\n")
}
