//! Background workflows.
//!
//! The only long-lived task today is the retention sweep: sessions idle past
//! the configured horizon get a final summary and are then deleted.

pub mod reaper;

pub use reaper::{RetentionReaper, SweepStats};
