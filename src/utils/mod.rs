//! Utilities module for logging, errors, and formatting helpers

pub mod error;
pub mod logging;

// Re-export main types for convenience
pub use error::{Result, XrayError};
pub use logging::init_logging;

/// Format a duration given in milliseconds in a human-readable way
pub fn format_millis(millis: f64) -> String {
    if millis < 1000.0 {
        format!("{:.1} ms", millis)
    } else {
        format!("{:.2} s", millis / 1000.0)
    }
}

/// Render a fraction in [0, 1] as a fixed-width text progress bar
pub fn format_progress_bar(progress: f64, width: usize) -> String {
    let progress = progress.clamp(0.0, 1.0);
    let filled = (progress * width as f64).round() as usize;
    let empty = width.saturating_sub(filled);

    format!("[{}{}]", "█".repeat(filled), "░".repeat(empty))
}
