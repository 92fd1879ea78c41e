//! Human-readable formatting for sizes and archive timestamps.

use chrono::{DateTime, Utc};

/// Format a byte count with binary prefixes and one decimal, e.g. `1.5KB`.
/// Counts below one kibibyte are printed as-is.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["K", "M", "G", "T", "P", "E"];

    for (idx, unit) in UNITS.iter().enumerate().rev() {
        let factor = 1u64 << ((idx as u32 + 1) * 10);
        if bytes >= factor {
            return format!("{:.1}{}B", bytes as f64 / factor as f64, unit);
        }
    }

    format!("{}B", bytes)
}

/// Format an epoch timestamp the way archive listings show it (UTC).
pub fn format_timestamp(epoch_secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(epoch_secs, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| epoch_secs.to_string())
}
