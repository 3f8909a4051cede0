//! Time formatting helpers.

/// Format a duration in seconds to a human-readable string, e.g. `"4m 30s"`.
///
/// Used when logging voting time limits.
pub fn format_duration(secs: u64) -> String {
    match secs {
        0..=59 => format!("{secs}s"),
        60..=3599 => {
            let (m, s) = (secs / 60, secs % 60);
            if s == 0 {
                format!("{m}m")
            } else {
                format!("{m}m {s}s")
            }
        }
        _ => format!("{}h {}m", secs / 3600, (secs % 3600) / 60),
    }
}
