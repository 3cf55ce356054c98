//! Small helpers shared across the crate.

/// One-line preview of a raw gateway payload for log output.
///
/// Runs of whitespace collapse into single spaces (some gateways pretty-print
/// frames) and the result is cut at `max_chars` characters, never mid code
/// point. A cut is marked with a trailing "...".
pub fn payload_preview(payload: &str, max_chars: usize) -> String {
    let flat = payload.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}
