use std::time::{SystemTime, UNIX_EPOCH};

/// Get current timestamp in milliseconds since epoch
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Absolute change of `current` relative to `reference`.
/// `None` when the reference is zero or either side is not finite.
pub fn relative_change(reference: f64, current: f64) -> Option<f64> {
    if reference == 0.0 || !reference.is_finite() || !current.is_finite() {
        return None;
    }
    Some((current - reference).abs() / reference.abs())
}

/// Round to three decimals for reports.
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
