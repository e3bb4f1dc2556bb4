use chrono::DateTime;

pub const STANDARD_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Epoch milliseconds to a display timestamp. Falls back to the raw number
/// for out-of-range inputs rather than failing a report over formatting.
pub fn epoch_ms_to_utc(epoch_ms: i64) -> String {
    match DateTime::from_timestamp_millis(epoch_ms) {
        Some(dt) => dt.format(STANDARD_TIME_FORMAT).to_string(),
        None => format!("{}ms", epoch_ms),
    }
}

/// Millisecond span to a compact human duration.
pub fn format_duration(ms: i64) -> String {
    const MS_IN_MIN: i64 = 60 * 1000;
    const MS_IN_H: i64 = 60 * MS_IN_MIN;
    const MS_IN_D: i64 = 24 * MS_IN_H;

    if ms >= MS_IN_D {
        format!("{:.1}d", ms as f64 / MS_IN_D as f64)
    } else if ms >= MS_IN_H {
        format!("{:.1}h", ms as f64 / MS_IN_H as f64)
    } else if ms >= MS_IN_MIN {
        format!("{:.0}m", ms as f64 / MS_IN_MIN as f64)
    } else {
        format!("{}s", ms / 1000)
    }
}
