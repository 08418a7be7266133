use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Local;

/// Returns the current UTC timestamp in milliseconds.
#[inline]
pub fn epoch_millis_utc() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before epoch")
        .as_millis() as i64
}

/// Compact local timestamp suitable for filenames: YYYYMMDD_HHMMSS.
pub fn timestamp_for_file() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Human-friendly local time for log lines: HH:MM:SS.
pub fn clock_time() -> String {
    Local::now().format("%H:%M:%S").to_string()
}
