use std::time::Duration;

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Format a timestamp as RFC 3339, the format used by every log line teebot writes.
pub fn rfc3339(datetime: OffsetDateTime) -> String {
    datetime
        .format(&Rfc3339)
        .unwrap_or_else(|_| datetime.unix_timestamp().to_string())
}

/// The current UTC time as RFC 3339.
pub fn now_rfc3339() -> String {
    rfc3339(OffsetDateTime::now_utc())
}

/// Render an uptime as `1h 2m 3s`.
pub fn format_uptime(uptime: Duration) -> String {
    let seconds = uptime.as_secs();
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{hours}h {minutes}m {secs}s")
}
