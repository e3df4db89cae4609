use std::time::Duration;
use time::OffsetDateTime;

/// Pretty format a `Duration` like `3h 07m`, `12m 05s`, or `42s`.
pub fn fmt_duration(d: Duration) -> String {
    let total = d.as_secs();
    let (h, rem) = (total / 3600, total % 3600);
    let (m, s) = (rem / 60, rem % 60);
    if h > 0 {
        format!("{h}h {m:02}m")
    } else if m > 0 {
        format!("{m}m {s:02}s")
    } else if total == 0 && d.subsec_millis() > 0 {
        format!("{}ms", d.subsec_millis())
    } else {
        format!("{s}s")
    }
}

/// Truncates to the start of the UTC hour.
pub fn floor_to_hour(ts: OffsetDateTime) -> OffsetDateTime {
    let unix = ts.unix_timestamp();
    OffsetDateTime::from_unix_timestamp(unix - unix.rem_euclid(3600)).unwrap_or(ts)
}
