//! Small formatting helpers for log messages.

const BYTE_UNITS: [(u64, &str); 6] = [
    (1 << 50, "PB"),
    (1 << 40, "TB"),
    (1 << 30, "GB"),
    (1 << 20, "MB"),
    (1 << 10, "kB"),
    (1, "bytes"),
];

/// Render a byte count with a binary unit, e.g. `28.6 MB`
pub fn humanize_bytes(value: u64, precision: usize) -> String {
    if value == 1 {
        return "1 byte".to_string();
    }
    for (factor, suffix) in BYTE_UNITS {
        if value >= factor {
            return format!("{:.*} {}", precision, value as f64 / factor as f64, suffix);
        }
    }
    "0 bytes".to_string()
}

/// Rows per second over `seconds`, e.g. `1250 entries per second`
pub fn format_rate(count: u64, seconds: f64) -> String {
    let rate = if seconds > 0.0 {
        (count as f64 / seconds) as u64
    } else {
        count
    };
    let noun = if rate == 1 { "entry" } else { "entries" };
    format!("{rate} {noun} per second")
}
