/// Mint a fresh trace identifier for one inbound command.
///
/// Trace IDs are random v4 UUIDs and are never reused.
#[must_use]
pub fn new_trace_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Constant-time string comparison for shared secrets.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0, |acc, (x, y)| acc | (x ^ y))
        == 0
}
