//! Key builders for everything the platform keeps in Redis.

/// Logical identity for admission control: one counter per route scope and
/// caller address, e.g. `rejoindre:1.2.3.4`.
pub fn rate_limit_key(scope: &str, ip: &str) -> String {
    format!("{}:{}", scope, ip)
}

/// Latest-page message cache for a thread.
pub fn thread_messages_key(thread_id: &str) -> String {
    format!("msg:thread:{}", thread_id)
}
