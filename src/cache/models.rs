use serde::Serialize;

/// Outcome of recording one hit against a counter window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowHit {
    /// Number of hits observed in the current window, this one included.
    pub count: u32,
    /// Milliseconds until the window ends, never negative.
    pub reset_ms: u64,
}

/// One logical row of the shared counter table, as observed by `peek`.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitCounter {
    pub key: String,
    pub count: u32,
    pub reset_ms: u64,
}
