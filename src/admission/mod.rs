//! Admission control for write traffic: fixed-window counting against the
//! shared counter store, one atomic store operation per request.

use std::time::Duration;

use thiserror::Error;

use crate::cache::{CounterStore, StoreUnavailable};

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("invalid rate limit argument: {0}")]
    InvalidArgument(&'static str),
    /// Infrastructure failure, not a rate decision; the caller picks its own
    /// fail-open / fail-closed policy.
    #[error(transparent)]
    StoreUnavailable(#[from] StoreUnavailable),
}

/// What the caller is told about one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests left in the window after this one, floored at 0.
    pub remaining: u32,
    /// Milliseconds until the window ends.
    pub reset_ms: u64,
}

/// Stateless rate-limiter logic. All cross-process coordination lives in the
/// store; any number of server instances can share one `CounterStore`.
#[derive(Clone)]
pub struct AdmissionController<S> {
    store: S,
}

impl<S: CounterStore> AdmissionController<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub async fn check_rate(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<RateDecision, AdmissionError> {
        if key.is_empty() {
            return Err(AdmissionError::InvalidArgument("key must not be empty"));
        }
        if limit < 1 {
            return Err(AdmissionError::InvalidArgument("limit must be at least 1"));
        }
        if window < Duration::from_secs(1) {
            return Err(AdmissionError::InvalidArgument(
                "window must be at least one second",
            ));
        }

        let hit = self.store.hit(key, window).await?;

        Ok(RateDecision {
            allowed: hit.count <= limit,
            remaining: limit.saturating_sub(hit.count),
            reset_ms: hit.reset_ms,
        })
    }
}
