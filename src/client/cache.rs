//! List-shaped client cache that stays consistent across three independent
//! write paths: local optimistic mutations, server confirmations, and
//! push-driven invalidations.
//!
//! Every mutation carries a client-generated correlation token; the server
//! stores it and echoes it back, so provisional records are matched to their
//! confirmations exactly, even with several mutations in flight on one list.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::router::CacheInvalidator;

/// A remote call failed (network, server error, or an undecodable body).
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct RemoteError(pub String);

#[derive(Debug, Error)]
pub enum ReconciliationError {
    /// The durable write was rejected; the provisional record was rolled
    /// back before this surfaced.
    #[error("mutation rejected by server: {0}")]
    Rejected(#[source] RemoteError),
    #[error("canonical refetch failed: {0}")]
    Refetch(#[source] RemoteError),
}

/// A record the cache can reconcile.
pub trait Reconcile: Clone + Send + 'static {
    /// Correlation token carried by this record, if any.
    fn correlation_token(&self) -> Option<Uuid>;
    /// True only for local provisional copies awaiting confirmation.
    fn is_provisional(&self) -> bool;
}

/// A pending write that can stand in locally until the server answers.
pub trait MutationDraft<T>: Send + Sync {
    fn provisional(&self, token: Uuid) -> T;
}

/// Issues the durable write; the token must be echoed back in the record.
pub trait RemoteWriter<D, T>: Send + Sync {
    fn write(
        &self,
        draft: &D,
        token: Uuid,
    ) -> impl Future<Output = Result<T, RemoteError>> + Send;
}

/// Fetches the canonical list this cache mirrors.
pub trait SnapshotFetcher<T>: Send + Sync {
    fn fetch(&self) -> impl Future<Output = Result<Vec<T>, RemoteError>> + Send;
}

struct ListState<T> {
    records: Vec<T>,
    in_flight: HashSet<Uuid>,
}

/// Cheap cloneable handle over one list's provisional view. The server owns
/// the truth; everything here is reconcilable back to it.
pub struct OptimisticMutationCache<T, F> {
    state: Arc<Mutex<ListState<T>>>,
    fetcher: Arc<F>,
}

impl<T, F> Clone for OptimisticMutationCache<T, F> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            fetcher: Arc::clone(&self.fetcher),
        }
    }
}

impl<T, F> OptimisticMutationCache<T, F>
where
    T: Reconcile,
    F: SnapshotFetcher<T>,
{
    pub fn new(fetcher: F) -> Self {
        Self {
            state: Arc::new(Mutex::new(ListState {
                records: Vec::new(),
                in_flight: HashSet::new(),
            })),
            fetcher: Arc::new(fetcher),
        }
    }

    /// Seed the cache with an initial canonical page.
    pub async fn prime(&self, records: Vec<T>) {
        let mut state = self.state.lock().await;
        state.records = records;
    }

    pub async fn records(&self) -> Vec<T> {
        self.state.lock().await.records.clone()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.records.len()
    }

    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }

    /// Optimistic write: the provisional record is visible immediately, the
    /// durable write happens behind it, and resolution goes strictly by the
    /// correlation token.
    ///
    /// On rejection the provisional record is discarded (removal by token,
    /// so concurrent in-flight mutations are untouched) and the error
    /// surfaces exactly once, here.
    pub async fn mutate<D, W>(&self, writer: &W, draft: D) -> Result<T, ReconciliationError>
    where
        D: MutationDraft<T>,
        W: RemoteWriter<D, T>,
    {
        let token = Uuid::new_v4();
        {
            let mut state = self.state.lock().await;
            state.records.push(draft.provisional(token));
            state.in_flight.insert(token);
        }

        match writer.write(&draft, token).await {
            Ok(confirmed) => {
                let mut state = self.state.lock().await;
                state.in_flight.remove(&token);

                if let Some(slot) = state
                    .records
                    .iter_mut()
                    .find(|r| r.is_provisional() && r.correlation_token() == Some(token))
                {
                    *slot = confirmed.clone();
                } else if !state
                    .records
                    .iter()
                    .any(|r| r.correlation_token() == Some(token))
                {
                    // A canonical refetch superseded the provisional record
                    // before the server had committed the write.
                    state.records.push(confirmed.clone());
                }

                Ok(confirmed)
            }
            Err(e) => {
                let mut state = self.state.lock().await;
                state.in_flight.remove(&token);
                state
                    .records
                    .retain(|r| !(r.is_provisional() && r.correlation_token() == Some(token)));
                Err(ReconciliationError::Rejected(e))
            }
        }
    }

    /// Push-driven invalidation: refetch canonical state, which wins over
    /// any lingering provisional entries. In-flight mutations re-resolve by
    /// token once their confirmation lands.
    pub async fn apply_invalidation(&self) -> Result<(), ReconciliationError> {
        let canonical = self
            .fetcher
            .fetch()
            .await
            .map_err(ReconciliationError::Refetch)?;

        let mut state = self.state.lock().await;
        state.records = canonical;
        Ok(())
    }
}

impl<T, F> CacheInvalidator for OptimisticMutationCache<T, F>
where
    T: Reconcile + Sync,
    F: SnapshotFetcher<T> + 'static,
{
    fn invalidate(&self) -> impl Future<Output = ()> + Send {
        async move {
            if let Err(e) = self.apply_invalidation().await {
                tracing::warn!("push invalidation refetch failed: {}", e);
            }
        }
    }
}
