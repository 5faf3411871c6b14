//! Client side of the realtime layer: a reconnecting push channel, a
//! per-feature subscription router, and the optimistic list cache they feed.
//!
//! The pieces compose bottom-up: [`transport::TransportSession`] keeps one
//! socket alive across failures, [`router::SubscriptionRouter`] turns its
//! envelopes into cache invalidations, and [`cache::OptimisticMutationCache`]
//! reconciles local writes with server truth.

pub mod cache;
pub mod http;
pub mod router;
pub mod transport;

pub use cache::{
    MutationDraft, OptimisticMutationCache, Reconcile, ReconciliationError, RemoteError,
    RemoteWriter, SnapshotFetcher,
};
pub use router::{CacheInvalidator, EventFilter, SubscriptionRouter};
pub use transport::{
    ConnectionState, ReconnectPolicy, SocketConnector, SocketPair, TransportError,
    TransportEvent, TransportSession, WsConnector,
};
