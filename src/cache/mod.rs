pub mod keys;
pub mod models;
pub mod operations;

pub use models::{RateLimitCounter, WindowHit};
pub use operations::{CounterStore, MemoryCounterStore, RedisCounterStore, StoreUnavailable};
