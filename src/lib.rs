use std::sync::Arc;

use redis::Client as RedisClient;
use sqlx::PgPool;

use admission::AdmissionController;
use cache::RedisCounterStore;
use config::Config;
use realtime::EventHub;

pub mod admission;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod middleware;
pub mod realtime;
pub mod routes;
pub mod utils;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub redis: Arc<RedisClient>,
    pub hub: EventHub,
    pub admission: Arc<AdmissionController<RedisCounterStore>>,
}
