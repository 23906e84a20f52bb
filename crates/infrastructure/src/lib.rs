pub mod chunk_store;
pub mod collaborators;
pub mod database;
pub mod in_memory_queue;
pub mod memory_stores;
pub mod metrics_collector;
pub mod redis_rate_store;

pub use chunk_store::LocalChunkStore;
pub use collaborators::{
    ExtensionHeuristicScanner, InMemoryExpiryStore, InMemoryFileStore, InMemoryMailStore,
    LoggingEmailTransport, StaticPlanProvider,
};
pub use database::postgres::{PostgresUploadSessionRepository, PostgresUsageRepository};
pub use in_memory_queue::InMemoryJobQueue;
pub use memory_stores::{
    InMemoryRateStore, InMemoryUploadSessionRepository, InMemoryUsageRepository,
};
pub use metrics_collector::MetricsCollector;
pub use redis_rate_store::RedisRateStore;
