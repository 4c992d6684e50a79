pub mod app_config;
pub mod database;
pub mod events;
pub mod feed;
pub mod memory_repo;
pub mod pg_repo;
pub mod redis_repo;
pub mod service;

pub use database::LockDb;
pub use events::EventProducer;
pub use feed::ChangeFeed;
pub use memory_repo::MemoryLockBackend;
pub use pg_repo::PgLockBackend;
pub use redis_repo::RedisLockBackend;
pub use service::LockService;
