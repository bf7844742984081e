//! Store infrastructure: MongoDB bootstrap, document models, repository
//! implementations, and the Redis-backed work log and pub/sub bus.

pub mod models;
pub mod mongo;
pub mod redis;
pub mod repositories;

pub use mongo::Database;
pub use redis::{RedisBroker, RedisMessageBus, RedisWorkLog};
pub use repositories::{MongoBufferRepository, MongoSessionRepository};
