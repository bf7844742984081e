//! Domain services for the realtime coaching pipeline.
//!
//! Each module follows the same shape: a `ports` submodule with the models,
//! errors and trait contracts, and the service implementation next to it.
//! Infrastructure (Mongo, Redis) lives behind the ports so the services and
//! the worker pool are testable with the in-memory doubles in
//! [`test_utils`].

pub mod buffers;
pub mod common;
pub mod realtime;
pub mod sessions;
pub mod test_utils;
pub mod workers;

pub use buffers::BufferService;
pub use common::{ErrorCode, RepositoryError, ServiceError};
pub use realtime::RealtimeService;
pub use sessions::SessionService;
pub use workers::AudioWorkerPool;
