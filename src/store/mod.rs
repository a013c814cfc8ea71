//! Persistence layer — key-value store for subscriptions and per-subscription markers.

pub mod keys;
pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use traits::KeyValueStore;
