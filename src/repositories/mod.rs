//! # Repository Layer
//!
//! SeaORM-backed stores for calendar connections and event idempotency keys.

pub mod connection;
pub mod idempotency_key;

pub use connection::{ConnectionRepository, ConnectionStoreError, NewConnection};
pub use idempotency_key::{IdempotencyKeyRepository, event_key};
