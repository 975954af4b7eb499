//! # Data Models
//!
//! SeaORM entities and shared identifiers for the calendar sync service.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod connection;
pub mod idempotency_key;
pub mod provider;

pub use connection::Entity as CalendarConnection;
pub use idempotency_key::Entity as IdempotencyKey;
pub use provider::CalendarProvider;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "calendar-sync".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
