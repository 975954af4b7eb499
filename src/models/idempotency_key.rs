//! Idempotency key entity model

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

/// Marker recording that an external event was already surfaced to a user
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "idempotency_keys")]
pub struct Model {
    /// Deterministic key, see [`crate::repositories::idempotency_key::event_key`]
    #[sea_orm(primary_key, auto_increment = false)]
    pub key: String,

    /// Owning user, kept for diagnostics
    pub user_id: Option<String>,

    /// Operation that recorded the key, kept for diagnostics
    pub endpoint: Option<String>,

    pub first_seen_at: DateTimeWithTimeZone,

    /// After this instant the key no longer suppresses anything
    pub expires_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
