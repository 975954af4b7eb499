//! Calendar connection entity model
//!
//! One row per (user, provider) pair holding the encrypted OAuth grant and the
//! bookkeeping written by sync and the refresh sweep.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

use super::provider::CalendarProvider;

/// Stored, encrypted OAuth grant linking one user to one calendar provider
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "calendar_connections")]
pub struct Model {
    /// Unique identifier for the connection (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Opaque identifier of the owning user
    pub user_id: String,

    /// Calendar provider this grant belongs to (unique per user)
    pub provider: CalendarProvider,

    /// Vault ciphertext of the access token
    #[sea_orm(column_type = "Text")]
    pub access_token_encrypted: String,

    /// Vault ciphertext of the refresh token, when the provider issued one
    #[sea_orm(column_type = "Text", nullable)]
    pub refresh_token_encrypted: Option<String>,

    /// When the access token stops being accepted
    pub token_expires_at: Option<DateTimeWithTimeZone>,

    pub is_active: bool,

    /// Completion time of the last successful sync
    pub last_synced_at: Option<DateTimeWithTimeZone>,

    /// Message of the most recent sync failure, cleared on success
    #[sea_orm(column_type = "Text", nullable)]
    pub last_sync_error: Option<String>,

    /// Consecutive sync failures, reset to 0 on success
    pub sync_failure_count: i32,

    /// Provider identifier of the primary calendar
    pub calendar_id: Option<String>,

    /// Display name of the primary calendar
    pub calendar_name: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// True when the stored access token expiry lies before `now`.
    pub fn token_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.token_expires_at
            .is_some_and(|expires_at| expires_at.with_timezone(&chrono::Utc) < now)
    }
}
