//! Idempotency key repository
//!
//! Advisory dedup store for external calendar events. A present, unexpired key
//! means the event was already surfaced to the user. All reads and writes are
//! best-effort: storage failures degrade to "not seen" and are only logged.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::is_unique_violation;
use crate::models::CalendarProvider;
use crate::models::idempotency_key::{self, Entity as IdempotencyKey};

pub const EVENT_KEY_NAMESPACE: &str = "calendar-event";

/// Deterministic key for an external event surfaced to a user.
pub fn event_key(user_id: &str, provider: CalendarProvider, external_event_id: &str) -> String {
    format!("{EVENT_KEY_NAMESPACE}:{user_id}:{provider}:{external_event_id}")
}

#[derive(Debug, Clone)]
pub struct IdempotencyKeyRepository {
    db: Arc<DatabaseConnection>,
    ttl: chrono::Duration,
}

impl IdempotencyKeyRepository {
    pub fn new(db: Arc<DatabaseConnection>, ttl: chrono::Duration) -> Self {
        Self { db, ttl }
    }

    /// True if `key` is recorded and not yet expired.
    pub async fn seen(&self, key: &str) -> bool {
        let now: DateTimeWithTimeZone = Utc::now().into();
        match IdempotencyKey::find_by_id(key.to_string())
            .filter(idempotency_key::Column::ExpiresAt.gt(now))
            .one(&*self.db)
            .await
        {
            Ok(found) => found.is_some(),
            Err(error) => {
                warn!(error = %error, key, "Idempotency lookup failed; treating key as unseen");
                false
            }
        }
    }

    /// Records `key`. Duplicates are swallowed; an expired duplicate is re-armed.
    pub async fn mark(&self, key: &str, user_id: Option<&str>, endpoint: &str) {
        let now = Utc::now();
        let first_seen_at: DateTimeWithTimeZone = now.into();
        let expires_at: DateTimeWithTimeZone = (now + self.ttl).into();

        let model = idempotency_key::ActiveModel {
            key: Set(key.to_string()),
            user_id: Set(user_id.map(str::to_string)),
            endpoint: Set(Some(endpoint.to_string())),
            first_seen_at: Set(first_seen_at),
            expires_at: Set(expires_at),
        };

        match IdempotencyKey::insert(model)
            .exec_without_returning(&*self.db)
            .await
        {
            Ok(_) => {}
            Err(error) if is_unique_violation(&error) => {
                debug!(key, "Idempotency key already recorded");
                if let Err(error) = self.rearm_expired(key, first_seen_at, expires_at).await {
                    warn!(error = %error, key, "Failed to re-arm expired idempotency key");
                }
            }
            Err(error) => {
                warn!(error = %error, key, "Failed to record idempotency key");
            }
        }
    }

    async fn rearm_expired(
        &self,
        key: &str,
        first_seen_at: DateTimeWithTimeZone,
        expires_at: DateTimeWithTimeZone,
    ) -> Result<u64, DbErr> {
        let result = IdempotencyKey::update_many()
            .set(idempotency_key::ActiveModel {
                first_seen_at: Set(first_seen_at),
                expires_at: Set(expires_at),
                ..Default::default()
            })
            .filter(idempotency_key::Column::Key.eq(key))
            .filter(idempotency_key::Column::ExpiresAt.lte(first_seen_at))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected)
    }

    /// Deletes keys whose retention ended before `now`.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, DbErr> {
        let now: DateTimeWithTimeZone = now.into();
        let result = IdempotencyKey::delete_many()
            .filter(idempotency_key::Column::ExpiresAt.lte(now))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected)
    }

    /// Periodically purges expired keys until `shutdown` fires.
    pub async fn run_retention(&self, interval: Duration, shutdown: CancellationToken) {
        info!(
            interval_seconds = interval.as_secs(),
            "Starting idempotency key retention"
        );
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(interval) => {
                    match self.purge_expired(Utc::now()).await {
                        Ok(purged) => debug!(purged, "Purged expired idempotency keys"),
                        Err(error) => warn!(error = %error, "Idempotency key purge failed"),
                    }
                }
            }
        }
        info!("Idempotency key retention stopped");
    }
}
