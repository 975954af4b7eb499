//! Connection repository for database operations
//!
//! Encapsulates SeaORM access to `calendar_connections` and owns the token
//! vault, so plaintext credentials only exist on the way in and out of this type.

use chrono::{DateTime, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Unchanged, ColumnTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::crypto::{CryptoError, TokenVault};
use crate::models::CalendarProvider;
use crate::models::connection::{self, Entity as Connection};

/// Errors raised by the connection store
#[derive(Debug, Error)]
pub enum ConnectionStoreError {
    #[error("connection '{0}' not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Database(#[from] DbErr),
}

/// Plaintext input for a new connection row
#[derive(Debug, Clone)]
pub struct NewConnection {
    pub user_id: String,
    pub provider: CalendarProvider,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub calendar_id: Option<String>,
    pub calendar_name: Option<String>,
}

/// Repository for connection database operations
#[derive(Debug, Clone)]
pub struct ConnectionRepository {
    db: Arc<DatabaseConnection>,
    vault: Arc<TokenVault>,
}

impl ConnectionRepository {
    pub fn new(db: Arc<DatabaseConnection>, vault: Arc<TokenVault>) -> Self {
        Self { db, vault }
    }

    pub fn encrypt_token(&self, plaintext: &str) -> Result<String, CryptoError> {
        self.vault.encrypt(plaintext)
    }

    /// Decrypts the stored access token; corrupt ciphertext yields `None`.
    pub fn decrypt_access_token(&self, connection: &connection::Model) -> Option<String> {
        self.vault.safe_decrypt(&connection.access_token_encrypted)
    }

    pub fn decrypt_refresh_token(
        &self,
        connection: &connection::Model,
    ) -> Result<Option<String>, CryptoError> {
        connection
            .refresh_token_encrypted
            .as_deref()
            .map(|ciphertext| self.vault.decrypt(ciphertext))
            .transpose()
    }

    /// Encrypts the tokens and inserts an active connection.
    pub async fn create(
        &self,
        new: NewConnection,
    ) -> Result<connection::Model, ConnectionStoreError> {
        let access_token_encrypted = self.vault.encrypt(&new.access_token)?;
        let refresh_token_encrypted = new
            .refresh_token
            .as_deref()
            .map(|token| self.vault.encrypt(token))
            .transpose()?;

        let id = Uuid::new_v4();
        let now: DateTimeWithTimeZone = Utc::now().into();
        let model = connection::ActiveModel {
            id: Set(id),
            user_id: Set(new.user_id),
            provider: Set(new.provider),
            access_token_encrypted: Set(access_token_encrypted),
            refresh_token_encrypted: Set(refresh_token_encrypted),
            token_expires_at: Set(new.token_expires_at.map(Into::into)),
            is_active: Set(true),
            last_synced_at: Set(None),
            last_sync_error: Set(None),
            sync_failure_count: Set(0),
            calendar_id: Set(new.calendar_id),
            calendar_name: Set(new.calendar_name),
            created_at: Set(now),
            updated_at: Set(now),
        };

        // SQLite cannot hand back a non-integer primary key, so re-read the row.
        Connection::insert(model)
            .exec_without_returning(&*self.db)
            .await?;

        self.find_by_id(id)
            .await?
            .ok_or(ConnectionStoreError::NotFound(id))
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<connection::Model>, DbErr> {
        Connection::find_by_id(id).one(&*self.db).await
    }

    pub async fn find_by_user_and_provider(
        &self,
        user_id: &str,
        provider: CalendarProvider,
    ) -> Result<Option<connection::Model>, DbErr> {
        Connection::find()
            .filter(connection::Column::UserId.eq(user_id))
            .filter(connection::Column::Provider.eq(provider))
            .one(&*self.db)
            .await
    }

    pub async fn find_all_by_user(&self, user_id: &str) -> Result<Vec<connection::Model>, DbErr> {
        Connection::find()
            .filter(connection::Column::UserId.eq(user_id))
            .order_by_asc(connection::Column::Provider)
            .all(&*self.db)
            .await
    }

    pub async fn find_all_active_by_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<connection::Model>, DbErr> {
        Connection::find()
            .filter(connection::Column::UserId.eq(user_id))
            .filter(connection::Column::IsActive.eq(true))
            .order_by_asc(connection::Column::Provider)
            .all(&*self.db)
            .await
    }

    /// Active connections across all users whose access token expired before `now`.
    pub async fn find_expired_tokens(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<connection::Model>, DbErr> {
        let now: DateTimeWithTimeZone = now.into();
        Connection::find()
            .filter(connection::Column::IsActive.eq(true))
            .filter(connection::Column::TokenExpiresAt.is_not_null())
            .filter(connection::Column::TokenExpiresAt.lt(now))
            .order_by_asc(connection::Column::TokenExpiresAt)
            .all(&*self.db)
            .await
    }

    /// Applies the fields set on `changes` to the row with `id`.
    pub async fn update(
        &self,
        id: Uuid,
        mut changes: connection::ActiveModel,
    ) -> Result<connection::Model, ConnectionStoreError> {
        changes.id = Unchanged(id);
        changes.updated_at = Set(Utc::now().into());

        changes.update(&*self.db).await.map_err(|err| match err {
            DbErr::RecordNotFound(_) | DbErr::RecordNotUpdated => {
                ConnectionStoreError::NotFound(id)
            }
            other => ConnectionStoreError::Database(other),
        })
    }

    /// Persists refreshed credentials. Keeps the stored refresh token when
    /// `refresh_token_encrypted` is `None`.
    pub async fn update_tokens(
        &self,
        id: Uuid,
        access_token_encrypted: String,
        refresh_token_encrypted: Option<String>,
        token_expires_at: Option<DateTime<Utc>>,
    ) -> Result<connection::Model, ConnectionStoreError> {
        let mut changes = connection::ActiveModel {
            access_token_encrypted: Set(access_token_encrypted),
            token_expires_at: Set(token_expires_at.map(Into::into)),
            ..Default::default()
        };
        if let Some(refresh) = refresh_token_encrypted {
            changes.refresh_token_encrypted = Set(Some(refresh));
        }
        self.update(id, changes).await
    }

    /// Stamps a successful sync: sets `last_synced_at`, clears the error and
    /// resets the failure counter.
    pub async fn record_sync_success(
        &self,
        id: Uuid,
        synced_at: DateTime<Utc>,
    ) -> Result<connection::Model, ConnectionStoreError> {
        let changes = connection::ActiveModel {
            last_synced_at: Set(Some(synced_at.into())),
            last_sync_error: Set(None),
            sync_failure_count: Set(0),
            ..Default::default()
        };
        self.update(id, changes).await
    }

    /// Records `error` and bumps the failure counter in a single statement.
    pub async fn increment_sync_failure_count(
        &self,
        id: Uuid,
        error: &str,
    ) -> Result<(), ConnectionStoreError> {
        let now: DateTimeWithTimeZone = Utc::now().into();
        let result = Connection::update_many()
            .col_expr(
                connection::Column::SyncFailureCount,
                Expr::col(connection::Column::SyncFailureCount).add(1),
            )
            .col_expr(connection::Column::LastSyncError, Expr::value(error))
            .col_expr(connection::Column::UpdatedAt, Expr::value(now))
            .filter(connection::Column::Id.eq(id))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ConnectionStoreError::NotFound(id));
        }
        Ok(())
    }

    pub async fn reset_sync_failure_count(
        &self,
        id: Uuid,
    ) -> Result<connection::Model, ConnectionStoreError> {
        let changes = connection::ActiveModel {
            sync_failure_count: Set(0),
            ..Default::default()
        };
        self.update(id, changes).await
    }

    /// Hard-deletes the user's connection to `provider`; returns rows removed.
    pub async fn delete_by_user_and_provider(
        &self,
        user_id: &str,
        provider: CalendarProvider,
    ) -> Result<u64, DbErr> {
        let result = Connection::delete_many()
            .filter(connection::Column::UserId.eq(user_id))
            .filter(connection::Column::Provider.eq(provider))
            .exec(&*self.db)
            .await?;
        debug!(user_id, provider = %provider, rows = result.rows_affected, "Deleted connection");
        Ok(result.rows_affected)
    }

    /// Hard-deletes every connection of the user; returns rows removed.
    pub async fn delete_all_by_user(&self, user_id: &str) -> Result<u64, DbErr> {
        let result = Connection::delete_many()
            .filter(connection::Column::UserId.eq(user_id))
            .exec(&*self.db)
            .await?;
        debug!(user_id, rows = result.rows_affected, "Deleted all connections for user");
        Ok(result.rows_affected)
    }
}
