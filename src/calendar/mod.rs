//! # Calendar Service
//!
//! Coordinates connectors, the connection store, the idempotency guard and the
//! result cache for the connect, disconnect, status and sync operations.
//!
//! Provider errors never cross this boundary raw: connect failures surface as
//! [`CalendarError::ConnectFailed`] and sync failures as
//! [`CalendarError::SyncFailed`]. A failing connection records its own error
//! and failure count; other connections of the user are left untouched.

pub mod cache;
pub mod types;

use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use metrics::counter;
use tracing::{debug, info, instrument, warn};

use crate::config::SyncConfig;
use crate::connectors::{CalendarConnector, ConnectorError, Registry};
use crate::error::CalendarError;
use crate::models::{CalendarProvider, connection};
use crate::repositories::{
    ConnectionRepository, IdempotencyKeyRepository, NewConnection, event_key,
};
use crate::token_refresh::refresh_connection_tokens;

pub use cache::{CacheKey, CacheScope, EventCache};
pub use types::{
    ConnectRequest, ConnectionView, EventStatus, EventView, ProviderQuery, SyncRequest,
};

/// Endpoint recorded on idempotency keys written by sync.
const SYNC_ENDPOINT: &str = "calendar.sync";

pub struct CalendarService {
    connections: Arc<ConnectionRepository>,
    idempotency: Arc<IdempotencyKeyRepository>,
    registry: Arc<Registry>,
    cache: EventCache,
    default_window: chrono::Duration,
}

/// Events of one connection that survived dedup, paired with their keys.
struct FreshEvents {
    events: Vec<EventView>,
    keys: Vec<String>,
}

impl CalendarService {
    pub fn new(
        connections: Arc<ConnectionRepository>,
        idempotency: Arc<IdempotencyKeyRepository>,
        registry: Arc<Registry>,
        settings: &SyncConfig,
    ) -> Self {
        Self {
            connections,
            idempotency,
            registry,
            cache: EventCache::new(settings.cache_capacity, settings.cache_ttl()),
            default_window: chrono::Duration::days(settings.default_window_days),
        }
    }

    pub fn cache(&self) -> &EventCache {
        &self.cache
    }

    /// Exchanges the authorization code and stores the grant, updating the
    /// existing (user, provider) row in place when there is one.
    #[instrument(skip(self, request), fields(provider = %request.provider))]
    pub async fn connect(
        &self,
        user_id: &str,
        request: ConnectRequest,
    ) -> Result<ConnectionView, CalendarError> {
        let code = request.authorization_code.trim();
        if code.is_empty() {
            return Err(CalendarError::InvalidInput(
                "authorization_code must not be empty".to_string(),
            ));
        }

        let connector = self.registry.get(&request.provider)?;
        let provider = connector.provider();
        let existing = self
            .connections
            .find_by_user_and_provider(user_id, provider)
            .await?;

        let tokens = connector
            .exchange_code_for_tokens(code, request.redirect_uri.as_deref())
            .await
            .map_err(|err| connect_failed(provider, err))?;
        let calendar = connector
            .get_calendar_info(&tokens.access_token)
            .await
            .map_err(|err| connect_failed(provider, err))?;

        let stored = match existing {
            Some(row) => {
                let access_token_encrypted = self
                    .connections
                    .encrypt_token(&tokens.access_token)
                    .map_err(|err| CalendarError::ConnectFailed(err.to_string()))?;
                let mut changes = connection::ActiveModel {
                    access_token_encrypted: sea_orm::Set(access_token_encrypted),
                    token_expires_at: sea_orm::Set(tokens.expires_at.map(Into::into)),
                    is_active: sea_orm::Set(true),
                    calendar_id: sea_orm::Set(Some(calendar.id)),
                    calendar_name: sea_orm::Set(Some(calendar.name)),
                    last_sync_error: sea_orm::Set(None),
                    sync_failure_count: sea_orm::Set(0),
                    ..Default::default()
                };
                if let Some(refresh) = tokens.refresh_token.as_deref() {
                    let encrypted = self
                        .connections
                        .encrypt_token(refresh)
                        .map_err(|err| CalendarError::ConnectFailed(err.to_string()))?;
                    changes.refresh_token_encrypted = sea_orm::Set(Some(encrypted));
                }
                self.connections
                    .update(row.id, changes)
                    .await
                    .map_err(|err| CalendarError::ConnectFailed(err.to_string()))?
            }
            None => self
                .connections
                .create(NewConnection {
                    user_id: user_id.to_string(),
                    provider,
                    access_token: tokens.access_token,
                    refresh_token: tokens.refresh_token,
                    token_expires_at: tokens.expires_at,
                    calendar_id: Some(calendar.id),
                    calendar_name: Some(calendar.name),
                })
                .await
                .map_err(|err| CalendarError::ConnectFailed(err.to_string()))?,
        };

        self.cache.evict_provider(user_id, provider).await;
        info!(user_id, connection_id = %stored.id, "Calendar connected");
        Ok(stored.into())
    }

    /// Deletes one connection, or all of the user's connections when
    /// `provider` is `None`. Matching cache entries are always evicted.
    #[instrument(skip(self))]
    pub async fn disconnect(
        &self,
        user_id: &str,
        provider: Option<&str>,
    ) -> Result<(), CalendarError> {
        match provider.map(parse_provider).transpose()? {
            Some(provider) => {
                let removed = self
                    .connections
                    .delete_by_user_and_provider(user_id, provider)
                    .await?;
                self.cache.evict_provider(user_id, provider).await;
                if removed == 0 {
                    return Err(CalendarError::NotFound(format!(
                        "no {provider} calendar connection for user"
                    )));
                }
            }
            None => {
                let removed = self.connections.delete_all_by_user(user_id).await?;
                self.cache.evict_user(user_id).await;
                if removed == 0 {
                    return Err(CalendarError::NotFound(
                        "user has no calendar connections".to_string(),
                    ));
                }
            }
        }
        info!(user_id, "Calendar disconnected");
        Ok(())
    }

    pub async fn get_connection_statuses(
        &self,
        user_id: &str,
        provider: Option<&str>,
    ) -> Result<Vec<ConnectionView>, CalendarError> {
        match provider.map(parse_provider).transpose()? {
            Some(provider) => self
                .connections
                .find_by_user_and_provider(user_id, provider)
                .await?
                .map(|row| vec![row.into()])
                .ok_or_else(|| {
                    CalendarError::NotFound(format!("no {provider} calendar connection for user"))
                }),
            None => Ok(self
                .connections
                .find_all_by_user(user_id)
                .await?
                .into_iter()
                .map(Into::into)
                .collect()),
        }
    }

    /// Cached-first view of the user's events.
    pub async fn get_events(
        &self,
        user_id: &str,
        provider: Option<&str>,
    ) -> Result<Vec<EventView>, CalendarError> {
        self.sync(user_id, SyncRequest::default(), provider).await
    }

    /// Fetches, deduplicates and merges events from the user's active
    /// connections into one list ordered by start time.
    #[instrument(skip(self, request), fields(force_refresh = request.force_refresh))]
    pub async fn sync(
        &self,
        user_id: &str,
        request: SyncRequest,
        provider: Option<&str>,
    ) -> Result<Vec<EventView>, CalendarError> {
        let provider = provider.map(parse_provider).transpose()?;
        let (start, end) = self.resolve_window(&request)?;

        let active: Vec<connection::Model> = self
            .connections
            .find_all_active_by_user(user_id)
            .await?
            .into_iter()
            .filter(|row| provider.is_none_or(|p| row.provider == p))
            .collect();
        if active.is_empty() {
            return Err(CalendarError::NotFound(match provider {
                Some(p) => format!("no active {p} calendar connection for user"),
                None => "user has no active calendar connections".to_string(),
            }));
        }

        let key = CacheKey::new(user_id, provider.into());
        if !request.force_refresh
            && let Some(events) = self.cache.lookup(&key).await
        {
            counter!("calendar_sync_cache_hits_total").increment(1);
            debug!(user_id, events = events.len(), "Serving cached events");
            return Ok(events);
        }

        let mut events = Vec::new();
        let mut keys = Vec::new();
        for row in &active {
            let outcome = match self.sync_connection(user_id, row, start, end).await {
                Ok(fresh) => self
                    .connections
                    .record_sync_success(row.id, Utc::now())
                    .await
                    .map(|_| fresh)
                    .context("failed to record sync success"),
                Err(err) => Err(err),
            };
            match outcome {
                Ok(fresh) => {
                    counter!(
                        "calendar_sync_total",
                        "provider" => row.provider.as_str(),
                        "outcome" => "success"
                    )
                    .increment(1);
                    events.extend(fresh.events);
                    keys.extend(fresh.keys);
                }
                Err(err) => {
                    let message = format!("{err:#}");
                    counter!(
                        "calendar_sync_total",
                        "provider" => row.provider.as_str(),
                        "outcome" => "failure"
                    )
                    .increment(1);
                    warn!(
                        user_id,
                        connection_id = %row.id,
                        provider = %row.provider,
                        error = %message,
                        "Calendar sync failed"
                    );
                    if let Err(store_err) = self
                        .connections
                        .increment_sync_failure_count(row.id, &message)
                        .await
                    {
                        warn!(error = %store_err, connection_id = %row.id, "Failed to record sync failure");
                    }
                    return Err(CalendarError::SyncFailed(message));
                }
            }
        }

        events.sort_by_key(|event| event.start_time);
        for key in &keys {
            self.idempotency
                .mark(key, Some(user_id), SYNC_ENDPOINT)
                .await;
        }
        self.cache.insert(key, events.clone()).await;

        info!(
            user_id,
            connections = active.len(),
            events = events.len(),
            "Calendar sync completed"
        );
        Ok(events)
    }

    fn resolve_window(
        &self,
        request: &SyncRequest,
    ) -> Result<(DateTime<Utc>, DateTime<Utc>), CalendarError> {
        let now = Utc::now();
        let start = request.start_date.unwrap_or(now - self.default_window);
        let end = request.end_date.unwrap_or(now + self.default_window);
        if start > end {
            return Err(CalendarError::InvalidInput(
                "start_date must not be after end_date".to_string(),
            ));
        }
        Ok((start, end))
    }

    /// Fetches one connection's events, refreshing its token first when it is
    /// expired or unreadable, and once more if the provider rejects it.
    async fn sync_connection(
        &self,
        user_id: &str,
        row: &connection::Model,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<FreshEvents> {
        let connector = self.registry.get_for(row.provider)?;

        let stored_token = self.connections.decrypt_access_token(row);
        let (access_token, refreshed) = match stored_token {
            Some(token) if !row.token_expired(Utc::now()) => (token, false),
            _ => (self.refresh(connector.as_ref(), row).await?, true),
        };

        let fetched = match connector.fetch_events(&access_token, start, end).await {
            Err(ConnectorError::Unauthorized { status })
                if !refreshed && row.refresh_token_encrypted.is_some() =>
            {
                debug!(connection_id = %row.id, status, "Access token rejected, refreshing");
                let access_token = self.refresh(connector.as_ref(), row).await?;
                connector.fetch_events(&access_token, start, end).await?
            }
            other => other?,
        };

        let mut fresh = FreshEvents {
            events: Vec::with_capacity(fetched.len()),
            keys: Vec::with_capacity(fetched.len()),
        };
        for event in fetched {
            let key = event_key(user_id, row.provider, &event.id);
            if self.idempotency.seen(&key).await {
                counter!("calendar_events_deduplicated_total").increment(1);
                continue;
            }
            fresh.keys.push(key);
            fresh
                .events
                .push(EventView::from_provider_event(row.provider, event));
        }
        Ok(fresh)
    }

    async fn refresh(
        &self,
        connector: &dyn CalendarConnector,
        row: &connection::Model,
    ) -> anyhow::Result<String> {
        let refreshed = refresh_connection_tokens(&self.connections, connector, row)
            .await
            .with_context(|| format!("{} access token could not be refreshed", row.provider))?;
        Ok(refreshed.access_token)
    }
}

fn parse_provider(name: &str) -> Result<CalendarProvider, CalendarError> {
    name.parse()
        .map_err(|_| CalendarError::NotImplemented(name.to_string()))
}

fn connect_failed(provider: CalendarProvider, err: ConnectorError) -> CalendarError {
    warn!(provider = %provider, error = %err, "Calendar connect failed");
    CalendarError::ConnectFailed(err.to_string())
}
