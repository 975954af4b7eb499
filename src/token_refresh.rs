//! # Token Refresh Service
//!
//! Background sweep that refreshes every active connection whose access token
//! has already expired, across all users. Also exposes the single-connection
//! refresh step that the calendar service runs inline before a fetch.

use std::sync::Arc;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use sea_orm::DbErr;
use tokio::time::{Duration, Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::TokenRefreshConfig;
use crate::connectors::{CalendarConnector, Registry};
use crate::models::connection;
use crate::repositories::ConnectionRepository;

/// Fresh plaintext access token plus the row as persisted.
#[derive(Debug, Clone)]
pub struct RefreshedConnection {
    pub access_token: String,
    pub connection: connection::Model,
}

/// Trades the stored refresh token for new credentials and persists them.
///
/// The stored refresh token is kept when the provider does not rotate it.
pub async fn refresh_connection_tokens(
    connections: &ConnectionRepository,
    connector: &dyn CalendarConnector,
    connection: &connection::Model,
) -> anyhow::Result<RefreshedConnection> {
    let refresh_token = connections
        .decrypt_refresh_token(connection)
        .context("stored refresh token is unreadable")?
        .ok_or_else(|| anyhow!("connection {} has no refresh token", connection.id))?;

    let tokens = connector
        .refresh_access_token(&refresh_token)
        .await
        .context("token refresh rejected")?;

    let access_token_encrypted = connections.encrypt_token(&tokens.access_token)?;
    let refresh_token_encrypted = tokens
        .refresh_token
        .as_deref()
        .map(|token| connections.encrypt_token(token))
        .transpose()?;

    let updated = connections
        .update_tokens(
            connection.id,
            access_token_encrypted,
            refresh_token_encrypted,
            tokens.expires_at,
        )
        .await?;

    Ok(RefreshedConnection {
        access_token: tokens.access_token,
        connection: updated,
    })
}

/// Outcome of one sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefreshStats {
    pub connections_polled: u64,
    pub refreshes_succeeded: u64,
    pub refreshes_failed: u64,
}

pub struct TokenRefreshService {
    config: TokenRefreshConfig,
    connections: Arc<ConnectionRepository>,
    registry: Arc<Registry>,
}

impl TokenRefreshService {
    pub fn new(
        config: TokenRefreshConfig,
        connections: Arc<ConnectionRepository>,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            config,
            connections,
            registry,
        }
    }

    /// Sweeps every `tick_seconds` until `shutdown` fires.
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) {
        let interval = Duration::from_secs(self.config.tick_seconds);
        info!(tick_seconds = self.config.tick_seconds, "Starting token refresh service");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Token refresh service shutdown requested");
                    break;
                }
                _ = sleep(interval) => {
                    let started = Instant::now();
                    if let Err(err) = self.tick().await {
                        warn!(error = %err, "Token refresh sweep could not list connections");
                    }
                    histogram!("token_refresh_tick_duration_ms")
                        .record(started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Token refresh service stopped");
    }

    /// One sweep over connections expired as of now.
    pub async fn tick(&self) -> Result<RefreshStats, DbErr> {
        self.tick_at(Utc::now()).await
    }

    /// Connections are processed one at a time; a failure is logged, tallied
    /// and left for the next sweep.
    #[instrument(skip(self))]
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<RefreshStats, DbErr> {
        let due = self.connections.find_expired_tokens(now).await?;
        let mut stats = RefreshStats {
            connections_polled: due.len() as u64,
            ..RefreshStats::default()
        };

        for connection in &due {
            match self.refresh_one(connection).await {
                Ok(()) => stats.refreshes_succeeded += 1,
                Err(err) => {
                    stats.refreshes_failed += 1;
                    warn!(
                        connection_id = %connection.id,
                        user_id = %connection.user_id,
                        provider = %connection.provider,
                        error = %format_args!("{err:#}"),
                        "Token refresh failed"
                    );
                }
            }
        }

        gauge!("token_refresh_connections_polled").set(stats.connections_polled as f64);
        counter!("token_refresh_attempts_total").increment(stats.connections_polled);
        counter!("token_refresh_failures_total").increment(stats.refreshes_failed);

        info!(
            connections_polled = stats.connections_polled,
            refreshes_succeeded = stats.refreshes_succeeded,
            refreshes_failed = stats.refreshes_failed,
            "Token refresh sweep completed"
        );
        Ok(stats)
    }

    /// Connections that the next sweep at `now` would refresh.
    pub async fn due_connections(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<connection::Model>, DbErr> {
        self.connections.find_expired_tokens(now).await
    }

    async fn refresh_one(&self, connection: &connection::Model) -> anyhow::Result<()> {
        let connector = self.registry.get_for(connection.provider)?;
        let refreshed =
            refresh_connection_tokens(&self.connections, connector.as_ref(), connection).await?;
        debug!(
            connection_id = %connection.id,
            expires_at = ?refreshed.connection.token_expires_at,
            "Refreshed connection tokens"
        );
        Ok(())
    }
}
