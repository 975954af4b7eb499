//! Shared fixtures: an in-memory database with migrations applied and a
//! scriptable calendar connector that records how it was called.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use calendar_sync::calendar::{CalendarService, ConnectRequest, ConnectionView};
use calendar_sync::config::SyncConfig;
use calendar_sync::connectors::{
    CalendarConnector, CalendarEvent, CalendarInfo, ConnectorError, Registry, TokenSet,
};
use calendar_sync::crypto::{DEFAULT_KEY_SALT, TokenVault};
use calendar_sync::models::CalendarProvider;
use calendar_sync::repositories::{ConnectionRepository, IdempotencyKeyRepository};
use chrono::{DateTime, Duration, TimeZone, Utc};
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};

/// In-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

pub async fn setup_test_db_arc() -> Result<Arc<DatabaseConnection>> {
    Ok(Arc::new(setup_test_db().await?))
}

pub fn test_vault() -> Arc<TokenVault> {
    Arc::new(TokenVault::new("integration-test-secret", DEFAULT_KEY_SALT))
}

pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 11, 2, hour, minute, 0).unwrap()
}

pub fn event(id: &str, start: DateTime<Utc>) -> CalendarEvent {
    CalendarEvent {
        id: id.to_string(),
        summary: Some(format!("Event {id}")),
        description: None,
        location: None,
        start_time: start,
        end_time: start + Duration::minutes(30),
        organizer_email: Some("organizer@example.com".to_string()),
        organizer_name: None,
        attendees: vec![],
        is_all_day: false,
        status: Some("confirmed".to_string()),
        event_link: None,
    }
}

/// Connector double. Exchanged tokens are `access-{code}` / `refresh-{code}`;
/// refreshed access tokens are `refreshed-{n}`.
pub struct FakeConnector {
    provider: CalendarProvider,
    events: Mutex<Vec<CalendarEvent>>,
    rejected_access_tokens: Mutex<HashSet<String>>,
    rejected_refresh_tokens: Mutex<HashSet<String>>,
    fetch_tokens: Mutex<Vec<String>>,
    pub fetch_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub exchange_calls: AtomicUsize,
    pub fail_fetch: AtomicBool,
    pub omit_refresh_token: AtomicBool,
    pub rotate_refresh_token: AtomicBool,
}

impl FakeConnector {
    pub fn new(provider: CalendarProvider) -> Arc<Self> {
        Arc::new(Self {
            provider,
            events: Mutex::new(Vec::new()),
            rejected_access_tokens: Mutex::new(HashSet::new()),
            rejected_refresh_tokens: Mutex::new(HashSet::new()),
            fetch_tokens: Mutex::new(Vec::new()),
            fetch_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            exchange_calls: AtomicUsize::new(0),
            fail_fetch: AtomicBool::new(false),
            omit_refresh_token: AtomicBool::new(false),
            rotate_refresh_token: AtomicBool::new(false),
        })
    }

    pub fn set_events(&self, events: Vec<CalendarEvent>) {
        *self.events.lock().unwrap() = events;
    }

    pub fn reject_access_token(&self, token: &str) {
        self.rejected_access_tokens
            .lock()
            .unwrap()
            .insert(token.to_string());
    }

    pub fn reject_refresh_token(&self, token: &str) {
        self.rejected_refresh_tokens
            .lock()
            .unwrap()
            .insert(token.to_string());
    }

    pub fn fetch_tokens(&self) -> Vec<String> {
        self.fetch_tokens.lock().unwrap().clone()
    }

    pub fn fetches(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CalendarConnector for FakeConnector {
    fn provider(&self) -> CalendarProvider {
        self.provider
    }

    async fn exchange_code_for_tokens(
        &self,
        code: &str,
        redirect_uri: Option<&str>,
    ) -> Result<TokenSet, ConnectorError> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        if redirect_uri.is_none() {
            return Err(ConnectorError::InvalidRequest(
                "redirect_uri is required".to_string(),
            ));
        }
        if code == "bad-code" {
            return Err(ConnectorError::Rejected {
                code: "invalid_grant".to_string(),
                message: "authorization code expired or already used".to_string(),
            });
        }
        let refresh_token = if self.omit_refresh_token.load(Ordering::SeqCst) {
            None
        } else {
            Some(format!("refresh-{code}"))
        };
        Ok(TokenSet {
            access_token: format!("access-{code}"),
            refresh_token,
            expires_at: Some(Utc::now() + Duration::hours(1)),
        })
    }

    async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenSet, ConnectorError> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self
            .rejected_refresh_tokens
            .lock()
            .unwrap()
            .contains(refresh_token)
        {
            return Err(ConnectorError::Rejected {
                code: "invalid_grant".to_string(),
                message: "refresh token revoked".to_string(),
            });
        }
        let rotated = self
            .rotate_refresh_token
            .load(Ordering::SeqCst)
            .then(|| format!("rotated-{n}"));
        Ok(TokenSet {
            access_token: format!("refreshed-{n}"),
            refresh_token: rotated,
            expires_at: Some(Utc::now() + Duration::hours(1)),
        })
    }

    async fn fetch_events(
        &self,
        access_token: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>, ConnectorError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.fetch_tokens
            .lock()
            .unwrap()
            .push(access_token.to_string());
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(ConnectorError::ProviderUnavailable(
                "HTTP 503 from calendar API".to_string(),
            ));
        }
        if self
            .rejected_access_tokens
            .lock()
            .unwrap()
            .contains(access_token)
        {
            return Err(ConnectorError::Unauthorized { status: 401 });
        }
        Ok(self.events.lock().unwrap().clone())
    }

    async fn get_calendar_info(&self, _access_token: &str) -> Result<CalendarInfo, ConnectorError> {
        Ok(CalendarInfo {
            id: format!("{}-primary", self.provider),
            name: "Work".to_string(),
        })
    }

    async fn validate_token(&self, access_token: &str) -> bool {
        !self
            .rejected_access_tokens
            .lock()
            .unwrap()
            .contains(access_token)
    }
}

/// Calendar service over an in-memory database and two fake connectors.
pub struct Harness {
    pub db: Arc<DatabaseConnection>,
    pub connections: Arc<ConnectionRepository>,
    pub idempotency: Arc<IdempotencyKeyRepository>,
    pub registry: Arc<Registry>,
    pub google: Arc<FakeConnector>,
    pub microsoft: Arc<FakeConnector>,
    pub service: Arc<CalendarService>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_sync_config(SyncConfig::default()).await
    }

    pub async fn with_sync_config(sync: SyncConfig) -> Self {
        let db = setup_test_db_arc().await.unwrap();
        let connections = Arc::new(ConnectionRepository::new(db.clone(), test_vault()));
        let idempotency = Arc::new(IdempotencyKeyRepository::new(
            db.clone(),
            Duration::hours(sync.idempotency_ttl_hours),
        ));
        let google = FakeConnector::new(CalendarProvider::Google);
        let microsoft = FakeConnector::new(CalendarProvider::Microsoft);
        let mut registry = Registry::new();
        registry.register(google.clone());
        registry.register(microsoft.clone());
        let registry = Arc::new(registry);
        let service = Arc::new(CalendarService::new(
            connections.clone(),
            idempotency.clone(),
            registry.clone(),
            &sync,
        ));
        Self {
            db,
            connections,
            idempotency,
            registry,
            google,
            microsoft,
            service,
        }
    }

    pub async fn connect(&self, user_id: &str, provider: &str, code: &str) -> ConnectionView {
        self.service
            .connect(
                user_id,
                ConnectRequest {
                    provider: provider.to_string(),
                    authorization_code: code.to_string(),
                    redirect_uri: Some("https://app.example.com/oauth/callback".to_string()),
                },
            )
            .await
            .unwrap()
    }
}
