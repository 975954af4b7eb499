//! Calendar connector trait definition
//!
//! Defines the contract every calendar provider implements, together with the
//! provider-agnostic token and event shapes that are the only data crossing
//! the provider boundary.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::models::CalendarProvider;

/// Upper bound on events returned by a single `fetch_events` call.
pub const MAX_EVENTS_PER_FETCH: usize = 2500;

/// Errors surfaced by provider clients, already classified for the orchestrator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectorError {
    /// The call was malformed before reaching the provider
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The provider declined the OAuth grant
    #[error("{message}")]
    Rejected { code: String, message: String },
    /// The calendar API refused the access token (401/403)
    #[error("access token rejected by provider (HTTP {status})")]
    Unauthorized { status: u16 },
    /// Network failure, timeout, 5xx or an unrecognized provider error
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// The provider answered 2xx with a body we could not interpret
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
}

/// Tokens issued by a provider token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSet {
    pub access_token: String,
    /// Absent when the provider did not rotate the refresh token
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct EventAttendee {
    pub email: String,
    pub name: Option<String>,
    /// One of `accepted`, `declined`, `tentative`, `needsAction`
    pub response_status: Option<String>,
}

/// Provider-agnostic calendar event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CalendarEvent {
    /// Provider's event identifier
    pub id: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub organizer_email: Option<String>,
    pub organizer_name: Option<String>,
    pub attendees: Vec<EventAttendee>,
    pub is_all_day: bool,
    /// One of `confirmed`, `tentative`, `cancelled`
    pub status: Option<String>,
    pub event_link: Option<String>,
}

/// Primary calendar metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarInfo {
    pub id: String,
    pub name: String,
}

/// Contract implemented once per calendar provider.
#[async_trait]
pub trait CalendarConnector: Send + Sync {
    fn provider(&self) -> CalendarProvider;

    /// Exchange an OAuth authorization code; `redirect_uri` must match the
    /// client registration and is therefore required.
    async fn exchange_code_for_tokens(
        &self,
        code: &str,
        redirect_uri: Option<&str>,
    ) -> Result<TokenSet, ConnectorError>;

    async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenSet, ConnectorError>;

    /// Events overlapping `[start, end]`, at most [`MAX_EVENTS_PER_FETCH`],
    /// ordered by start time.
    async fn fetch_events(
        &self,
        access_token: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>, ConnectorError>;

    async fn get_calendar_info(&self, access_token: &str) -> Result<CalendarInfo, ConnectorError>;

    /// Never fails; any transport or auth problem yields `false`.
    async fn validate_token(&self, access_token: &str) -> bool;
}
