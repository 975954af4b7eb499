//! Request and response shapes of the calendar service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::connectors::{CalendarEvent, EventAttendee};
use crate::models::{CalendarProvider, connection};

/// Body of `POST /calendar/connect`
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ConnectRequest {
    /// `google` or `microsoft`, case-insensitive
    #[schema(example = "google")]
    pub provider: String,
    /// OAuth authorization code returned to the client
    pub authorization_code: String,
    /// Must match the redirect URI registered with the OAuth client
    #[serde(default)]
    pub redirect_uri: Option<String>,
}

/// Body of `POST /calendar/sync`; every field is optional.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct SyncRequest {
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    /// Bypass the cached result
    #[serde(default)]
    pub force_refresh: bool,
}

/// Optional provider filter shared by the calendar routes
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ProviderQuery {
    /// Restrict the operation to one provider
    pub provider: Option<String>,
}

/// Stored connection without credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ConnectionView {
    pub id: Uuid,
    pub user_id: String,
    pub provider: CalendarProvider,
    pub calendar_id: Option<String>,
    pub calendar_name: Option<String>,
    pub is_active: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<connection::Model> for ConnectionView {
    fn from(model: connection::Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            provider: model.provider,
            calendar_id: model.calendar_id,
            calendar_name: model.calendar_name,
            is_active: model.is_active,
            last_synced_at: model.last_synced_at.map(|at| at.with_timezone(&Utc)),
            created_at: model.created_at.with_timezone(&Utc),
        }
    }
}

/// Internal event lifecycle vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Draft,
    Published,
    Live,
    Completed,
    Canceled,
}

impl EventStatus {
    /// `cancelled` becomes [`EventStatus::Canceled`]; anything else is published.
    pub fn from_provider_status(status: Option<&str>) -> Self {
        match status {
            Some(status) if status.eq_ignore_ascii_case("cancelled") => EventStatus::Canceled,
            _ => EventStatus::Published,
        }
    }
}

/// Unified event returned by sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct EventView {
    /// `{provider}:{external_event_id}`
    pub id: String,
    pub provider: CalendarProvider,
    pub external_event_id: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub organizer_email: Option<String>,
    pub organizer_name: Option<String>,
    pub attendees: Vec<EventAttendee>,
    pub is_all_day: bool,
    pub status: EventStatus,
    pub event_link: Option<String>,
    /// Always empty
    pub linked_contacts: Vec<String>,
}

impl EventView {
    pub fn from_provider_event(provider: CalendarProvider, event: CalendarEvent) -> Self {
        Self {
            id: format!("{provider}:{}", event.id),
            provider,
            status: EventStatus::from_provider_status(event.status.as_deref()),
            external_event_id: event.id,
            summary: event.summary,
            description: event.description,
            location: event.location,
            start_time: event.start_time,
            end_time: event.end_time,
            organizer_email: event.organizer_email,
            organizer_name: event.organizer_name,
            attendees: event.attendees,
            is_all_day: event.is_all_day,
            event_link: event.event_link,
            linked_contacts: Vec::new(),
        }
    }
}
