//! Google Calendar connector
//!
//! OAuth2 token exchange/refresh against `oauth2.googleapis.com` and event
//! reads from the Calendar v3 API on the user's primary calendar.
//!
//! Events are requested with `singleEvents=true&orderBy=startTime` so recurring
//! series arrive expanded and already sorted. An event whose `start` carries a
//! `date` instead of a `dateTime` is an all-day event.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::http::{build_client, request_token, send_json};
use super::trait_::{
    CalendarConnector, CalendarEvent, CalendarInfo, ConnectorError, EventAttendee,
    MAX_EVENTS_PER_FETCH, TokenSet,
};
use crate::config::AppConfig;
use crate::models::CalendarProvider;

const PROVIDER: CalendarProvider = CalendarProvider::Google;

/// Endpoints and credentials for the Google connector.
#[derive(Debug, Clone)]
pub struct GoogleCalendarSettings {
    pub client_id: String,
    pub client_secret: String,
    /// Base of the OAuth endpoints (`/token`, `/tokeninfo`)
    pub oauth_base: String,
    /// Base of the Calendar v3 API
    pub api_base: String,
    pub timeout: Duration,
}

impl GoogleCalendarSettings {
    /// Returns `None` unless both client id and secret are configured.
    pub fn from_config(config: &AppConfig) -> Option<Self> {
        let client_id = config.google_client_id.clone()?;
        let client_secret = config.google_client_secret.clone()?;
        Some(Self {
            client_id,
            client_secret,
            oauth_base: config.google_oauth_base.clone(),
            api_base: config.google_api_base.clone(),
            timeout: config.provider_timeout(),
        })
    }
}

pub struct GoogleCalendarConnector {
    http: Client,
    settings: GoogleCalendarSettings,
}

impl GoogleCalendarConnector {
    pub fn new(settings: GoogleCalendarSettings) -> Result<Self, ConnectorError> {
        Ok(Self {
            http: build_client(settings.timeout)?,
            settings,
        })
    }

    fn oauth_url(&self, path: &str) -> String {
        format!("{}/{}", self.settings.oauth_base.trim_end_matches('/'), path)
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.settings.api_base.trim_end_matches('/'), path)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventsPage {
    #[serde(default)]
    items: Vec<GoogleEvent>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEvent {
    id: String,
    status: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    location: Option<String>,
    html_link: Option<String>,
    start: Option<EventDateTime>,
    end: Option<EventDateTime>,
    organizer: Option<Person>,
    #[serde(default)]
    attendees: Vec<Attendee>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventDateTime {
    date_time: Option<String>,
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Person {
    email: Option<String>,
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Attendee {
    email: Option<String>,
    display_name: Option<String>,
    response_status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CalendarResource {
    id: String,
    summary: Option<String>,
}

impl EventDateTime {
    fn to_utc(&self) -> Option<DateTime<Utc>> {
        if let Some(date_time) = &self.date_time {
            return DateTime::parse_from_rfc3339(date_time)
                .ok()
                .map(|dt| dt.with_timezone(&Utc));
        }
        self.date
            .as_deref()
            .and_then(|date| NaiveDate::parse_from_str(date, "%Y-%m-%d").ok())
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
    }
}

fn normalize_event(event: GoogleEvent) -> Option<CalendarEvent> {
    let (Some(start), Some(end)) = (event.start.as_ref(), event.end.as_ref()) else {
        debug!(event_id = %event.id, "Skipping Google event without start/end");
        return None;
    };
    let is_all_day = start.date.is_some();
    let (Some(start_time), Some(end_time)) = (start.to_utc(), end.to_utc()) else {
        debug!(event_id = %event.id, "Skipping Google event with unparseable times");
        return None;
    };

    let (organizer_email, organizer_name) = event
        .organizer
        .map(|person| (person.email, person.display_name))
        .unwrap_or_default();

    let attendees = event
        .attendees
        .into_iter()
        .filter_map(|attendee| {
            Some(EventAttendee {
                email: attendee.email?,
                name: attendee.display_name,
                response_status: attendee.response_status,
            })
        })
        .collect();

    Some(CalendarEvent {
        id: event.id,
        summary: event.summary,
        description: event.description,
        location: event.location,
        start_time,
        end_time,
        organizer_email,
        organizer_name,
        attendees,
        is_all_day,
        status: event.status.map(|status| status.to_ascii_lowercase()),
        event_link: event.html_link,
    })
}

#[async_trait]
impl CalendarConnector for GoogleCalendarConnector {
    fn provider(&self) -> CalendarProvider {
        PROVIDER
    }

    #[instrument(skip_all, fields(provider = "google"))]
    async fn exchange_code_for_tokens(
        &self,
        code: &str,
        redirect_uri: Option<&str>,
    ) -> Result<TokenSet, ConnectorError> {
        let redirect_uri = redirect_uri
            .filter(|uri| !uri.trim().is_empty())
            .ok_or_else(|| {
                ConnectorError::InvalidRequest(
                    "redirect_uri is required to exchange a Google authorization code".to_string(),
                )
            })?;

        request_token(
            &self.http,
            PROVIDER,
            &self.oauth_url("token"),
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("client_id", &self.settings.client_id),
                ("client_secret", &self.settings.client_secret),
            ],
        )
        .await
    }

    #[instrument(skip_all, fields(provider = "google"))]
    async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenSet, ConnectorError> {
        request_token(
            &self.http,
            PROVIDER,
            &self.oauth_url("token"),
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", &self.settings.client_id),
                ("client_secret", &self.settings.client_secret),
            ],
        )
        .await
    }

    #[instrument(skip_all, fields(provider = "google"))]
    async fn fetch_events(
        &self,
        access_token: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>, ConnectorError> {
        let url = self.api_url("calendars/primary/events");
        let time_min = start.to_rfc3339_opts(SecondsFormat::Secs, true);
        let time_max = end.to_rfc3339_opts(SecondsFormat::Secs, true);

        let mut events = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let remaining = MAX_EVENTS_PER_FETCH - events.len();
            let mut query = vec![
                ("timeMin", time_min.clone()),
                ("timeMax", time_max.clone()),
                ("singleEvents", "true".to_string()),
                ("orderBy", "startTime".to_string()),
                ("maxResults", remaining.to_string()),
            ];
            if let Some(token) = page_token.take() {
                query.push(("pageToken", token));
            }

            let page: EventsPage = send_json(
                PROVIDER,
                self.http.get(&url).bearer_auth(access_token).query(&query),
            )
            .await?;

            events.extend(page.items.into_iter().filter_map(normalize_event));
            events.truncate(MAX_EVENTS_PER_FETCH);

            match page.next_page_token {
                Some(token) if events.len() < MAX_EVENTS_PER_FETCH => page_token = Some(token),
                _ => break,
            }
        }

        debug!(count = events.len(), "Fetched Google calendar events");
        Ok(events)
    }

    async fn get_calendar_info(&self, access_token: &str) -> Result<CalendarInfo, ConnectorError> {
        let calendar: CalendarResource = send_json(
            PROVIDER,
            self.http
                .get(self.api_url("calendars/primary"))
                .bearer_auth(access_token),
        )
        .await?;

        Ok(CalendarInfo {
            name: calendar.summary.unwrap_or_else(|| calendar.id.clone()),
            id: calendar.id,
        })
    }

    async fn validate_token(&self, access_token: &str) -> bool {
        let result: Result<serde_json::Value, _> = send_json(
            PROVIDER,
            self.http
                .get(self.oauth_url("tokeninfo"))
                .query(&[("access_token", access_token)]),
        )
        .await;

        match result {
            Ok(_) => true,
            Err(error) => {
                debug!(error = %error, "Google token validation failed");
                false
            }
        }
    }
}
