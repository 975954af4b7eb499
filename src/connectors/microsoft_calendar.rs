//! Microsoft 365 / Outlook calendar connector
//!
//! Uses the Microsoft identity platform v2 token endpoint and the Graph
//! `calendarView` API, which expands recurring series within the window.
//! Every calendar request carries `Prefer: outlook.timezone="UTC"` so Graph
//! returns naive UTC timestamps.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use tracing::{debug, instrument, warn};
use url::Url;

use super::http::{build_client, request_token, send_json};
use super::trait_::{
    CalendarConnector, CalendarEvent, CalendarInfo, ConnectorError, EventAttendee,
    MAX_EVENTS_PER_FETCH, TokenSet,
};
use crate::config::AppConfig;
use crate::models::CalendarProvider;

const PROVIDER: CalendarProvider = CalendarProvider::Microsoft;
const SCOPES: &str = "offline_access Calendars.Read User.Read";
const PREFER_UTC: &str = "outlook.timezone=\"UTC\"";
/// Graph rejects calendarView pages larger than this.
const GRAPH_PAGE_SIZE: usize = 1000;

/// Endpoints and credentials for the Microsoft connector.
#[derive(Debug, Clone)]
pub struct MicrosoftCalendarSettings {
    pub client_id: String,
    pub client_secret: String,
    /// Directory tenant, `common` for multi-tenant apps
    pub tenant_id: String,
    pub login_base: String,
    pub graph_base: String,
    pub timeout: Duration,
}

impl MicrosoftCalendarSettings {
    /// Returns `None` unless both client id and secret are configured.
    pub fn from_config(config: &AppConfig) -> Option<Self> {
        let client_id = config.microsoft_client_id.clone()?;
        let client_secret = config.microsoft_client_secret.clone()?;
        Some(Self {
            client_id,
            client_secret,
            tenant_id: config.microsoft_tenant_id.clone(),
            login_base: config.microsoft_login_base.clone(),
            graph_base: config.microsoft_graph_base.clone(),
            timeout: config.provider_timeout(),
        })
    }
}

pub struct MicrosoftCalendarConnector {
    http: Client,
    settings: MicrosoftCalendarSettings,
}

impl MicrosoftCalendarConnector {
    pub fn new(settings: MicrosoftCalendarSettings) -> Result<Self, ConnectorError> {
        Ok(Self {
            http: build_client(settings.timeout)?,
            settings,
        })
    }

    fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.settings.login_base.trim_end_matches('/'),
            self.settings.tenant_id
        )
    }

    fn graph_url(&self, path: &str) -> String {
        format!("{}/{}", self.settings.graph_base.trim_end_matches('/'), path)
    }

    fn graph_get(&self, url: &str, access_token: &str) -> RequestBuilder {
        self.http
            .get(url)
            .bearer_auth(access_token)
            .header("Prefer", PREFER_UTC)
    }

    /// Only follow pagination links that stay on the configured Graph host, so
    /// the bearer token is never sent elsewhere.
    fn trusted_next_link(&self, link: &str) -> Result<String, ConnectorError> {
        let next = Url::parse(link).map_err(|e| {
            ConnectorError::MalformedResponse(format!("invalid @odata.nextLink: {e}"))
        })?;
        let base = Url::parse(&self.settings.graph_base).map_err(|e| {
            ConnectorError::InvalidRequest(format!("invalid Microsoft Graph base URL: {e}"))
        })?;
        if next.origin() != base.origin() {
            warn!(next_host = ?next.host_str(), "Ignoring cross-origin Graph pagination link");
            return Err(ConnectorError::MalformedResponse(
                "pagination link points outside Microsoft Graph".to_string(),
            ));
        }
        Ok(next.into())
    }
}

#[derive(Debug, Deserialize)]
struct EventsPage {
    #[serde(default)]
    value: Vec<GraphEvent>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphEvent {
    id: String,
    subject: Option<String>,
    body_preview: Option<String>,
    location: Option<Location>,
    start: Option<GraphDateTime>,
    end: Option<GraphDateTime>,
    organizer: Option<Recipient>,
    #[serde(default)]
    attendees: Vec<GraphAttendee>,
    #[serde(default)]
    is_all_day: bool,
    #[serde(default)]
    is_cancelled: bool,
    show_as: Option<String>,
    web_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphDateTime {
    date_time: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Location {
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Recipient {
    email_address: Option<EmailAddress>,
}

#[derive(Debug, Deserialize)]
struct EmailAddress {
    address: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphAttendee {
    email_address: Option<EmailAddress>,
    status: Option<ResponseStatus>,
}

#[derive(Debug, Deserialize)]
struct ResponseStatus {
    response: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphCalendar {
    id: String,
    name: Option<String>,
}

/// Graph returns `2025-03-01T09:00:00.0000000` when UTC is preferred.
fn parse_graph_time(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn normalize_response(response: Option<&str>) -> Option<String> {
    let normalized = match response? {
        "accepted" | "organizer" => "accepted",
        "declined" => "declined",
        "tentativelyAccepted" => "tentative",
        "none" | "notResponded" => "needsAction",
        other => return Some(other.to_string()),
    };
    Some(normalized.to_string())
}

fn normalize_status(event: &GraphEvent) -> String {
    if event.is_cancelled {
        "cancelled".to_string()
    } else if event.show_as.as_deref() == Some("tentative") {
        "tentative".to_string()
    } else {
        "confirmed".to_string()
    }
}

fn normalize_event(event: GraphEvent) -> Option<CalendarEvent> {
    let start_time = event
        .start
        .as_ref()
        .and_then(|start| parse_graph_time(&start.date_time));
    let end_time = event
        .end
        .as_ref()
        .and_then(|end| parse_graph_time(&end.date_time));
    let (Some(start_time), Some(end_time)) = (start_time, end_time) else {
        debug!(event_id = %event.id, "Skipping Graph event without parseable start/end");
        return None;
    };

    let status = normalize_status(&event);
    let (organizer_email, organizer_name) = event
        .organizer
        .and_then(|recipient| recipient.email_address)
        .map(|email| (email.address, email.name))
        .unwrap_or_default();

    let attendees = event
        .attendees
        .into_iter()
        .filter_map(|attendee| {
            let email = attendee.email_address?;
            Some(EventAttendee {
                email: email.address?,
                name: email.name,
                response_status: normalize_response(
                    attendee
                        .status
                        .as_ref()
                        .and_then(|status| status.response.as_deref()),
                ),
            })
        })
        .collect();

    Some(CalendarEvent {
        id: event.id,
        summary: event.subject,
        description: event.body_preview.filter(|body| !body.is_empty()),
        location: event
            .location
            .and_then(|location| location.display_name)
            .filter(|name| !name.is_empty()),
        start_time,
        end_time,
        organizer_email,
        organizer_name,
        attendees,
        is_all_day: event.is_all_day,
        status: Some(status),
        event_link: event.web_link,
    })
}

#[async_trait]
impl CalendarConnector for MicrosoftCalendarConnector {
    fn provider(&self) -> CalendarProvider {
        PROVIDER
    }

    #[instrument(skip_all, fields(provider = "microsoft"))]
    async fn exchange_code_for_tokens(
        &self,
        code: &str,
        redirect_uri: Option<&str>,
    ) -> Result<TokenSet, ConnectorError> {
        let redirect_uri = redirect_uri
            .filter(|uri| !uri.trim().is_empty())
            .ok_or_else(|| {
                ConnectorError::InvalidRequest(
                    "redirect_uri is required to exchange a Microsoft authorization code"
                        .to_string(),
                )
            })?;

        request_token(
            &self.http,
            PROVIDER,
            &self.token_url(),
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("client_id", &self.settings.client_id),
                ("client_secret", &self.settings.client_secret),
                ("scope", SCOPES),
            ],
        )
        .await
    }

    #[instrument(skip_all, fields(provider = "microsoft"))]
    async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenSet, ConnectorError> {
        request_token(
            &self.http,
            PROVIDER,
            &self.token_url(),
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", &self.settings.client_id),
                ("client_secret", &self.settings.client_secret),
                ("scope", SCOPES),
            ],
        )
        .await
    }

    #[instrument(skip_all, fields(provider = "microsoft"))]
    async fn fetch_events(
        &self,
        access_token: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>, ConnectorError> {
        let first_page = self.graph_get(&self.graph_url("me/calendarView"), access_token).query(&[
            (
                "startDateTime",
                start.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            ("endDateTime", end.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("$top", GRAPH_PAGE_SIZE.min(MAX_EVENTS_PER_FETCH).to_string()),
            ("$orderby", "start/dateTime".to_string()),
        ]);

        let mut events = Vec::new();
        let mut page: EventsPage = send_json(PROVIDER, first_page).await?;

        loop {
            events.extend(page.value.into_iter().filter_map(normalize_event));
            events.truncate(MAX_EVENTS_PER_FETCH);

            let next_link = match page.next_link {
                Some(link) if events.len() < MAX_EVENTS_PER_FETCH => {
                    self.trusted_next_link(&link)?
                }
                _ => break,
            };
            page = send_json(PROVIDER, self.graph_get(&next_link, access_token)).await?;
        }

        debug!(count = events.len(), "Fetched Microsoft calendar events");
        Ok(events)
    }

    async fn get_calendar_info(&self, access_token: &str) -> Result<CalendarInfo, ConnectorError> {
        let calendar: GraphCalendar = send_json(
            PROVIDER,
            self.graph_get(&self.graph_url("me/calendar"), access_token),
        )
        .await?;

        Ok(CalendarInfo {
            name: calendar.name.unwrap_or_else(|| "Calendar".to_string()),
            id: calendar.id,
        })
    }

    async fn validate_token(&self, access_token: &str) -> bool {
        let result: Result<serde_json::Value, _> = send_json(
            PROVIDER,
            self.http
                .get(self.graph_url("me"))
                .bearer_auth(access_token),
        )
        .await;

        match result {
            Ok(_) => true,
            Err(error) => {
                debug!(error = %error, "Microsoft token validation failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn connector(server: &MockServer) -> MicrosoftCalendarConnector {
        MicrosoftCalendarConnector::new(MicrosoftCalendarSettings {
            client_id: "ms-client".to_string(),
            client_secret: "ms-secret".to_string(),
            tenant_id: "common".to_string(),
            login_base: server.uri(),
            graph_base: format!("{}/v1.0", server.uri()),
            timeout: Duration::from_secs(5),
        })
        .expect("connector builds")
    }

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 12, 31, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_parse_graph_time_variants() {
        let expected = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        assert_eq!(parse_graph_time("2025-03-01T09:00:00.0000000"), Some(expected));
        assert_eq!(parse_graph_time("2025-03-01T09:00:00Z"), Some(expected));
        assert_eq!(parse_graph_time("not a time"), None);
    }

    #[test]
    fn test_response_status_normalization() {
        assert_eq!(
            normalize_response(Some("tentativelyAccepted")).as_deref(),
            Some("tentative")
        );
        assert_eq!(
            normalize_response(Some("notResponded")).as_deref(),
            Some("needsAction")
        );
        assert_eq!(
            normalize_response(Some("organizer")).as_deref(),
            Some("accepted")
        );
        assert_eq!(normalize_response(None), None);
    }

    #[tokio::test]
    async fn test_exchange_code_uses_tenant_endpoint_and_scopes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/common/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("scope=offline_access"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "ms-access",
                "refresh_token": "ms-refresh",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = connector(&server)
            .exchange_code_for_tokens("code", Some("https://app.example.com/callback"))
            .await
            .unwrap();

        assert_eq!(tokens.access_token, "ms-access");
        assert_eq!(tokens.refresh_token.as_deref(), Some("ms-refresh"));
    }

    #[tokio::test]
    async fn test_redirect_uri_mismatch_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/common/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "redirect_uri_mismatch",
                "error_description": "AADSTS50011"
            })))
            .mount(&server)
            .await;

        let result = connector(&server)
            .exchange_code_for_tokens("code", Some("https://evil.example.com"))
            .await;

        assert!(matches!(
            result,
            Err(ConnectorError::Rejected { ref code, .. }) if code == "redirect_uri_mismatch"
        ));
    }

    #[tokio::test]
    async fn test_fetch_events_follows_next_link() {
        let server = MockServer::start().await;
        let (start, end) = window();

        Mock::given(method("GET"))
            .and(path("/v1.0/me/calendarView"))
            .and(query_param("startDateTime", "2025-01-01T00:00:00Z"))
            .and(query_param("$orderby", "start/dateTime"))
            .and(header("prefer", PREFER_UTC))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [
                    {
                        "id": "ms-1",
                        "subject": "Planning",
                        "bodyPreview": "",
                        "start": {"dateTime": "2025-02-10T14:00:00.0000000", "timeZone": "UTC"},
                        "end": {"dateTime": "2025-02-10T15:00:00.0000000", "timeZone": "UTC"},
                        "isAllDay": false,
                        "isCancelled": false,
                        "showAs": "tentative",
                        "organizer": {"emailAddress": {"address": "boss@example.com", "name": "Boss"}},
                        "attendees": [
                            {
                                "emailAddress": {"address": "me@example.com", "name": "Me"},
                                "status": {"response": "tentativelyAccepted"}
                            }
                        ],
                        "location": {"displayName": "Room 1"},
                        "webLink": "https://outlook.office.com/ms-1"
                    }
                ],
                "@odata.nextLink": format!("{}/v1.0/me/calendarView/page2", server.uri())
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v1.0/me/calendarView/page2"))
            .and(header("prefer", PREFER_UTC))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [
                    {
                        "id": "ms-2",
                        "subject": "Holiday",
                        "start": {"dateTime": "2025-02-14T00:00:00.0000000", "timeZone": "UTC"},
                        "end": {"dateTime": "2025-02-15T00:00:00.0000000", "timeZone": "UTC"},
                        "isAllDay": true,
                        "isCancelled": true
                    }
                ]
            })))
            .mount(&server)
            .await;

        let events = connector(&server)
            .fetch_events("ms-access", start, end)
            .await
            .unwrap();

        assert_eq!(events.len(), 2);
        let planning = &events[0];
        assert_eq!(planning.status.as_deref(), Some("tentative"));
        assert_eq!(planning.description, None);
        assert_eq!(planning.location.as_deref(), Some("Room 1"));
        assert_eq!(planning.organizer_name.as_deref(), Some("Boss"));
        assert_eq!(
            planning.attendees[0].response_status.as_deref(),
            Some("tentative")
        );
        assert_eq!(
            planning.start_time,
            Utc.with_ymd_and_hms(2025, 2, 10, 14, 0, 0).unwrap()
        );

        let holiday = &events[1];
        assert!(holiday.is_all_day);
        assert_eq!(holiday.status.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn test_cross_origin_next_link_is_refused() {
        let server = MockServer::start().await;
        let (start, end) = window();
        Mock::given(method("GET"))
            .and(path("/v1.0/me/calendarView"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [],
                "@odata.nextLink": "https://attacker.example.com/steal"
            })))
            .mount(&server)
            .await;

        let result = connector(&server).fetch_events("token", start, end).await;

        assert!(matches!(result, Err(ConnectorError::MalformedResponse(_))));
    }

    #[tokio::test]
    async fn test_fetch_events_forbidden_is_unauthorized() {
        let server = MockServer::start().await;
        let (start, end) = window();
        Mock::given(method("GET"))
            .and(path("/v1.0/me/calendarView"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let result = connector(&server).fetch_events("token", start, end).await;

        assert_eq!(result, Err(ConnectorError::Unauthorized { status: 403 }));
    }

    #[tokio::test]
    async fn test_get_calendar_info_and_validate() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1.0/me/calendar"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "AAMkAD",
                "name": "Calendar"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1.0/me"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let connector = connector(&server);
        let info = connector.get_calendar_info("token").await.unwrap();
        assert_eq!(info.id, "AAMkAD");
        assert_eq!(info.name, "Calendar");
        assert!(!connector.validate_token("token").await);
    }
}
