//! Shared HTTP plumbing for calendar providers: client construction, OAuth
//! token endpoint calls and classification of provider failures.

use std::time::Duration;

use chrono::Utc;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, de::DeserializeOwned};
use tracing::{debug, warn};

use super::trait_::{ConnectorError, TokenSet};
use crate::models::CalendarProvider;

const BODY_SNIPPET_LEN: usize = 200;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct OAuthErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

pub(crate) fn build_client(timeout: Duration) -> Result<Client, ConnectorError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ConnectorError::ProviderUnavailable(format!("failed to build HTTP client: {e}")))
}

/// POSTs a form to an OAuth token endpoint and parses the issued tokens.
pub(crate) async fn request_token(
    client: &Client,
    provider: CalendarProvider,
    token_url: &str,
    form: &[(&str, &str)],
) -> Result<TokenSet, ConnectorError> {
    let response = client
        .post(token_url)
        .form(form)
        .send()
        .await
        .map_err(|e| transport_error(provider, e))?;

    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|e| transport_error(provider, e))?;

    if !status.is_success() {
        return Err(classify_token_error(
            provider,
            status,
            &String::from_utf8_lossy(&body),
        ));
    }

    let token: TokenResponse = serde_json::from_slice(&body).map_err(|e| {
        ConnectorError::MalformedResponse(format!("{provider} token response: {e}"))
    })?;

    if token.access_token.is_empty() {
        return Err(ConnectorError::MalformedResponse(format!(
            "{provider} issued an empty access token"
        )));
    }

    Ok(TokenSet {
        access_token: token.access_token,
        refresh_token: token.refresh_token.filter(|t| !t.is_empty()),
        expires_at: token
            .expires_in
            .map(|seconds| Utc::now() + chrono::Duration::seconds(seconds)),
    })
}

/// Maps a failed token endpoint response to the connector error taxonomy.
///
/// Known OAuth error codes become [`ConnectorError::Rejected`] with a message
/// the user can act on; everything else is treated as the provider being unavailable.
pub(crate) fn classify_token_error(
    provider: CalendarProvider,
    status: StatusCode,
    body: &str,
) -> ConnectorError {
    let parsed: OAuthErrorBody = serde_json::from_str(body).unwrap_or_default();
    let code = parsed.error.unwrap_or_default();

    let message = match code.as_str() {
        "invalid_request" => Some(format!(
            "{provider} rejected the authorization request as malformed; restart the calendar connection flow"
        )),
        "invalid_grant" => Some(format!(
            "{provider} rejected the authorization grant because the code or refresh token is invalid, expired or revoked; reconnect the calendar"
        )),
        "redirect_uri_mismatch" => Some(format!(
            "the redirect URI does not match the one registered for the {provider} OAuth client"
        )),
        _ => None,
    };

    match message {
        Some(message) => {
            debug!(
                provider = %provider,
                code = %code,
                description = parsed.error_description.as_deref().unwrap_or_default(),
                "Provider rejected OAuth grant"
            );
            ConnectorError::Rejected { code, message }
        }
        None => {
            warn!(
                provider = %provider,
                status = status.as_u16(),
                "Token endpoint failed with an unrecognized error"
            );
            ConnectorError::ProviderUnavailable(format!(
                "{provider} token endpoint returned HTTP {}: {}",
                status.as_u16(),
                snippet(body)
            ))
        }
    }
}

/// Sends an authenticated calendar API request and decodes the JSON body.
///
/// 401 and 403 map to [`ConnectorError::Unauthorized`] so callers can refresh
/// and retry; any other non-2xx status is [`ConnectorError::ProviderUnavailable`].
pub(crate) async fn send_json<T: DeserializeOwned>(
    provider: CalendarProvider,
    request: RequestBuilder,
) -> Result<T, ConnectorError> {
    let response = request
        .send()
        .await
        .map_err(|e| transport_error(provider, e))?;

    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(ConnectorError::Unauthorized {
            status: status.as_u16(),
        });
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| transport_error(provider, e))?;

    if !status.is_success() {
        return Err(ConnectorError::ProviderUnavailable(format!(
            "{provider} API returned HTTP {}: {}",
            status.as_u16(),
            snippet(&String::from_utf8_lossy(&body))
        )));
    }

    serde_json::from_slice(&body)
        .map_err(|e| ConnectorError::MalformedResponse(format!("{provider} API response: {e}")))
}

pub(crate) fn transport_error(provider: CalendarProvider, error: reqwest::Error) -> ConnectorError {
    if error.is_timeout() {
        ConnectorError::ProviderUnavailable(format!("{provider} request timed out"))
    } else {
        ConnectorError::ProviderUnavailable(format!("{provider} request failed: {error}"))
    }
}

fn snippet(body: &str) -> String {
    if body.chars().count() > BODY_SNIPPET_LEN {
        let truncated: String = body.chars().take(BODY_SNIPPET_LEN).collect();
        format!("{truncated}...")
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes_are_rejections() {
        for code in ["invalid_request", "invalid_grant", "redirect_uri_mismatch"] {
            let body = format!(r#"{{"error":"{code}","error_description":"nope"}}"#);
            let error =
                classify_token_error(CalendarProvider::Google, StatusCode::BAD_REQUEST, &body);
            match error {
                ConnectorError::Rejected { code: got, message } => {
                    assert_eq!(got, code);
                    assert!(!message.is_empty());
                }
                other => panic!("expected rejection for {code}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_unknown_code_is_unavailable() {
        let error = classify_token_error(
            CalendarProvider::Microsoft,
            StatusCode::BAD_REQUEST,
            r#"{"error":"temporarily_unavailable"}"#,
        );
        assert!(matches!(error, ConnectorError::ProviderUnavailable(_)));
    }

    #[test]
    fn test_unparseable_body_is_unavailable() {
        let error = classify_token_error(
            CalendarProvider::Google,
            StatusCode::BAD_GATEWAY,
            "<html>bad gateway</html>",
        );
        assert!(matches!(error, ConnectorError::ProviderUnavailable(_)));
    }

    #[test]
    fn test_snippet_truncates_long_bodies() {
        let long = "x".repeat(500);
        assert_eq!(snippet(&long).len(), BODY_SNIPPET_LEN + 3);
        assert_eq!(snippet("short"), "short");
    }
}
