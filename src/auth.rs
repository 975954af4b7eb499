//! # Caller Identity
//!
//! End-user authentication happens upstream; the gateway forwards the
//! authenticated user id in the `X-User-Id` header and this service trusts it.

use axum::{extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};
use utoipa::IntoParams;

use crate::error::{ApiError, unauthorized};

pub const USER_ID_HEADER: &str = "X-User-Id";

/// Authenticated user id taken from the `X-User-Id` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

impl AuthenticatedUser {
    pub fn id(&self) -> &str {
        &self.0
    }
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| unauthorized(Some("Missing X-User-Id header")))?
            .to_str()
            .map_err(|_| unauthorized(Some("X-User-Id header must be valid UTF-8")))?
            .trim();

        if value.is_empty() {
            return Err(unauthorized(Some("X-User-Id header must not be empty")));
        }
        Ok(AuthenticatedUser(value.to_string()))
    }
}

/// OpenAPI header parameter for `X-User-Id`
#[derive(Debug, Serialize, Deserialize, IntoParams)]
#[into_params(parameter_in = Header)]
pub struct UserHeader {
    /// Opaque id of the authenticated end user
    #[serde(rename = "X-User-Id")]
    #[param(rename = "X-User-Id")]
    pub user_id: String,
}
