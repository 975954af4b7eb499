//! # Error Handling
//!
//! Domain errors raised by the calendar service and their mapping onto a
//! `application/problem+json` response carrying the request trace id.

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use sea_orm::{DbErr, SqlErr};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::connectors::RegistryError;
use crate::repositories::ConnectionStoreError;
use crate::telemetry;

/// Errors returned by the calendar service operations.
#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    NotFound(String),
    #[error("calendar provider '{0}' is not implemented")]
    NotImplemented(String),
    /// Wraps any provider or storage failure raised while connecting
    #[error("failed to connect calendar: {0}")]
    ConnectFailed(String),
    /// Wraps any provider or storage failure raised while syncing
    #[error("failed to sync calendar: {0}")]
    SyncFailed(String),
    #[error(transparent)]
    Storage(#[from] DbErr),
}

impl From<RegistryError> for CalendarError {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::NotImplemented { name } => CalendarError::NotImplemented(name),
        }
    }
}

impl From<ConnectionStoreError> for CalendarError {
    fn from(error: ConnectionStoreError) -> Self {
        match error {
            ConnectionStoreError::NotFound(id) => {
                CalendarError::NotFound(format!("calendar connection '{id}' not found"))
            }
            ConnectionStoreError::Database(err) => CalendarError::Storage(err),
            ConnectionStoreError::Crypto(err) => CalendarError::InvalidInput(err.to_string()),
        }
    }
}

/// Problem+json error body
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,
    /// Machine readable code, e.g. `NOT_FOUND`
    pub code: Box<str>,
    pub message: Box<str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &str, message: &str) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            trace_id: trace_id_or_correlation(),
        }
    }
}

fn trace_id_or_correlation() -> Option<Box<str>> {
    let trace_id = telemetry::current_trace_id().unwrap_or_else(|| {
        let id = uuid::Uuid::new_v4().simple().to_string();
        format!("corr-{}", &id[..8])
    });
    Some(trace_id.into_boxed_str())
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        (self.status, headers, axum::Json(self)).into_response()
    }
}

/// True when `error` reports a unique or primary key constraint violation.
pub fn is_unique_violation(error: &DbErr) -> bool {
    matches!(error.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

impl From<CalendarError> for ApiError {
    fn from(error: CalendarError) -> Self {
        let message = error.to_string();
        match error {
            CalendarError::InvalidInput(_) => {
                Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", &message)
            }
            CalendarError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", &message),
            CalendarError::NotImplemented(_) => {
                Self::new(StatusCode::BAD_REQUEST, "PROVIDER_NOT_IMPLEMENTED", &message)
            }
            CalendarError::ConnectFailed(_) => {
                Self::new(StatusCode::BAD_REQUEST, "CONNECT_FAILED", &message)
            }
            CalendarError::SyncFailed(_) => {
                Self::new(StatusCode::BAD_REQUEST, "SYNC_FAILED", &message)
            }
            CalendarError::Storage(err) => err.into(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!(error = ?error, "Internal error");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "An internal error occurred",
        )
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {err}"),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {err}"),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", &message)
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            &format!("Invalid query string: {}", rejection.body_text()),
        )
    }
}

impl From<DbErr> for ApiError {
    fn from(error: DbErr) -> Self {
        if is_unique_violation(&error) {
            tracing::debug!(?error, "Unique constraint violation");
            return Self::new(StatusCode::CONFLICT, "CONFLICT", "Resource already exists");
        }

        match error {
            DbErr::RecordNotFound(record) => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                &format!("Record not found: {record}"),
            ),
            DbErr::Conn(err) => {
                tracing::error!(error = ?err, "Database connection error");
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Database service unavailable",
                )
            }
            other => {
                tracing::error!(error = ?other, "Database error");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Database error occurred",
                )
            }
        }
    }
}

/// 401 for requests without an authenticated user
pub fn unauthorized(message: Option<&str>) -> ApiError {
    ApiError::new(
        StatusCode::UNAUTHORIZED,
        "UNAUTHORIZED",
        message.unwrap_or("Authentication required"),
    )
}
