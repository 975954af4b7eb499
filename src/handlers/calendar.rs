//! # Calendar API Handlers
//!
//! Connect, disconnect, status, sync and event routes for the authenticated
//! user. All business rules live in the calendar service.

use axum::{
    extract::{Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};

use crate::auth::{AuthenticatedUser, UserHeader};
use crate::calendar::{ConnectRequest, ConnectionView, EventView, ProviderQuery, SyncRequest};
use crate::error::ApiError;
use crate::server::AppState;

/// Links a calendar account using an OAuth authorization code
#[utoipa::path(
    post,
    path = "/calendar/connect",
    params(UserHeader),
    request_body = ConnectRequest,
    responses(
        (status = 200, description = "Connection created or updated", body = ConnectionView),
        (status = 400, description = "Invalid request or provider rejected the grant", body = ApiError),
        (status = 401, description = "Missing user id", body = ApiError)
    ),
    tag = "calendar"
)]
pub async fn connect(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    payload: Result<Json<ConnectRequest>, JsonRejection>,
) -> Result<Json<ConnectionView>, ApiError> {
    let Json(request) = payload?;
    let view = state.calendar.connect(user.id(), request).await?;
    Ok(Json(view))
}

/// Removes one connection, or every connection when no provider is given
#[utoipa::path(
    delete,
    path = "/calendar/connections",
    params(UserHeader, ProviderQuery),
    responses(
        (status = 204, description = "Connection(s) removed"),
        (status = 401, description = "Missing user id", body = ApiError),
        (status = 404, description = "No matching connection", body = ApiError)
    ),
    tag = "calendar"
)]
pub async fn disconnect(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ProviderQuery>,
) -> Result<StatusCode, ApiError> {
    state
        .calendar
        .disconnect(user.id(), query.provider.as_deref())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Lists stored connections without credentials
#[utoipa::path(
    get,
    path = "/calendar/connections",
    params(UserHeader, ProviderQuery),
    responses(
        (status = 200, description = "Connections of the user", body = [ConnectionView]),
        (status = 401, description = "Missing user id", body = ApiError),
        (status = 404, description = "No connection for the requested provider", body = ApiError)
    ),
    tag = "calendar"
)]
pub async fn list_connections(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ProviderQuery>,
) -> Result<Json<Vec<ConnectionView>>, ApiError> {
    let connections = state
        .calendar
        .get_connection_statuses(user.id(), query.provider.as_deref())
        .await?;
    Ok(Json(connections))
}

/// Fetches and merges events from the user's connected calendars
#[utoipa::path(
    post,
    path = "/calendar/sync",
    params(UserHeader, ProviderQuery),
    request_body = SyncRequest,
    responses(
        (status = 200, description = "Events ordered by start time", body = [EventView]),
        (status = 400, description = "Sync failed or invalid window", body = ApiError),
        (status = 401, description = "Missing user id", body = ApiError),
        (status = 404, description = "No active connection", body = ApiError)
    ),
    tag = "calendar"
)]
pub async fn sync(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ProviderQuery>,
    payload: Result<Json<SyncRequest>, JsonRejection>,
) -> Result<Json<Vec<EventView>>, ApiError> {
    let Json(request) = payload?;
    let events = state
        .calendar
        .sync(user.id(), request, query.provider.as_deref())
        .await?;
    Ok(Json(events))
}

/// Cached-first view of the user's events
#[utoipa::path(
    get,
    path = "/calendar/events",
    params(UserHeader, ProviderQuery),
    responses(
        (status = 200, description = "Events ordered by start time", body = [EventView]),
        (status = 401, description = "Missing user id", body = ApiError),
        (status = 404, description = "No active connection", body = ApiError)
    ),
    tag = "calendar"
)]
pub async fn events(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ProviderQuery>,
) -> Result<Json<Vec<EventView>>, ApiError> {
    let events = state
        .calendar
        .get_events(user.id(), query.provider.as_deref())
        .await?;
    Ok(Json(events))
}
