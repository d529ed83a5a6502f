//! HTTP handlers: registration, login, health and metrics.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::header::{CONTENT_TYPE, SET_COOKIE};
use axum::http::StatusCode;
use axum::response::{AppendHeaders, IntoResponse};
use axum::Json;
use metrics::counter;
use parlor_core::StoreError;
use parlor_telemetry::metrics::{AUTH_LOGINS_TOTAL, AUTH_REGISTRATIONS_TOTAL};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ApiError;
use crate::server::AppState;

/// Bytes that may not appear raw in a cookie value. Non-ASCII is always
/// encoded.
const COOKIE_VALUE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b',')
    .add(b';')
    .add(b'\\')
    .add(b'%');

/// Body of `POST /register` and `POST /login`.
#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Health check response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    pub uptime_secs: u64,
    /// Live hub connections.
    pub connections: usize,
}

fn parse_credentials(payload: Result<Json<Credentials>, JsonRejection>) -> Result<Credentials, ApiError> {
    let Json(creds) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    Ok(creds)
}

fn require_fields(creds: &Credentials) -> Result<(), ApiError> {
    if creds.username.is_empty() {
        return Err(ApiError::bad_request("username must not be empty"));
    }
    if creds.password.is_empty() {
        return Err(ApiError::bad_request("password must not be empty"));
    }
    Ok(())
}

/// `Set-Cookie` value for a logged-in user. The name is percent-encoded so
/// any registered username yields a well-formed header.
pub fn session_cookie(username: &str) -> String {
    format!(
        "username={}; Path=/; SameSite=Lax",
        utf8_percent_encode(username, COOKIE_VALUE)
    )
}

/// POST /register
pub(crate) async fn register(
    State(state): State<AppState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let creds = parse_credentials(payload)?;
    require_fields(&creds)?;

    match state.auth.register(&creds.username, &creds.password).await {
        Ok(()) => {
            counter!(AUTH_REGISTRATIONS_TOTAL, "outcome" => "created").increment(1);
            info!(username = %creds.username, "user registered");
            Ok(StatusCode::CREATED)
        }
        Err(StoreError::Conflict(_)) => {
            counter!(AUTH_REGISTRATIONS_TOTAL, "outcome" => "taken").increment(1);
            Err(ApiError::UsernameTaken)
        }
        Err(e) => {
            counter!(AUTH_REGISTRATIONS_TOTAL, "outcome" => "error").increment(1);
            Err(ApiError::Internal(e.to_string()))
        }
    }
}

/// POST /login
pub(crate) async fn login(
    State(state): State<AppState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let creds = parse_credentials(payload)?;
    if !state.auth.verify(&creds.username, &creds.password).await {
        counter!(AUTH_LOGINS_TOTAL, "outcome" => "rejected").increment(1);
        warn!(username = %creds.username, "login rejected");
        return Err(ApiError::InvalidCredentials);
    }

    counter!(AUTH_LOGINS_TOTAL, "outcome" => "ok").increment(1);
    info!(username = %creds.username, "user logged in");
    Ok((
        StatusCode::OK,
        AppendHeaders([(SET_COOKIE, session_cookie(&creds.username))]),
    ))
}

/// GET /health
pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        connections: state.hub.connection_count(),
    })
}

/// GET /metrics
pub(crate) async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
