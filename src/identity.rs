//! Caller identity for `/api` routes.
//!
//! The service sits behind the application's sign-in front end.  Each request
//! carries a bearer token (checked against the configured allowlist) and the
//! signed-in user's principal name in `x-user-email`.  Admin status is derived
//! from configuration, never from the request.

use std::collections::HashSet;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use sha2::{Digest, Sha256};

use crate::response::{ActionResponse, ActionStatus};
use crate::AppState;

pub const USER_EMAIL_HEADER: &str = "x-user-email";
pub const USER_NAME_HEADER: &str = "x-user-name";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    /// Hex SHA-256 of the principal name; used as owner id and partition key.
    pub hashed_id: String,
    pub email: String,
    pub name: String,
    pub is_admin: bool,
}

impl CurrentUser {
    pub fn new(email: &str, name: Option<&str>, admins: &HashSet<String>) -> Self {
        let email = email.trim().to_string();
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(&email)
            .to_string();
        Self {
            hashed_id: hash_value(&email),
            is_admin: admins.contains(&email.to_lowercase()),
            email,
            name,
        }
    }
}

pub fn hash_value(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

fn unauthorized(message: &str) -> Response {
    let body: ActionResponse<()> =
        ActionResponse::failure(ActionStatus::Unauthorized, vec![message.to_string()]);
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    let raw = headers.get("authorization")?.to_str().ok()?;
    if raw.len() < 7 || !raw[..6].eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = raw[6..].trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

fn ensure_authorized(
    headers: &HeaderMap,
    allowed_tokens: Option<&HashSet<String>>,
) -> Result<(), Response> {
    let token = extract_bearer_token(headers).ok_or_else(|| unauthorized("Unauthorized"))?;
    if let Some(tokens) = allowed_tokens {
        if !tokens.contains(token) {
            tracing::debug!("bearer token not in allowlist");
            return Err(unauthorized("Unauthorized"));
        }
    }
    Ok(())
}

#[axum::async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = authenticate(parts, state);
        if user.is_err() {
            state.metrics.record(ActionStatus::Unauthorized);
        }
        user
    }
}

fn authenticate(parts: &Parts, state: &AppState) -> Result<CurrentUser, Response> {
    ensure_authorized(&parts.headers, state.allowed_tokens.as_ref())?;
    let email = parts
        .headers
        .get(USER_EMAIL_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| unauthorized("Missing signed-in user"))?;
    let name = parts
        .headers
        .get(USER_NAME_HEADER)
        .and_then(|v| v.to_str().ok());
    Ok(CurrentUser::new(email, name, &state.admin_emails))
}
