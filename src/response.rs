//! Uniform result shape returned by every server action.
//!
//! Operations return `Result<T, ServiceError>`; the HTTP layer turns both arms
//! into an `ActionResponse` carrying a status tag and a list of human readable
//! messages which clients render verbatim.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::directory::DirectoryError;
use crate::store::StoreError;
use crate::vault::VaultError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    Ok,
    Error,
    NotFound,
    Unauthorized,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionError {
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionResponse<T> {
    pub status: ActionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<T>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ActionError>,
}

impl<T> ActionResponse<T> {
    pub fn ok(response: T) -> Self {
        Self {
            status: ActionStatus::Ok,
            response: Some(response),
            errors: Vec::new(),
        }
    }

    pub fn failure(status: ActionStatus, messages: Vec<String>) -> Self {
        Self {
            status,
            response: None,
            errors: messages
                .into_iter()
                .map(|message| ActionError { message })
                .collect(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{}", .0.join("; "))]
    Validation(Vec<String>),
    #[error("{0}")]
    NotFound(String),
    /// Carries the same message a not-found would, so callers cannot probe
    /// for ids they do not own.
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{context}: {source}")]
    Store {
        context: String,
        #[source]
        source: StoreError,
    },
    #[error("{context}: {source}")]
    Vault {
        context: String,
        #[source]
        source: VaultError,
    },
    #[error("Error fetching users from AD: {0}")]
    Directory(#[from] DirectoryError),
    #[error("{0}")]
    Upstream(String),
}

impl ServiceError {
    pub fn store(context: impl Into<String>, source: StoreError) -> Self {
        let context = context.into();
        match source {
            StoreError::PreconditionFailed { id } => ServiceError::Conflict(format!(
                "{}: record {} was modified by another request, reload and try again",
                context, id
            )),
            source => ServiceError::Store { context, source },
        }
    }

    pub fn vault(context: impl Into<String>, source: VaultError) -> Self {
        ServiceError::Vault {
            context: context.into(),
            source,
        }
    }

    pub fn status(&self) -> ActionStatus {
        match self {
            ServiceError::NotFound(_) => ActionStatus::NotFound,
            ServiceError::Unauthorized(_) => ActionStatus::Unauthorized,
            _ => ActionStatus::Error,
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Unauthorized(_) => StatusCode::FORBIDDEN,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::Store { .. }
            | ServiceError::Vault { .. }
            | ServiceError::Directory(_)
            | ServiceError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn messages(&self) -> Vec<String> {
        match self {
            ServiceError::Validation(msgs) => msgs.clone(),
            other => vec![other.to_string()],
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let code = self.http_status();
        let body: ActionResponse<()> = ActionResponse::failure(self.status(), self.messages());
        (code, Json(body)).into_response()
    }
}

/// Converts an operation outcome into the HTTP response.
pub fn respond<T: Serialize>(result: Result<T, ServiceError>) -> Response {
    match result {
        Ok(value) => (StatusCode::OK, Json(ActionResponse::ok(value))).into_response(),
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_tags_serialize_in_upper_case() {
        let body: ActionResponse<()> =
            ActionResponse::failure(ActionStatus::NotFound, vec!["gone".into()]);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"status": "NOT_FOUND", "errors": [{"message": "gone"}]})
        );
    }

    #[test]
    fn precondition_failures_become_conflicts() {
        let err = ServiceError::store(
            "Error updating Persona",
            StoreError::PreconditionFailed { id: "p1".into() },
        );
        assert_eq!(err.http_status(), StatusCode::CONFLICT);
        assert_eq!(err.status(), ActionStatus::Error);
        assert!(err.messages()[0].contains("p1"));
    }

    #[test]
    fn respond_uses_the_error_table() {
        assert_eq!(respond(Ok(1)).status(), StatusCode::OK);
        let cases = [
            (ServiceError::Validation(vec!["v".into()]), StatusCode::UNPROCESSABLE_ENTITY),
            (ServiceError::Conflict("c".into()), StatusCode::CONFLICT),
            (ServiceError::Upstream("u".into()), StatusCode::BAD_GATEWAY),
            (ServiceError::Unauthorized("x".into()), StatusCode::FORBIDDEN),
        ];
        for (err, code) in cases {
            assert_eq!(respond::<()>(Err(err)).status(), code);
        }
    }

    #[test]
    fn validation_keeps_every_message() {
        let err = ServiceError::Validation(vec!["a".into(), "b".into()]);
        assert_eq!(err.messages(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(err.http_status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
