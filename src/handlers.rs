//! HTTP handlers for the `/api` routes.  Each one resolves the caller, runs a
//! service operation and answers with an `ActionResponse`.

use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::{Form, Json};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identity::CurrentUser;
use crate::models::{
    DocumentKind, ExtensionFunctionModel, ExtensionModel, HeaderModel, PersonaModel,
    SharePrincipal,
};
use crate::response::{respond, ServiceError};
use crate::AppState;

fn finish<T: Serialize>(state: &AppState, result: Result<T, ServiceError>) -> Response {
    let status = match &result {
        Ok(_) => crate::response::ActionStatus::Ok,
        Err(err) => err.status(),
    };
    state.metrics.record(status);
    respond(result)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaForm {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub persona_message: String,
    #[serde(default)]
    pub is_published: Option<String>,
    #[serde(default)]
    pub share_with: Option<String>,
}

impl PersonaForm {
    fn into_model(self) -> PersonaModel {
        PersonaModel {
            id: self.id.trim().to_string(),
            user_id: String::new(),
            name: self.name,
            description: self.description,
            persona_message: self.persona_message,
            is_published: checkbox(self.is_published.as_deref()),
            kind: DocumentKind::Persona,
            created_at: Utc::now(),
            share_with: parse_share_with(self.share_with.as_deref()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionForm {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub execution_steps: String,
    #[serde(default)]
    pub is_published: Option<String>,
    #[serde(default)]
    pub share_with: Option<String>,
    #[serde(default)]
    pub headers: Option<String>,
    #[serde(default)]
    pub functions: Option<String>,
}

impl ExtensionForm {
    fn into_model(self) -> Result<ExtensionModel, ServiceError> {
        let mut errors = Vec::new();
        let headers: Vec<HeaderModel> = parse_json_field("headers", self.headers.as_deref(), &mut errors);
        let functions: Vec<ExtensionFunctionModel> =
            parse_json_field("functions", self.functions.as_deref(), &mut errors);
        if !errors.is_empty() {
            return Err(ServiceError::Validation(errors));
        }
        Ok(ExtensionModel {
            id: self.id.trim().to_string(),
            user_id: String::new(),
            name: self.name,
            description: self.description,
            execution_steps: self.execution_steps,
            is_published: checkbox(self.is_published.as_deref()),
            kind: DocumentKind::Extension,
            created_at: Utc::now(),
            headers,
            functions,
            share_with: parse_share_with(self.share_with.as_deref()),
        })
    }
}

/// HTML checkbox semantics: present as "on" when ticked.
fn checkbox(value: Option<&str>) -> bool {
    matches!(value.map(str::trim), Some("on") | Some("true"))
}

/// Lenient share list: malformed JSON yields an empty list and entries
/// missing any of the three string fields are dropped.
fn parse_share_with(raw: Option<&str>) -> Vec<SharePrincipal> {
    let raw = match raw.map(str::trim) {
        Some(r) if !r.is_empty() => r,
        _ => return Vec::new(),
    };
    let entries: Vec<Value> = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "ignoring malformed shareWith");
            return Vec::new();
        }
    };
    entries
        .into_iter()
        .filter_map(|entry| {
            let field = |name: &str| entry.get(name)?.as_str().map(str::to_string);
            Some(SharePrincipal {
                id: field("id")?,
                display_name: field("displayName")?,
                user_principal_name: field("userPrincipalName")?,
            })
        })
        .collect()
}

fn parse_json_field<T: DeserializeOwned>(
    name: &str,
    raw: Option<&str>,
    errors: &mut Vec<String>,
) -> Vec<T> {
    match raw.map(str::trim) {
        Some(r) if !r.is_empty() => serde_json::from_str(r).unwrap_or_else(|e| {
            errors.push(format!("Invalid {}: {}", name, e));
            Vec::new()
        }),
        _ => Vec::new(),
    }
}

pub(crate) async fn list_personas(State(state): State<AppState>, user: CurrentUser) -> Response {
    let result = state.personas.list_for_user(&user).await;
    finish(&state, result)
}

pub(crate) async fn save_persona(
    State(state): State<AppState>,
    user: CurrentUser,
    Form(form): Form<PersonaForm>,
) -> Response {
    let result = state.personas.add_or_update(&user, form.into_model()).await;
    finish(&state, result)
}

pub(crate) async fn find_persona(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Response {
    let result = state.personas.find_by_id(&user, &id).await;
    finish(&state, result)
}

pub(crate) async fn delete_persona(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Response {
    let result = state.personas.delete(&user, &id).await;
    finish(&state, result)
}

pub(crate) async fn chat_with_persona(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Response {
    let result = state.chats.create_with_persona(&user, &id).await;
    finish(&state, result)
}

pub(crate) async fn list_extensions(State(state): State<AppState>, user: CurrentUser) -> Response {
    let result = state.extensions.list_for_user(&user).await;
    finish(&state, result)
}

pub(crate) async fn save_extension(
    State(state): State<AppState>,
    user: CurrentUser,
    Form(form): Form<ExtensionForm>,
) -> Response {
    let result = match form.into_model() {
        Ok(model) => state.extensions.add_or_update(&user, model).await,
        Err(e) => Err(e),
    };
    finish(&state, result)
}

pub(crate) async fn find_extension(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Response {
    let result = state.extensions.find_by_id(&user, &id).await;
    finish(&state, result)
}

pub(crate) async fn delete_extension(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Response {
    let result = state.extensions.delete(&user, &id).await;
    finish(&state, result)
}

pub(crate) async fn chat_with_extension(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Response {
    let result = state.chats.create_with_extension(&user, &id).await;
    finish(&state, result)
}

pub(crate) async fn invoke_function(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((id, name)): Path<(String, String)>,
    args: Option<Json<Value>>,
) -> Response {
    let args = args.map(|Json(v)| v).unwrap_or(Value::Null);
    let result = state.invoker.invoke(&user, &id, &name, args).await;
    finish(&state, result)
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub search: String,
}

pub(crate) async fn search_users(
    State(state): State<AppState>,
    _user: CurrentUser,
    Query(q): Query<SearchQuery>,
) -> Response {
    let result = state.directory.search(&q.search).await.map_err(|e| {
        tracing::warn!(code = e.status(), error = %e, "directory search failed");
        ServiceError::from(e)
    });
    finish(&state, result)
}

pub(crate) async fn list_members(State(state): State<AppState>, _user: CurrentUser) -> Response {
    let result = state.directory.list_members().await.map_err(|e| {
        tracing::warn!(code = e.status(), error = %e, "directory member listing failed");
        ServiceError::from(e)
    });
    finish(&state, result)
}
