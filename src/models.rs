//! Document shapes persisted in the shared container.
//!
//! Every record kind is discriminated by its `type` field and partitioned by
//! the owner's hashed id (`userId`).  Field names follow the persisted JSON
//! (camelCase) so documents written by other clients of the same container
//! deserialize unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const PERSONA_ATTRIBUTE: &str = "PERSONA";
pub const EXTENSION_ATTRIBUTE: &str = "EXTENSION";
pub const CHAT_THREAD_ATTRIBUTE: &str = "CHAT_THREAD";

/// Sentinel stored in place of a header value once the real value lives in
/// the vault.
pub const KEY_VAULT_MASK: &str = "**********";

/// Title used for chat threads that do not start from a persona.
pub const CHAT_DEFAULT_PERSONA: &str = "Default";

/// Discriminator for the record kinds sharing one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentKind {
    Persona,
    Extension,
    ChatThread,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Persona => PERSONA_ATTRIBUTE,
            DocumentKind::Extension => EXTENSION_ATTRIBUTE,
            DocumentKind::ChatThread => CHAT_THREAD_ATTRIBUTE,
        }
    }

    /// Human readable label used in error messages ("Persona not found ...").
    pub fn label(&self) -> &'static str {
        match self {
            DocumentKind::Persona => "Persona",
            DocumentKind::Extension => "Extension",
            DocumentKind::ChatThread => "Chat thread",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            PERSONA_ATTRIBUTE => Some(DocumentKind::Persona),
            EXTENSION_ATTRIBUTE => Some(DocumentKind::Extension),
            CHAT_THREAD_ATTRIBUTE => Some(DocumentKind::ChatThread),
            _ => None,
        }
    }
}

/// A directory principal a record is shared with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SharePrincipal {
    pub id: String,
    pub display_name: String,
    pub user_principal_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaModel {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    pub name: String,
    pub description: String,
    pub persona_message: String,
    #[serde(default)]
    pub is_published: bool,
    #[serde(rename = "type", default = "persona_kind")]
    pub kind: DocumentKind,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub share_with: Vec<SharePrincipal>,
}

fn persona_kind() -> DocumentKind {
    DocumentKind::Persona
}

/// An outbound HTTP header attached to every function call of an extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct HeaderModel {
    #[serde(default)]
    pub id: String,
    pub key: String,
    pub value: String,
}

impl HeaderModel {
    pub fn is_masked(&self) -> bool {
        self.value == KEY_VAULT_MASK
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EndpointType {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl EndpointType {
    pub fn as_method(&self) -> reqwest::Method {
        match self {
            EndpointType::Get => reqwest::Method::GET,
            EndpointType::Post => reqwest::Method::POST,
            EndpointType::Put => reqwest::Method::PUT,
            EndpointType::Patch => reqwest::Method::PATCH,
            EndpointType::Delete => reqwest::Method::DELETE,
        }
    }
}

/// A callable function.  `code` holds the JSON schema the model sees; its
/// `name` property identifies the function within the extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionFunctionModel {
    #[serde(default)]
    pub id: String,
    pub code: String,
    pub endpoint: String,
    pub endpoint_type: EndpointType,
    /// Whether the call requires user confirmation before it runs.
    #[serde(default)]
    pub is_open: bool,
}

impl ExtensionFunctionModel {
    /// The `name` declared by the function schema, if `code` parses and
    /// declares a string name.
    pub fn schema_name(&self) -> Option<String> {
        let schema: serde_json::Value = serde_json::from_str(&self.code).ok()?;
        schema
            .get("name")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionModel {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    pub name: String,
    pub description: String,
    pub execution_steps: String,
    #[serde(default)]
    pub is_published: bool,
    #[serde(rename = "type", default = "extension_kind")]
    pub kind: DocumentKind,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub headers: Vec<HeaderModel>,
    #[serde(default)]
    pub functions: Vec<ExtensionFunctionModel>,
    #[serde(default)]
    pub share_with: Vec<SharePrincipal>,
}

fn extension_kind() -> DocumentKind {
    DocumentKind::Extension
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatThreadModel {
    pub id: String,
    pub name: String,
    pub use_name: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub last_message_at: DateTime<Utc>,
    pub bookmarked: bool,
    pub is_deleted: bool,
    #[serde(rename = "type", default = "chat_thread_kind")]
    pub kind: DocumentKind,
    pub persona_message: String,
    pub persona_message_title: String,
    #[serde(default)]
    pub extension: Vec<String>,
}

fn chat_thread_kind() -> DocumentKind {
    DocumentKind::ChatThread
}

/// Common view over shareable records used by the access-control checks.
pub trait Shareable {
    fn owner(&self) -> &str;
    fn is_published(&self) -> bool;
    fn share_with(&self) -> &[SharePrincipal];

    /// Read predicate: owner, or published and shared with `principal`.
    fn is_visible_to(&self, user_id: &str, principal: &str) -> bool {
        self.owner() == user_id
            || (self.is_published()
                && self
                    .share_with()
                    .iter()
                    .any(|sw| sw.user_principal_name == principal))
    }
}

impl Shareable for PersonaModel {
    fn owner(&self) -> &str {
        &self.user_id
    }
    fn is_published(&self) -> bool {
        self.is_published
    }
    fn share_with(&self) -> &[SharePrincipal] {
        &self.share_with
    }
}

impl Shareable for ExtensionModel {
    fn owner(&self) -> &str {
        &self.user_id
    }
    fn is_published(&self) -> bool {
        self.is_published
    }
    fn share_with(&self) -> &[SharePrincipal] {
        &self.share_with
    }
}

/// Fresh document id.  Simple (dash-free) form so it is also a valid vault
/// secret name.
pub fn unique_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extension_document_uses_persisted_field_names() {
        let doc = json!({
            "id": "e1",
            "userId": "owner",
            "name": "Weather",
            "description": "Forecasts",
            "executionSteps": "call it",
            "isPublished": true,
            "type": "EXTENSION",
            "createdAt": "2024-05-01T10:00:00Z",
            "headers": [{"id": "h1", "key": "x-api-key", "value": "**********"}],
            "functions": [{
                "id": "f1",
                "code": "{\"name\":\"get_weather\"}",
                "endpoint": "https://api.example.com/weather",
                "endpointType": "GET",
                "isOpen": false
            }],
            "shareWith": [{"id": "u1", "displayName": "Bea", "userPrincipalName": "b@x.com"}]
        });
        let ext: ExtensionModel = serde_json::from_value(doc.clone()).unwrap();
        assert_eq!(ext.kind, DocumentKind::Extension);
        assert!(ext.headers[0].is_masked());
        assert_eq!(ext.functions[0].endpoint_type, EndpointType::Get);
        assert_eq!(ext.functions[0].schema_name().as_deref(), Some("get_weather"));
        assert_eq!(serde_json::to_value(&ext).unwrap(), doc);
    }

    #[test]
    fn visibility_requires_publish_for_shared_principals() {
        let mut persona = PersonaModel {
            id: "p1".into(),
            user_id: "owner-a".into(),
            name: "n".into(),
            description: "d".into(),
            persona_message: "m".into(),
            is_published: false,
            kind: DocumentKind::Persona,
            created_at: Utc::now(),
            share_with: vec![SharePrincipal {
                id: "b".into(),
                display_name: "B".into(),
                user_principal_name: "b@x.com".into(),
            }],
        };
        assert!(persona.is_visible_to("owner-a", "a@x.com"));
        assert!(!persona.is_visible_to("user-b", "b@x.com"));
        assert!(!persona.is_visible_to("user-c", "c@x.com"));

        persona.is_published = true;
        assert!(persona.is_visible_to("user-b", "b@x.com"));
        assert!(!persona.is_visible_to("user-c", "c@x.com"));
    }

    #[test]
    fn unique_ids_are_vault_safe() {
        let id = unique_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
