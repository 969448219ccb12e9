use chrono::Utc;

use super::{encode, find_visible, Backends};
use crate::audit::AuditAction;
use crate::identity::CurrentUser;
use crate::models::{
    unique_id, ChatThreadModel, DocumentKind, ExtensionModel, PersonaModel, CHAT_DEFAULT_PERSONA,
};
use crate::response::ServiceError;

const KIND: DocumentKind = DocumentKind::ChatThread;

/// Bootstraps chat threads from a persona or an extension the caller can read.
#[derive(Clone)]
pub struct ChatService {
    backends: Backends,
}

impl ChatService {
    pub fn new(backends: Backends) -> Self {
        Self { backends }
    }

    pub async fn create_with_persona(
        &self,
        user: &CurrentUser,
        persona_id: &str,
    ) -> Result<ChatThreadModel, ServiceError> {
        let persona: PersonaModel =
            find_visible(self.backends.store.as_ref(), DocumentKind::Persona, persona_id, user)
                .await?
                .model;
        let thread = self.new_thread(
            user,
            persona.name.clone(),
            persona.persona_message,
            persona.name,
            Vec::new(),
        );
        self.save(user, thread).await
    }

    pub async fn create_with_extension(
        &self,
        user: &CurrentUser,
        extension_id: &str,
    ) -> Result<ChatThreadModel, ServiceError> {
        let extension: ExtensionModel = find_visible(
            self.backends.store.as_ref(),
            DocumentKind::Extension,
            extension_id,
            user,
        )
        .await?
        .model;
        let thread = self.new_thread(
            user,
            extension.name,
            String::new(),
            CHAT_DEFAULT_PERSONA.to_string(),
            vec![extension.id],
        );
        self.save(user, thread).await
    }

    fn new_thread(
        &self,
        user: &CurrentUser,
        name: String,
        persona_message: String,
        persona_message_title: String,
        extension: Vec<String>,
    ) -> ChatThreadModel {
        let now = Utc::now();
        ChatThreadModel {
            id: unique_id(),
            name,
            use_name: user.name.clone(),
            user_id: user.hashed_id.clone(),
            created_at: now,
            last_message_at: now,
            bookmarked: false,
            is_deleted: false,
            kind: KIND,
            persona_message,
            persona_message_title,
            extension,
        }
    }

    async fn save(
        &self,
        user: &CurrentUser,
        thread: ChatThreadModel,
    ) -> Result<ChatThreadModel, ServiceError> {
        self.backends
            .store
            .create(encode(KIND, &thread)?)
            .await
            .map_err(|e| ServiceError::store("Error creating Chat thread", e))?;
        tracing::info!(id = %thread.id, extensions = thread.extension.len(), "chat thread created");
        self.backends
            .audit(AuditAction::CreateChat, KIND, &thread.id, user);
        Ok(thread)
    }
}
