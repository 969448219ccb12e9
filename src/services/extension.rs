use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;

use super::{ensure_operation, encode, find_visible, list_visible, Backends};
use crate::audit::AuditAction;
use crate::identity::CurrentUser;
use crate::models::{unique_id, DocumentKind, ExtensionModel, HeaderModel, KEY_VAULT_MASK};
use crate::response::ServiceError;
use crate::validation::validate_extension;
use crate::vault::SecretVault;

const KIND: DocumentKind = DocumentKind::Extension;

#[derive(Clone)]
pub struct ExtensionService {
    backends: Backends,
}

impl ExtensionService {
    pub fn new(backends: Backends) -> Self {
        Self { backends }
    }

    pub async fn find_by_id(
        &self,
        user: &CurrentUser,
        id: &str,
    ) -> Result<ExtensionModel, ServiceError> {
        Ok(find_visible(self.backends.store.as_ref(), KIND, id, user)
            .await?
            .model)
    }

    pub async fn list_for_user(
        &self,
        user: &CurrentUser,
    ) -> Result<Vec<ExtensionModel>, ServiceError> {
        list_visible(self.backends.store.as_ref(), KIND, user).await
    }

    pub async fn add_or_update(
        &self,
        user: &CurrentUser,
        input: ExtensionModel,
    ) -> Result<ExtensionModel, ServiceError> {
        if input.id.trim().is_empty() {
            self.create(user, input).await
        } else {
            self.update(user, input).await
        }
    }

    pub async fn create(
        &self,
        user: &CurrentUser,
        input: ExtensionModel,
    ) -> Result<ExtensionModel, ServiceError> {
        let mut model = ExtensionModel {
            id: unique_id(),
            user_id: user.hashed_id.clone(),
            name: input.name,
            description: input.description,
            execution_steps: input.execution_steps,
            is_published: self.backends.may_publish(user) && input.is_published,
            kind: KIND,
            created_at: Utc::now(),
            headers: input.headers,
            functions: input.functions,
            share_with: input.share_with,
        };
        // ids arrive from the client; never trust them on create
        for header in &mut model.headers {
            header.id = unique_id();
        }
        for function in &mut model.functions {
            function.id = unique_id();
        }
        if let Some(header) = model.headers.iter().find(|h| h.is_masked()) {
            return Err(ServiceError::Validation(vec![format!(
                "Header {} has no stored value",
                header.key
            )]));
        }
        validate_extension(&model)?;

        let written = self.secure_header_values(&mut model).await?;
        let stored = match encode(KIND, &model) {
            Ok(body) => self
                .backends
                .store
                .create(body)
                .await
                .map_err(|e| ServiceError::store("Error adding Extension", e)),
            Err(e) => Err(e),
        };
        if let Err(e) = stored {
            spawn_secret_deletes(self.backends.vault.clone(), written);
            return Err(e);
        }
        tracing::info!(
            id = %model.id,
            headers = model.headers.len(),
            functions = model.functions.len(),
            "extension created"
        );
        self.backends.audit(AuditAction::Create, KIND, &model.id, user);
        Ok(model)
    }

    pub async fn update(
        &self,
        user: &CurrentUser,
        input: ExtensionModel,
    ) -> Result<ExtensionModel, ServiceError> {
        let existing = ensure_operation::<ExtensionModel>(
            self.backends.store.as_ref(),
            KIND,
            &input.id,
            user,
        )
        .await?;
        let known: HashSet<&str> = existing
            .model
            .headers
            .iter()
            .map(|h| h.id.as_str())
            .collect();

        let mut model = ExtensionModel {
            is_published: if self.backends.may_publish(user) {
                input.is_published
            } else {
                existing.model.is_published
            },
            user_id: existing.model.user_id.clone(),
            created_at: existing.model.created_at,
            kind: KIND,
            ..input
        };
        let mut errors = Vec::new();
        for header in &mut model.headers {
            // a header id only carries its vault secret within its own extension
            if header.is_masked() && known.contains(header.id.as_str()) {
                continue;
            }
            if header.is_masked() {
                errors.push(format!("Header {} has no stored value", header.key));
            }
            // new values never overwrite a secret the stored record points at
            header.id = unique_id();
        }
        if !errors.is_empty() {
            return Err(ServiceError::Validation(errors));
        }
        for function in &mut model.functions {
            if function.id.trim().is_empty() {
                function.id = unique_id();
            }
        }
        validate_extension(&model)?;

        let written = self.secure_header_values(&mut model).await?;
        let stored = match encode(KIND, &model) {
            Ok(body) => self
                .backends
                .store
                .upsert(body, Some(&existing.etag))
                .await
                .map_err(|e| ServiceError::store("Error updating Extension", e)),
            Err(e) => Err(e),
        };
        if let Err(e) = stored {
            spawn_secret_deletes(self.backends.vault.clone(), written);
            return Err(e);
        }

        let kept: HashSet<&str> = model.headers.iter().map(|h| h.id.as_str()).collect();
        let removed: Vec<String> = existing
            .model
            .headers
            .iter()
            .filter(|h| !kept.contains(h.id.as_str()))
            .map(|h| h.id.clone())
            .collect();
        spawn_secret_deletes(self.backends.vault.clone(), removed);

        tracing::info!(id = %model.id, "extension updated");
        self.backends.audit(AuditAction::Update, KIND, &model.id, user);
        Ok(model)
    }

    pub async fn delete(
        &self,
        user: &CurrentUser,
        id: &str,
    ) -> Result<ExtensionModel, ServiceError> {
        let existing =
            ensure_operation::<ExtensionModel>(self.backends.store.as_ref(), KIND, id, user)
                .await?;
        self.backends
            .store
            .delete(id, &existing.model.user_id, Some(&existing.etag))
            .await
            .map_err(|e| ServiceError::store("Error deleting Extension", e))?;
        spawn_secret_deletes(
            self.backends.vault.clone(),
            existing.model.headers.iter().map(|h| h.id.clone()).collect(),
        );
        tracing::info!(id = %id, "extension deleted");
        self.backends.audit(AuditAction::Delete, KIND, id, user);
        Ok(existing.model)
    }

    /// Moves every plaintext header value into the vault and masks it,
    /// returning the secret names written.  Already-masked headers are left
    /// alone.  On a vault failure the secrets written so far are released.
    async fn secure_header_values(
        &self,
        model: &mut ExtensionModel,
    ) -> Result<Vec<String>, ServiceError> {
        let mut written = Vec::new();
        for header in model.headers.iter_mut().filter(|h| !h.is_masked()) {
            if let Err(e) = self.backends.vault.set_secret(&header.id, &header.value).await {
                spawn_secret_deletes(self.backends.vault.clone(), written);
                return Err(ServiceError::vault("Error securing header value", e));
            }
            written.push(header.id.clone());
            header.value = KEY_VAULT_MASK.to_string();
        }
        Ok(written)
    }

    /// Live value of a header secret.  Returns the unmasked secret, so it must
    /// only ever feed outbound calls made by this service.
    pub(crate) async fn find_secure_header_value(
        &self,
        header: &HeaderModel,
    ) -> Result<String, ServiceError> {
        match self.backends.vault.get_secret(&header.id).await {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(ServiceError::Upstream(format!(
                "Error finding secret for header {}",
                header.key
            ))),
            Err(e) => Err(ServiceError::vault("Error finding secret", e)),
        }
    }
}

/// Fire-and-forget deletion of header secrets.  Failures are logged only.
fn spawn_secret_deletes(vault: Arc<dyn SecretVault>, ids: Vec<String>) {
    for id in ids {
        let vault = vault.clone();
        tokio::spawn(async move {
            if let Err(e) = vault.begin_delete_secret(&id).await {
                tracing::warn!(secret = %id, error = %e, "failed to delete header secret");
            }
        });
    }
}
