use chrono::Utc;

use super::{ensure_operation, encode, find_visible, list_visible, Backends};
use crate::audit::AuditAction;
use crate::identity::CurrentUser;
use crate::models::{unique_id, DocumentKind, PersonaModel};
use crate::response::ServiceError;
use crate::validation::validate_persona;

const KIND: DocumentKind = DocumentKind::Persona;

#[derive(Clone)]
pub struct PersonaService {
    backends: Backends,
}

impl PersonaService {
    pub fn new(backends: Backends) -> Self {
        Self { backends }
    }

    pub async fn find_by_id(
        &self,
        user: &CurrentUser,
        id: &str,
    ) -> Result<PersonaModel, ServiceError> {
        Ok(find_visible(self.backends.store.as_ref(), KIND, id, user)
            .await?
            .model)
    }

    /// Personas owned by or published to the caller, newest first.
    pub async fn list_for_user(&self, user: &CurrentUser) -> Result<Vec<PersonaModel>, ServiceError> {
        list_visible(self.backends.store.as_ref(), KIND, user).await
    }

    /// Creates when `input.id` is empty, updates otherwise.
    pub async fn add_or_update(
        &self,
        user: &CurrentUser,
        input: PersonaModel,
    ) -> Result<PersonaModel, ServiceError> {
        if input.id.trim().is_empty() {
            self.create(user, input).await
        } else {
            self.update(user, input).await
        }
    }

    pub async fn create(
        &self,
        user: &CurrentUser,
        input: PersonaModel,
    ) -> Result<PersonaModel, ServiceError> {
        let model = PersonaModel {
            id: unique_id(),
            user_id: user.hashed_id.clone(),
            name: input.name,
            description: input.description,
            persona_message: input.persona_message,
            is_published: self.backends.may_publish(user) && input.is_published,
            kind: KIND,
            created_at: Utc::now(),
            share_with: input.share_with,
        };
        validate_persona(&model)?;

        self.backends
            .store
            .create(encode(KIND, &model)?)
            .await
            .map_err(|e| ServiceError::store("Error creating Persona", e))?;
        tracing::info!(id = %model.id, shared = model.share_with.len(), "persona created");
        self.backends
            .audit(AuditAction::Create, KIND, &model.id, user);
        Ok(model)
    }

    pub async fn update(
        &self,
        user: &CurrentUser,
        input: PersonaModel,
    ) -> Result<PersonaModel, ServiceError> {
        let existing = ensure_operation::<PersonaModel>(
            self.backends.store.as_ref(),
            KIND,
            &input.id,
            user,
        )
        .await?;

        let model = PersonaModel {
            is_published: if self.backends.may_publish(user) {
                input.is_published
            } else {
                existing.model.is_published
            },
            user_id: existing.model.user_id,
            created_at: existing.model.created_at,
            kind: KIND,
            ..input
        };
        validate_persona(&model)?;

        self.backends
            .store
            .upsert(encode(KIND, &model)?, Some(&existing.etag))
            .await
            .map_err(|e| ServiceError::store("Error updating Persona", e))?;
        tracing::info!(id = %model.id, "persona updated");
        self.backends
            .audit(AuditAction::Update, KIND, &model.id, user);
        Ok(model)
    }

    pub async fn delete(&self, user: &CurrentUser, id: &str) -> Result<PersonaModel, ServiceError> {
        let existing =
            ensure_operation::<PersonaModel>(self.backends.store.as_ref(), KIND, id, user).await?;
        self.backends
            .store
            .delete(id, &existing.model.user_id, Some(&existing.etag))
            .await
            .map_err(|e| ServiceError::store("Error deleting Persona", e))?;
        tracing::info!(id = %id, "persona deleted");
        self.backends.audit(AuditAction::Delete, KIND, id, user);
        Ok(existing.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SharePrincipal;
    use crate::services::testing::{
        admin, contended_harness, harness, principal, race_next_read, user,
    };

    fn input(name: &str, published: bool, share_with: Vec<SharePrincipal>) -> PersonaModel {
        PersonaModel {
            id: String::new(),
            user_id: "client-supplied".into(),
            name: name.into(),
            description: "A helpful persona".into(),
            persona_message: "You are helpful.".into(),
            is_published: published,
            kind: KIND,
            created_at: Utc::now(),
            share_with,
        }
    }

    #[tokio::test]
    async fn shared_persona_is_visible_only_when_published() {
        let h = harness(false);
        let svc = PersonaService::new(h.backends.clone());
        let a = user("a@x.com");
        let b = user("b@x.com");
        let c = user("c@x.com");

        let created = svc
            .create(&a, input("Shared", false, vec![principal("b@x.com")]))
            .await
            .unwrap();
        assert_eq!(created.user_id, a.hashed_id);
        assert_eq!(svc.list_for_user(&a).await.unwrap().len(), 1);
        assert!(svc.list_for_user(&b).await.unwrap().is_empty());
        assert!(svc.list_for_user(&c).await.unwrap().is_empty());
        assert!(matches!(
            svc.find_by_id(&b, &created.id).await,
            Err(ServiceError::NotFound(_))
        ));

        let mut published = created.clone();
        published.is_published = true;
        svc.update(&a, published).await.unwrap();
        let seen = svc.list_for_user(&b).await.unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].id, created.id);
        assert!(svc.list_for_user(&c).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_admin_cannot_publish_when_gated() {
        let h = harness(true);
        let svc = PersonaService::new(h.backends.clone());
        let a = user("a@x.com");
        let created = svc.create(&a, input("P", true, Vec::new())).await.unwrap();
        assert!(!created.is_published);

        let mut again = created.clone();
        again.is_published = true;
        let updated = svc.update(&a, again).await.unwrap();
        assert!(!updated.is_published);

        let boss = admin("boss@x.com");
        let mut by_admin = updated.clone();
        by_admin.is_published = true;
        assert!(svc.update(&boss, by_admin).await.unwrap().is_published);
    }

    #[tokio::test]
    async fn update_preserves_owner_and_creation_time() {
        let h = harness(false);
        let svc = PersonaService::new(h.backends.clone());
        let a = user("a@x.com");
        let boss = admin("boss@x.com");
        let created = svc.create(&a, input("P", false, Vec::new())).await.unwrap();

        let mut edit = created.clone();
        edit.name = "Renamed".into();
        edit.user_id = boss.hashed_id.clone();
        edit.created_at = Utc::now() + chrono::Duration::days(3);
        let updated = svc.update(&boss, edit).await.unwrap();
        assert_eq!(updated.name, "Renamed");
        assert_eq!(updated.user_id, a.hashed_id);
        assert_eq!(updated.created_at, created.created_at);
    }

    #[tokio::test]
    async fn foreign_update_and_delete_are_unauthorized_and_leave_record() {
        let h = harness(false);
        let svc = PersonaService::new(h.backends.clone());
        let a = user("a@x.com");
        let c = user("c@x.com");
        let created = svc.create(&a, input("Mine", false, Vec::new())).await.unwrap();

        let mut hijack = created.clone();
        hijack.name = "Hijacked".into();
        let err = svc.update(&c, hijack).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));
        assert_eq!(
            err.to_string(),
            format!("Persona not found with id: {}", created.id)
        );

        let err = svc.delete(&c, &created.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));

        let stored = svc.find_by_id(&a, &created.id).await.unwrap();
        assert_eq!(stored.name, "Mine");
    }

    #[tokio::test]
    async fn missing_record_is_not_found() {
        let h = harness(false);
        let svc = PersonaService::new(h.backends.clone());
        let err = svc.delete(&user("a@x.com"), "nope").await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn invalid_persona_is_not_persisted() {
        let h = harness(false);
        let svc = PersonaService::new(h.backends.clone());
        let mut bad = input("", false, Vec::new());
        bad.persona_message = " ".into();
        let err = svc.create(&user("a@x.com"), bad).await.unwrap_err();
        assert_eq!(
            err.messages(),
            vec!["Title cannot be empty", "System message cannot be empty"]
        );
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn update_racing_another_writer_is_a_conflict() {
        let (h, store) = contended_harness(false);
        let svc = PersonaService::new(h.backends.clone());
        let a = user("a@x.com");
        let created = svc.create(&a, input("Before", false, Vec::new())).await.unwrap();

        race_next_read(&store);
        let mut edit = created.clone();
        edit.name = "After".into();
        let err = svc.update(&a, edit).await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
        assert_eq!(err.http_status(), axum::http::StatusCode::CONFLICT);

        let stored = svc.find_by_id(&a, &created.id).await.unwrap();
        assert_eq!(stored.name, "Before");
    }

    #[tokio::test]
    async fn delete_racing_another_writer_keeps_the_record() {
        let (h, store) = contended_harness(false);
        let svc = PersonaService::new(h.backends.clone());
        let a = user("a@x.com");
        let created = svc.create(&a, input("Kept", false, Vec::new())).await.unwrap();

        race_next_read(&store);
        let err = svc.delete(&a, &created.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
        assert_eq!(h.store.len(), 1);
        assert!(svc.delete(&a, &created.id).await.is_ok());
    }

    #[tokio::test]
    async fn add_or_update_dispatches_on_id() {
        let h = harness(false);
        let svc = PersonaService::new(h.backends.clone());
        let a = user("a@x.com");
        let created = svc
            .add_or_update(&a, input("First", false, Vec::new()))
            .await
            .unwrap();
        let mut edit = created.clone();
        edit.description = "changed".into();
        let updated = svc.add_or_update(&a, edit).await.unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(h.store.len(), 1);

        let deleted = svc.delete(&a, &created.id).await.unwrap();
        assert_eq!(deleted.description, "changed");
        assert!(h.store.is_empty());
    }
}
