//! Credential store service: verification, lifecycle and secret rotation.
//!
//! Secrets may arrive encrypted with the transport cipher; they are decrypted
//! before any verifier runs. Decode or decrypt failures are `BAD_REQUEST`,
//! never a credential mismatch.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument};

use windcms_auth::{
    Credential, CredentialHasher, CredentialType, INCORRECT_CREDENTIALS, IdentityType, NewCredential,
    TransportCipher, VerifyOutcome,
};
use windcms_core::{CredentialId, DomainError, DomainResult, FieldMask, UserId};

use crate::store::CredentialStore;

/// Mask-driven credential update.
///
/// Mask paths: `identifier`, `credential_type`, `credential`, `is_primary`,
/// `status`, `provider`, `provider_account_id`. `draft.secret` is plaintext
/// and is re-prepared whenever `credential` is in the mask.
#[derive(Debug, Clone)]
pub struct CredentialUpdate {
    pub id: CredentialId,
    pub draft: NewCredential,
    pub mask: FieldMask,
    /// Create the credential from `draft` when `id` does not exist.
    pub allow_missing: bool,
    pub operator: Option<UserId>,
}

pub struct CredentialService<S: ?Sized> {
    store: Arc<S>,
    hasher: CredentialHasher,
    cipher: TransportCipher,
}

impl<S: ?Sized> Clone for CredentialService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            hasher: self.hasher,
            cipher: self.cipher.clone(),
        }
    }
}

impl<S> CredentialService<S>
where
    S: CredentialStore + ?Sized,
{
    pub fn new(store: Arc<S>, hasher: CredentialHasher, cipher: TransportCipher) -> Self {
        Self { store, hasher, cipher }
    }

    /// Plaintext of a submitted secret.
    fn open(&self, submitted: &str, needs_decrypt: bool) -> DomainResult<String> {
        if needs_decrypt {
            Ok(self.cipher.decrypt(submitted)?)
        } else {
            Ok(submitted.to_string())
        }
    }

    async fn lookup(&self, identity_type: IdentityType, identifier: &str) -> DomainResult<Option<Credential>> {
        Ok(self.store.find_credential(identity_type, identifier.trim()).await?)
    }

    /// Check a submitted secret against the stored verifier.
    #[instrument(skip(self, submitted), fields(identity_type = %identity_type), err)]
    pub async fn verify(
        &self,
        identity_type: IdentityType,
        identifier: &str,
        submitted: &str,
        needs_decrypt: bool,
    ) -> DomainResult<VerifyOutcome> {
        let (outcome, _) = self.check(identity_type, identifier, submitted, needs_decrypt).await?;
        Ok(outcome)
    }

    /// Verify and return the matching credential; failures carry the
    /// outcome's error code.
    #[instrument(skip(self, submitted), fields(identity_type = %identity_type), err)]
    pub async fn authenticate(
        &self,
        identity_type: IdentityType,
        identifier: &str,
        submitted: &str,
        needs_decrypt: bool,
    ) -> DomainResult<Credential> {
        let (outcome, credential) = self.check(identity_type, identifier, submitted, needs_decrypt).await?;
        outcome.into_result()?;
        credential.ok_or_else(|| DomainError::incorrect_password(INCORRECT_CREDENTIALS))
    }

    async fn check(
        &self,
        identity_type: IdentityType,
        identifier: &str,
        submitted: &str,
        needs_decrypt: bool,
    ) -> DomainResult<(VerifyOutcome, Option<Credential>)> {
        let plaintext = self.open(submitted, needs_decrypt)?;
        let credential = self.lookup(identity_type, identifier).await?;
        let outcome = self.hasher.evaluate(credential.as_ref(), &plaintext);
        debug!(?outcome, "credential evaluated");
        Ok((outcome, credential))
    }

    /// Insert a credential, hashing the secret when its type demands it.
    #[instrument(skip(self, credential), fields(user_id = %credential.user_id), err)]
    pub async fn create(&self, mut credential: NewCredential) -> DomainResult<Credential> {
        credential.validate()?;
        credential.identifier = credential.identifier.trim().to_string();
        credential.secret = self.hasher.prepare(credential.credential_type, &credential.secret)?;
        Ok(self.store.create_credential(credential).await?)
    }

    #[instrument(skip(self, update), fields(credential_id = %update.id), err)]
    pub async fn update(&self, update: CredentialUpdate) -> DomainResult<Credential> {
        let CredentialUpdate {
            id,
            mut draft,
            mask,
            allow_missing,
            operator,
        } = update;

        let Some(mut current) = self.store.get_credential(id).await? else {
            if !allow_missing {
                return Err(DomainError::not_found(format!("credential {id} not found")));
            }
            draft.created_by = draft.created_by.or(operator);
            return self.create(draft).await;
        };

        if mask.contains("identifier") {
            let identifier = draft.identifier.trim();
            if identifier.is_empty() {
                return Err(DomainError::bad_request("credential requires an identifier"));
            }
            current.identifier = identifier.to_string();
        }
        if mask.contains("credential_type") {
            current.credential_type = draft.credential_type;
        }
        if mask.contains("credential") {
            current.credential = self.hasher.prepare(current.credential_type, &draft.secret)?;
        }
        if mask.contains("is_primary") {
            current.is_primary = draft.is_primary;
        }
        if mask.contains("status") {
            current.status = draft.status;
        }
        if mask.contains("provider") {
            current.provider = draft.provider.take();
        }
        if mask.contains("provider_account_id") {
            current.provider_account_id = draft.provider_account_id.take();
        }
        current.audit.touch(Utc::now(), operator);

        Ok(self.store.update_credential(current).await?)
    }

    /// Replace the secret after proving knowledge of the old one.
    #[instrument(skip(self, old, new), fields(identity_type = %identity_type), err)]
    pub async fn change(
        &self,
        identity_type: IdentityType,
        identifier: &str,
        old: &str,
        new: &str,
        needs_decrypt: bool,
    ) -> DomainResult<()> {
        let (outcome, credential) = self.check(identity_type, identifier, old, needs_decrypt).await?;
        let credential = match (outcome, credential) {
            (VerifyOutcome::Success, Some(credential)) => credential,
            _ => return Err(DomainError::bad_request("invalid old password")),
        };
        let new = self.open(new, needs_decrypt)?;
        self.store_secret(&credential, &new).await?;
        info!(credential_id = %credential.id, "credential changed");
        Ok(())
    }

    /// Replace the secret without checking the old one.
    #[instrument(skip(self, new), fields(identity_type = %identity_type), err)]
    pub async fn reset(
        &self,
        identity_type: IdentityType,
        identifier: &str,
        new: &str,
        needs_decrypt: bool,
    ) -> DomainResult<()> {
        let credential = self
            .lookup(identity_type, identifier)
            .await?
            .ok_or_else(|| DomainError::not_found("credential not found"))?;
        let new = self.open(new, needs_decrypt)?;
        self.store_secret(&credential, &new).await?;
        info!(credential_id = %credential.id, "credential reset");
        Ok(())
    }

    /// Primary username/password credential for a user the store has yet to
    /// create; `user_id` and `tenant_id` are filled in by the store.
    pub(crate) fn primary_password(
        &self,
        username: &str,
        submitted: &str,
        needs_decrypt: bool,
        operator: Option<UserId>,
    ) -> DomainResult<NewCredential> {
        let plaintext = self.open(submitted, needs_decrypt)?;
        if plaintext.is_empty() {
            return Err(DomainError::bad_request("password is required"));
        }
        Ok(NewCredential {
            identity_type: Some(IdentityType::Username),
            identifier: username.trim().to_string(),
            credential_type: CredentialType::PasswordHash,
            secret: self.hasher.prepare(CredentialType::PasswordHash, &plaintext)?,
            is_primary: true,
            created_by: operator,
            ..Default::default()
        })
    }

    async fn store_secret(&self, credential: &Credential, plaintext: &str) -> DomainResult<()> {
        if plaintext.is_empty() {
            return Err(DomainError::bad_request("new password is empty"));
        }
        let prepared = self.hasher.prepare(credential.credential_type, plaintext)?;
        Ok(self.store.set_credential_secret(credential.id, prepared).await?)
    }

    #[instrument(skip(self), err)]
    pub async fn delete_by_user_id(&self, user_id: UserId) -> DomainResult<u64> {
        Ok(self.store.delete_credentials_by_user(user_id).await?)
    }

    #[instrument(skip(self), err)]
    pub async fn delete_by_identifier(&self, identity_type: IdentityType, identifier: &str) -> DomainResult<bool> {
        Ok(self
            .store
            .delete_credential_by_identifier(identity_type, identifier.trim())
            .await?)
    }

    pub async fn get_by_identifier(&self, identity_type: IdentityType, identifier: &str) -> DomainResult<Credential> {
        self.lookup(identity_type, identifier)
            .await?
            .ok_or_else(|| DomainError::not_found("credential not found"))
    }

    pub async fn list_by_user_id(&self, user_id: UserId) -> DomainResult<Vec<Credential>> {
        Ok(self.store.list_credentials_by_user(user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use windcms_auth::{CredentialStatus, CredentialType, NewUser};
    use windcms_core::{ErrorCode, TenantId};

    use super::*;
    use crate::store::{InMemoryIdentityStore, UserStore};

    const KEY: [u8; 32] = [7u8; 32];

    async fn service() -> (CredentialService<InMemoryIdentityStore>, UserId) {
        let store = InMemoryIdentityStore::arc();
        let user = store
            .create_user(NewUser {
                tenant_id: TenantId::new(1),
                username: "alice".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let service = CredentialService::new(
            store,
            CredentialHasher::with_cost(4),
            TransportCipher::new(&KEY).unwrap(),
        );
        (service, user.id)
    }

    fn email(user_id: UserId, secret: &str) -> NewCredential {
        NewCredential {
            user_id,
            tenant_id: TenantId::new(1),
            identity_type: Some(IdentityType::Email),
            identifier: "a@b.c".into(),
            credential_type: CredentialType::PasswordHash,
            secret: secret.into(),
            is_primary: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_hashes_and_verify_checks() {
        let (svc, uid) = service().await;
        let stored = svc.create(email(uid, "pw")).await.unwrap();
        assert!(stored.credential.starts_with("$2"));

        let ok = svc.verify(IdentityType::Email, "a@b.c", "pw", false).await.unwrap();
        assert_eq!(ok, VerifyOutcome::Success);
        let bad = svc.verify(IdentityType::Email, "a@b.c", "nope", false).await.unwrap();
        assert_eq!(bad, VerifyOutcome::BadCredential);
        let missing = svc.verify(IdentityType::Email, "x@y.z", "pw", false).await.unwrap();
        assert_eq!(missing, VerifyOutcome::UserNotFound);
    }

    #[tokio::test]
    async fn encrypted_secret_is_decrypted_first() {
        let (svc, uid) = service().await;
        svc.create(email(uid, "pw")).await.unwrap();
        let sealed = TransportCipher::new(&KEY).unwrap().encrypt("pw").unwrap();

        let ok = svc.verify(IdentityType::Email, "a@b.c", &sealed, true).await.unwrap();
        assert_eq!(ok, VerifyOutcome::Success);

        let err = svc
            .verify(IdentityType::Email, "a@b.c", "%%not-base64%%", true)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::BadRequest);
    }

    #[tokio::test]
    async fn disabled_credential_is_frozen() {
        let (svc, uid) = service().await;
        let mut input = email(uid, "pw");
        input.status = CredentialStatus::Disabled;
        svc.create(input).await.unwrap();

        let err = svc
            .authenticate(IdentityType::Email, "a@b.c", "pw", false)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::UserFreeze);
    }

    #[tokio::test]
    async fn change_requires_old_secret() {
        let (svc, uid) = service().await;
        svc.create(email(uid, "pw")).await.unwrap();

        let err = svc
            .change(IdentityType::Email, "a@b.c", "wrong", "pw2", false)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::BadRequest);
        assert_eq!(err.message(), "invalid old password");

        svc.change(IdentityType::Email, "a@b.c", "pw", "pw2", false).await.unwrap();
        let outcome = svc.verify(IdentityType::Email, "a@b.c", "pw2", false).await.unwrap();
        assert_eq!(outcome, VerifyOutcome::Success);
    }

    #[tokio::test]
    async fn reset_overwrites_without_old_secret() {
        let (svc, uid) = service().await;
        svc.create(email(uid, "pw")).await.unwrap();
        svc.reset(IdentityType::Email, "a@b.c", "fresh", false).await.unwrap();
        let outcome = svc.verify(IdentityType::Email, "a@b.c", "pw", false).await.unwrap();
        assert_eq!(outcome, VerifyOutcome::BadCredential);
    }

    #[tokio::test]
    async fn masked_update_touches_only_named_fields() {
        let (svc, uid) = service().await;
        let stored = svc.create(email(uid, "pw")).await.unwrap();

        let mut draft = email(uid, "ignored");
        draft.status = CredentialStatus::Blocked;
        draft.identifier = "other@b.c".into();
        let updated = svc
            .update(CredentialUpdate {
                id: stored.id,
                draft,
                mask: FieldMask::of(["status"]),
                allow_missing: false,
                operator: Some(uid),
            })
            .await
            .unwrap();
        assert_eq!(updated.status, CredentialStatus::Blocked);
        assert_eq!(updated.identifier, "a@b.c");
        assert_eq!(updated.credential, stored.credential);
        assert_eq!(updated.audit.updated_by, Some(uid));
    }

    #[tokio::test]
    async fn update_with_allow_missing_creates() {
        let (svc, uid) = service().await;
        let created = svc
            .update(CredentialUpdate {
                id: CredentialId::new(999),
                draft: email(uid, "pw"),
                mask: FieldMask::all(),
                allow_missing: true,
                operator: Some(uid),
            })
            .await
            .unwrap();
        assert_eq!(created.audit.created_by, Some(uid));

        let err = svc
            .update(CredentialUpdate {
                id: CredentialId::new(1000),
                draft: email(uid, "pw"),
                mask: FieldMask::all(),
                allow_missing: false,
                operator: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn delete_by_user_and_identifier() {
        let (svc, uid) = service().await;
        svc.create(email(uid, "pw")).await.unwrap();
        let mut phone = email(uid, "pw");
        phone.identity_type = Some(IdentityType::Phone);
        phone.identifier = "+100".into();
        svc.create(phone).await.unwrap();

        assert!(svc.delete_by_identifier(IdentityType::Phone, "+100").await.unwrap());
        assert_eq!(svc.list_by_user_id(uid).await.unwrap().len(), 1);
        assert_eq!(svc.delete_by_user_id(uid).await.unwrap(), 1);
        assert!(svc.get_by_identifier(IdentityType::Email, "a@b.c").await.is_err());
    }
}
