//! Login policy gate: DENY rules by user id, IP/CIDR or device.

use std::sync::Arc;

use tracing::{instrument, warn};

use windcms_auth::policy::evaluate;
use windcms_auth::{LoginAttempt, LoginPolicy, NewLoginPolicy};
use windcms_core::{DomainError, DomainResult, LoginPolicyId, TenantId};

use crate::store::LoginPolicyStore;

pub struct LoginPolicyGate<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> Clone for LoginPolicyGate<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S> LoginPolicyGate<S>
where
    S: LoginPolicyStore + ?Sized,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    #[instrument(skip(self, policy), fields(tenant_id = %policy.tenant_id), err)]
    pub async fn create_policy(&self, policy: NewLoginPolicy) -> DomainResult<LoginPolicy> {
        policy.validate()?;
        Ok(self.store.create_login_policy(policy).await?)
    }

    /// Tenant rules plus platform-wide ones.
    pub async fn list_policies(&self, tenant_id: TenantId) -> DomainResult<Vec<LoginPolicy>> {
        Ok(self.store.list_login_policies(tenant_id).await?)
    }

    pub async fn delete_policy(&self, id: LoginPolicyId) -> DomainResult<()> {
        if !self.store.delete_login_policy(id).await? {
            return Err(DomainError::not_found(format!("login policy {id} not found")));
        }
        Ok(())
    }

    /// `FORBIDDEN` with the matching rule's reason when any DENY rule hits.
    #[instrument(skip(self, attempt), err)]
    pub async fn check(&self, tenant_id: TenantId, attempt: &LoginAttempt) -> DomainResult<()> {
        let policies = self.store.list_login_policies(tenant_id).await?;
        evaluate(&policies, attempt).inspect_err(|_| {
            warn!(user_id = ?attempt.user_id, ip = ?attempt.ip, "login denied by policy");
        })
    }
}

#[cfg(test)]
mod tests {
    use windcms_auth::{PolicyMethod, PolicyType};
    use windcms_core::{ErrorCode, UserId};

    use super::*;
    use crate::store::InMemoryIdentityStore;

    fn gate() -> LoginPolicyGate<InMemoryIdentityStore> {
        LoginPolicyGate::new(InMemoryIdentityStore::arc())
    }

    fn rule(tenant: TenantId, policy_type: PolicyType, method: PolicyMethod, value: &str) -> NewLoginPolicy {
        NewLoginPolicy {
            tenant_id: tenant,
            target_id: None,
            policy_type,
            method,
            value: value.into(),
            reason: Some("office network only".into()),
            created_by: None,
        }
    }

    fn from(ip: &str) -> LoginAttempt {
        LoginAttempt {
            user_id: Some(UserId::new(42)),
            ip: ip.parse().ok(),
            device_id: None,
        }
    }

    #[tokio::test]
    async fn deny_carries_reason() {
        let g = gate();
        let t = TenantId::new(1);
        g.create_policy(rule(t, PolicyType::Ip, PolicyMethod::Allow, "10.1.2.3")).await.unwrap();
        g.create_policy(rule(t, PolicyType::Ip, PolicyMethod::Deny, "10.0.0.0/8")).await.unwrap();

        let err = g.check(t, &from("10.1.2.3")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Forbidden);
        assert_eq!(err.message(), "office network only");
        assert!(g.check(t, &from("192.168.0.1")).await.is_ok());
    }

    #[tokio::test]
    async fn platform_rules_apply_to_every_tenant() {
        let g = gate();
        g.create_policy(rule(TenantId::PLATFORM, PolicyType::UserId, PolicyMethod::Deny, "42"))
            .await
            .unwrap();
        assert!(g.check(TenantId::new(5), &from("1.1.1.1")).await.is_err());
    }

    #[tokio::test]
    async fn invalid_value_and_missing_delete() {
        let g = gate();
        let err = g
            .create_policy(rule(TenantId::new(1), PolicyType::Ip, PolicyMethod::Deny, "nope"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::BadRequest);
        let err = g.delete_policy(LoginPolicyId::new(9)).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }
}
