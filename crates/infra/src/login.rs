//! Login service: password and refresh grants, logout, self-registration
//! and tenant bootstrap.
//!
//! A grant re-resolves the user's authority every time: tenant
//! effectiveness, effective relations, permission codes and the backend
//! access check for the admin audience. Role codes land in the token
//! payload.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use windcms_auth::{
    ClientType, IdentityType, LoginAttempt, NewTenant, NewUser, RelationIds, RoleDraft,
    RoleMetadata, TENANT_ADMIN_TEMPLATE_CODE, TokenPayload, User, ensure_backend_access,
};
use windcms_core::{DomainError, DomainResult, RoleId, TenantId, UserId};

use crate::audit::{AuditEvent, AuditKind, AuditRecorder};
use crate::authenticator::{Authenticator, TokenPair};
use crate::credentials::CredentialService;
use crate::login_gate::LoginPolicyGate;
use crate::membership::MembershipGraph;
use crate::permissions::PermissionResolver;
use crate::roles::RoleRegistry;
use crate::store::{BootstrappedTenant, IdentityStore, TenantBootstrap};
use crate::token_cache::TokenCache;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "grant_type", rename_all = "snake_case")]
pub enum Grant {
    Password {
        username: String,
        password: String,
        #[serde(default)]
        needs_decrypt: bool,
    },
    RefreshToken {
        user_id: UserId,
        refresh_token: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub client_type: ClientType,
    #[serde(flatten)]
    pub grant: Grant,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    /// Caller address as seen by the boundary; not part of the body.
    #[serde(skip)]
    pub ip: Option<IpAddr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Seconds until the access token expires.
    pub expires_in: i64,
    pub refresh_expires_in: i64,
}

impl LoginResponse {
    fn from_pair(pair: TokenPair) -> Self {
        let now = Utc::now();
        Self {
            expires_in: (pair.access_expires_at - now).num_seconds().max(0),
            refresh_expires_in: (pair.refresh_expires_at - now).num_seconds().max(0),
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            token_type: "bearer".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Register into this tenant; platform scope when absent.
    #[serde(default)]
    pub tenant_code: Option<String>,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub needs_decrypt: bool,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
}

/// New tenant plus its first administrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantWithAdmin {
    pub tenant: NewTenant,
    pub admin: NewUser,
    pub password: String,
    #[serde(default)]
    pub needs_decrypt: bool,
}

pub struct LoginService<S: ?Sized, C: ?Sized> {
    store: Arc<S>,
    credentials: CredentialService<S>,
    authenticator: Authenticator<C>,
    graph: MembershipGraph<S>,
    permissions: PermissionResolver<S>,
    roles: RoleRegistry<S>,
    gate: LoginPolicyGate<S>,
    audit: AuditRecorder,
}

impl<S: ?Sized, C: ?Sized> Clone for LoginService<S, C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            credentials: self.credentials.clone(),
            authenticator: self.authenticator.clone(),
            graph: self.graph.clone(),
            permissions: self.permissions.clone(),
            roles: self.roles.clone(),
            gate: self.gate.clone(),
            audit: self.audit.clone(),
        }
    }
}

impl<S, C> LoginService<S, C>
where
    S: IdentityStore + ?Sized,
    C: TokenCache + ?Sized,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<S>,
        credentials: CredentialService<S>,
        authenticator: Authenticator<C>,
        graph: MembershipGraph<S>,
        permissions: PermissionResolver<S>,
        roles: RoleRegistry<S>,
        gate: LoginPolicyGate<S>,
        audit: AuditRecorder,
    ) -> Self {
        Self {
            store,
            credentials,
            authenticator,
            graph,
            permissions,
            roles,
            gate,
            audit,
        }
    }

    #[instrument(skip(self, request), fields(client_type = %request.client_type), err)]
    pub async fn login(&self, request: &LoginRequest) -> DomainResult<LoginResponse> {
        match &request.grant {
            Grant::Password {
                username,
                password,
                needs_decrypt,
            } => self.password_grant(request, username, password, *needs_decrypt).await,
            Grant::RefreshToken { user_id, refresh_token } => {
                self.refresh_grant(request, *user_id, refresh_token).await
            }
        }
    }

    async fn password_grant(
        &self,
        request: &LoginRequest,
        username: &str,
        password: &str,
        needs_decrypt: bool,
    ) -> DomainResult<LoginResponse> {
        let ct = request.client_type;
        let mut attempt = LoginAttempt {
            user_id: None,
            ip: request.ip,
            device_id: request.device_id.clone(),
        };
        self.gate.check(TenantId::PLATFORM, &attempt).await?;

        let credential = match self
            .credentials
            .authenticate(IdentityType::Username, username, password, needs_decrypt)
            .await
        {
            Ok(credential) => credential,
            Err(e) => {
                self.audit.record(
                    AuditEvent::new(AuditKind::LoginFailed, TenantId::PLATFORM, None)
                        .client_type(ct)
                        .ip(ip_string(request.ip))
                        .detail(e.code().as_str()),
                );
                return Err(e);
            }
        };

        let user = self.user(credential.user_id).await?;
        attempt.user_id = Some(user.id);
        self.gate.check(user.tenant_id, &attempt).await?;

        let payload = self.resolve_payload(ct, &user, request).await?;
        let pair = self.authenticator.create_user_token(ct, &payload).await?;

        if let Err(e) = self.store.record_login(user.id, Utc::now(), ip_string(request.ip)).await {
            warn!(user_id = %user.id, error = %e, "record last login failed");
        }
        self.audit.record(
            AuditEvent::new(AuditKind::Login, user.tenant_id, Some(user.id))
                .client_type(ct)
                .ip(ip_string(request.ip)),
        );
        info!(user_id = %user.id, jti = %pair.jti, "login succeeded");
        Ok(LoginResponse::from_pair(pair))
    }

    async fn refresh_grant(
        &self,
        request: &LoginRequest,
        user_id: UserId,
        refresh_token: &str,
    ) -> DomainResult<LoginResponse> {
        let ct = request.client_type;
        if user_id.is_zero() || refresh_token.is_empty() {
            return Err(DomainError::bad_request("user id and refresh token are required"));
        }
        let jti = self.authenticator.refresh_jti(ct, user_id, refresh_token).await?;

        let user = self.user(user_id).await?;
        let payload = self.resolve_payload(ct, &user, request).await?;

        self.authenticator.verify_refresh(ct, user_id, &jti, refresh_token).await?;
        let pair = self.authenticator.create_user_token(ct, &payload).await?;

        self.audit.record(
            AuditEvent::new(AuditKind::Refresh, user.tenant_id, Some(user.id))
                .client_type(ct)
                .ip(ip_string(request.ip)),
        );
        info!(%user_id, old_jti = %jti, jti = %pair.jti, "token pair rotated");
        Ok(LoginResponse::from_pair(pair))
    }

    async fn user(&self, user_id: UserId) -> DomainResult<User> {
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| DomainError::user_not_found("user not found"))?;
        user.ensure_can_login(Utc::now())?;
        Ok(user)
    }

    /// Tenant effectiveness, relations, backend access and role codes.
    async fn resolve_payload(
        &self,
        ct: ClientType,
        user: &User,
        request: &LoginRequest,
    ) -> DomainResult<TokenPayload> {
        if !user.tenant_id.is_zero() {
            let tenant = self
                .store
                .get_tenant(user.tenant_id)
                .await?
                .ok_or_else(|| DomainError::not_found(format!("tenant {} not found", user.tenant_id)))?;
            tenant.ensure_effective(Utc::now())?;
        }

        let relations = self.relations(user).await?;
        let permission_ids = self.permissions.permission_ids_for_roles(&relations.role_ids).await?;
        let codes = self.permissions.permission_codes_for(&permission_ids).await?;
        ensure_backend_access(ct, &codes)?;
        let roles = self.roles.role_codes_by_ids(&relations.role_ids).await?;

        Ok(TokenPayload {
            user_id: user.id,
            tenant_id: user.tenant_id,
            username: Some(user.username.clone()),
            client_id: request.client_id.clone(),
            device_id: request.device_id.clone(),
            roles,
        })
    }

    async fn relations(&self, user: &User) -> DomainResult<RelationIds> {
        if user.tenant_id.is_zero() && self.graph.relation().uses_memberships() {
            return Ok(RelationIds::default());
        }
        self.graph.relation_ids(user.id, Some(user.tenant_id)).await
    }

    /// Revoke every token pair the user holds in the audience.
    #[instrument(skip(self), err)]
    pub async fn logout(&self, client_type: ClientType, user_id: UserId) -> DomainResult<()> {
        self.authenticator.revoke_user_token(client_type, user_id).await?;
        self.audit.record(
            AuditEvent::new(AuditKind::Logout, TenantId::PLATFORM, Some(user_id)).client_type(client_type),
        );
        Ok(())
    }

    /// Create a user with a primary username/password credential.
    #[instrument(skip(self, request), fields(username = %request.username), err)]
    pub async fn register_user(&self, request: RegisterRequest) -> DomainResult<User> {
        let tenant_id = match request.tenant_code.as_deref().map(str::trim) {
            Some(code) if !code.is_empty() => {
                let tenant = self
                    .store
                    .find_tenant_by_code(code)
                    .await?
                    .ok_or_else(|| DomainError::not_found(format!("tenant '{code}' not found")))?;
                tenant.ensure_effective(Utc::now())?;
                tenant.id
            }
            _ => TenantId::PLATFORM,
        };

        let user = NewUser {
            tenant_id,
            username: request.username.trim().to_string(),
            nickname: request.nickname,
            email: request.email,
            ..Default::default()
        };
        user.validate()?;
        if self.store.username_taken(&user.username).await? {
            return Err(DomainError::bad_request("username already exists"));
        }
        let credential =
            self.credentials
                .primary_password(&user.username, &request.password, request.needs_decrypt, None)?;

        let (user, _) = self.store.create_user_with_credential(user, credential).await?;
        self.audit
            .record(AuditEvent::new(AuditKind::UserRegistered, user.tenant_id, Some(user.id)));
        info!(user_id = %user.id, tenant_id = %user.tenant_id, "user registered");
        Ok(user)
    }

    /// Tenant, cloned admin role, admin user, its credential and role
    /// assignment, all in one store transaction.
    #[instrument(skip(self, request), fields(code = %request.tenant.code), err)]
    pub async fn create_tenant_with_admin(
        &self,
        request: TenantWithAdmin,
        operator: UserId,
    ) -> DomainResult<BootstrappedTenant> {
        let TenantWithAdmin {
            mut tenant,
            mut admin,
            password,
            needs_decrypt,
        } = request;
        tenant.validate()?;
        tenant.code = tenant.code.trim().to_string();
        admin.username = admin.username.trim().to_string();
        admin.tenant_id = TenantId::PLATFORM;
        admin.validate()?;

        if self.store.find_tenant_by_code(&tenant.code).await?.is_some() {
            return Err(DomainError::bad_request("tenant code already exists"));
        }
        if self.store.username_taken(&admin.username).await? {
            return Err(DomainError::bad_request("username already exists"));
        }

        let operator = (!operator.is_zero()).then_some(operator);
        tenant.created_by = tenant.created_by.or(operator);
        admin.created_by = admin.created_by.or(operator);

        let template = self.roles.get_template_role(TENANT_ADMIN_TEMPLATE_CODE).await?;
        let mut admin_role =
            RoleDraft::clone_of_template(&template, TenantId::PLATFORM, UserId::default()).normalized()?;
        admin_role.created_by = operator;
        let admin_role_metadata = match self.roles.metadata(template.id).await? {
            Some(m) => m.for_clone(RoleId::new(0), Utc::now()),
            None => RoleMetadata::derive(RoleId::new(0), admin_role.role_type, &admin_role.code),
        };
        let credential = self
            .credentials
            .primary_password(&admin.username, &password, needs_decrypt, operator)?;

        let created = self
            .store
            .bootstrap_tenant(TenantBootstrap {
                tenant,
                admin,
                credential,
                admin_role,
                admin_role_metadata,
                template_role_id: template.id,
                relation: self.graph.relation(),
            })
            .await?;

        self.audit.record(AuditEvent::new(
            AuditKind::TenantCreated,
            created.tenant.id,
            Some(created.admin.id),
        ));
        info!(
            tenant_id = %created.tenant.id,
            admin_id = %created.admin.id,
            role_id = %created.role.id,
            "tenant bootstrapped"
        );
        Ok(created)
    }
}

fn ip_string(ip: Option<IpAddr>) -> Option<String> {
    ip.map(|ip| ip.to_string())
}
