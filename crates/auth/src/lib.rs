//! `windcms-auth`: pure identity and authorization domain.
//!
//! Token claims and codecs, credential verification, roles and templates,
//! org/position trees, memberships and login policies. No IO: storage and
//! caching live in `windcms-infra`.

pub mod authorize;
pub mod cipher;
pub mod claims;
pub mod client;
pub mod credential;
pub mod jwt;
pub mod membership;
pub mod org;
pub mod permissions;
pub mod policy;
pub mod principal;
pub mod roles;
pub mod tenant;
pub mod token_id;
pub mod user;

pub use authorize::{
    AuthzError, authorize_tenant, authorize_token_admin, ensure_backend_access, require_permission,
};
pub use cipher::{CipherError, TRANSPORT_KEY_LEN, TransportCipher};
pub use claims::{JwtClaims, TokenPayload, TokenValidationError, validate_claims};
pub use client::{ClientType, TokenCategory};
pub use credential::{
    Credential, CredentialHasher, CredentialStatus, CredentialType, INCORRECT_CREDENTIALS, IdentityType,
    NewCredential, VerifyOutcome,
};
pub use jwt::{AudienceKeys, AudienceProfile, JwtCodec, JwtError};
pub use membership::{
    Membership, MembershipStatus, RelationAssignment, RelationEdge, RelationFilter, RelationIds,
    RelationKind, Window, intersect_user_lists,
};
pub use org::{
    OrgStatus, OrgUnit, OrgUnitDraft, OrgUnitType, Position, PositionDraft, PositionType, TreeItem,
    TreeNode, build_tree,
};
pub use permissions::{ACCESS_BACKEND, NewPermission, Permission, PermissionCode};
pub use policy::{LoginAttempt, LoginPolicy, NewLoginPolicy, PolicyMethod, PolicyType};
pub use principal::Principal;
pub use roles::{
    AssignError, RESERVED_TEMPLATE_FOR, Role, RoleDraft, RoleMetadata, RoleScope, RoleStatus,
    RoleType, SyncPolicy, TEMPLATE_PREFIX, TENANT_ADMIN_TEMPLATE_CODE, can_assign,
};
pub use tenant::{NewTenant, Tenant, TenantAuditStatus, TenantStatus, TenantType};
pub use token_id::{new_jti, new_refresh_token};
pub use user::{NewUser, User, UserStatus};
