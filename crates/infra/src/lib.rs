//! Infrastructure layer: configuration, token cache, persistence and the
//! identity services that orchestrate them.

pub mod audit;
pub mod authenticator;
pub mod config;
pub mod credentials;
pub mod deadline;
pub mod login;
pub mod login_gate;
pub mod membership;
pub mod org_tree;
pub mod permissions;
pub mod roles;
pub mod store;
pub mod token_cache;
pub mod wiring;

pub use audit::{
    AuditEvent, AuditKind, AuditRecorder, AuditSink, AuditTarget, InMemoryAuditSink, LogAuditSink, TargetRef,
};
pub use authenticator::{
    AuthenticateRequest, Authenticated, Authenticator, BlockRequest, BlockedToken, TokenPair,
};
pub use config::{ConfigError, IaacConfig};
pub use credentials::CredentialService;
pub use login::{Grant, LoginRequest, LoginResponse, LoginService, RegisterRequest, TenantWithAdmin};
pub use login_gate::LoginPolicyGate;
pub use membership::MembershipGraph;
pub use org_tree::OrgTree;
pub use permissions::PermissionResolver;
pub use roles::RoleRegistry;
pub use store::{StoreError, StoreResult};
pub use token_cache::{TokenCache, TokenCacheError, TokenKind};
pub use wiring::{BootError, IdentityCore};
