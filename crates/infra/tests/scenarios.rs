//! End-to-end flows over the in-memory backends.

mod common;

use windcms_auth::{
    ClientType, CredentialType, IdentityType, NewCredential, NewPermission, RelationAssignment,
    RelationFilter, RoleDraft, RoleType, TENANT_ADMIN_TEMPLATE_CODE, TokenPayload, VerifyOutcome,
};
use windcms_core::{ErrorCode, OrgUnitId, PositionId, RoleId, TenantId, UserId};
use windcms_infra::{AuthenticateRequest, BlockRequest, IdentityCore, TokenPair};

const UID: UserId = UserId::new(42);

async fn seeded_login(core: &IdentityCore) -> TokenPair {
    core.credentials
        .create(NewCredential {
            user_id: UID,
            tenant_id: TenantId::new(1),
            identity_type: Some(IdentityType::Email),
            identifier: "a@b.c".into(),
            credential_type: CredentialType::PasswordHash,
            secret: "pw".into(),
            is_primary: true,
            ..Default::default()
        })
        .await
        .unwrap();

    let outcome = core.credentials.verify(IdentityType::Email, "a@b.c", "pw", false).await.unwrap();
    assert_eq!(outcome, VerifyOutcome::Success);

    core.authenticator
        .create_user_token(
            ClientType::App,
            &TokenPayload {
                user_id: UID,
                tenant_id: TenantId::new(1),
                ..Default::default()
            },
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn login_then_validate() {
    let core = common::core();
    let pair = seeded_login(&core).await;

    let ok = core
        .authenticator
        .authenticate(&AuthenticateRequest::access(ClientType::App, &pair.access_token))
        .await
        .unwrap();
    assert!(ok.is_valid);
    assert_eq!(ok.payload.user_id, UID);
    assert_eq!(ok.jti, pair.jti);
}

#[tokio::test]
async fn refresh_rotation_is_single_use() {
    let core = common::core();
    let pair = seeded_login(&core).await;

    let ok = core
        .authenticator
        .authenticate(&AuthenticateRequest::refresh(ClientType::App, UID, &pair.refresh_token))
        .await
        .unwrap();
    assert!(ok.is_valid);

    core.authenticator
        .verify_refresh(ClientType::App, UID, &pair.jti, &pair.refresh_token)
        .await
        .unwrap();
    let err = core
        .authenticator
        .verify_refresh(ClientType::App, UID, &pair.jti, &pair.refresh_token)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::IncorrectRefreshToken);
}

#[tokio::test]
async fn blacklist_wins_over_a_live_token() {
    let core = common::core();
    let pair = seeded_login(&core).await;

    core.authenticator
        .block_token(&BlockRequest {
            client_type: ClientType::App,
            user_id: UID,
            jti: Some(pair.jti.clone()),
            token: None,
            duration_secs: 300,
            reason: "x".into(),
        })
        .await
        .unwrap();

    let err = core
        .authenticator
        .authenticate(&AuthenticateRequest::access(ClientType::App, &pair.access_token))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthorized);
    assert_eq!(err.message(), "access token is blocked");
}

#[tokio::test]
async fn user_filter_intersects_relation_kinds() {
    let core = common::core();
    let tenant = Some(TenantId::new(1));
    let assign = |roles: Vec<u32>, positions: Vec<u32>, orgs: Vec<u32>| RelationAssignment {
        role_ids: roles.into_iter().map(RoleId::new).collect(),
        position_ids: positions.into_iter().map(PositionId::new).collect(),
        org_unit_ids: orgs.into_iter().map(OrgUnitId::new).collect(),
        ..Default::default()
    };
    core.graph.assign(UserId::new(1), tenant, assign(vec![10], vec![], vec![])).await.unwrap();
    core.graph.assign(UserId::new(2), tenant, assign(vec![10], vec![20], vec![30])).await.unwrap();
    core.graph.assign(UserId::new(3), tenant, assign(vec![], vec![20], vec![])).await.unwrap();

    let filter = RelationFilter {
        role_ids: vec![RoleId::new(10)],
        position_ids: vec![PositionId::new(20)],
        org_unit_ids: vec![OrgUnitId::new(30)],
    };
    assert_eq!(core.graph.search_users(&filter, tenant).await.unwrap(), Some(vec![UserId::new(2)]));

    let nobody = RelationFilter {
        role_ids: vec![RoleId::new(10)],
        org_unit_ids: vec![OrgUnitId::new(99)],
        ..Default::default()
    };
    assert_eq!(core.graph.search_users(&nobody, tenant).await.unwrap(), Some(vec![]));
}

#[tokio::test]
async fn template_clone_then_protected_delete() {
    let core = common::core();
    let mut permission_ids = Vec::new();
    for code in ["cms:post:view", "cms:post:edit", "sys:access_backend"] {
        let p = core
            .permissions
            .create_permission(NewPermission {
                code: code.into(),
                name: code.into(),
                description: None,
            })
            .await
            .unwrap();
        permission_ids.push(p.id);
    }
    core.roles
        .create(
            RoleDraft {
                code: TENANT_ADMIN_TEMPLATE_CODE.into(),
                role_type: RoleType::Template,
                ..Default::default()
            },
            permission_ids.clone(),
        )
        .await
        .unwrap();

    let role = core
        .roles
        .create_tenant_role_from_template(TenantId::new(7), UserId::new(1))
        .await
        .unwrap();
    assert_eq!(role.code, "admin");
    assert_eq!(role.tenant_id, TenantId::new(7));
    assert_eq!(role.role_type, RoleType::Tenant);
    assert!(role.is_protected);
    assert_eq!(core.permissions.permission_ids_for_roles(&[role.id]).await.unwrap(), permission_ids);

    let err = core.roles.delete(role.id, Some(UserId::new(1))).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Forbidden);
    assert_eq!(core.roles.get(role.id).await.unwrap(), role);
}
