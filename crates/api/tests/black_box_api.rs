use std::net::SocketAddr;

use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::{Value, json};

use windcms_auth::{
    ACCESS_BACKEND, ClientType, JwtClaims, NewPermission, NewTenant, NewUser, RoleDraft, RoleType,
    TENANT_ADMIN_TEMPLATE_CODE, TenantAuditStatus,
};
use windcms_core::{TenantId, UserId};
use windcms_infra::config::{AudienceConfig, AuthenticatorConfig};
use windcms_infra::{IaacConfig, IdentityCore, TenantWithAdmin};

const APP_SECRET: &str = "app-secret";

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Same router as prod over an in-memory core with one tenant ("acme",
    /// admin "root") and one app user ("alice").
    async fn spawn() -> Self {
        let config = IaacConfig {
            authenticator: AuthenticatorConfig {
                admin: AudienceConfig::with_key("admin-secret"),
                app: AudienceConfig::with_key(APP_SECRET),
                leeway_secs: 0,
            },
            transport_aes_key: "0123456789abcdef0123456789abcdef".into(),
            bcrypt_cost: Some(4),
            ..Default::default()
        };
        let core = IdentityCore::in_memory(&config).unwrap();
        seed(&core).await;

        let app = windcms_api::app::build_app(core);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .await
                .unwrap();
        });

        Self { base_url, handle }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn seed(core: &IdentityCore) {
    let backend = core
        .permissions
        .create_permission(NewPermission {
            code: ACCESS_BACKEND.into(),
            name: "backend".into(),
            description: None,
        })
        .await
        .unwrap();
    core.roles
        .create(
            RoleDraft {
                code: TENANT_ADMIN_TEMPLATE_CODE.into(),
                role_type: RoleType::Template,
                ..Default::default()
            },
            vec![backend.id],
        )
        .await
        .unwrap();
    core.login
        .create_tenant_with_admin(
            TenantWithAdmin {
                tenant: NewTenant {
                    code: "acme".into(),
                    name: "Acme".into(),
                    audit_status: TenantAuditStatus::Approved,
                    ..Default::default()
                },
                admin: NewUser {
                    username: "root".into(),
                    ..Default::default()
                },
                password: "s3cret".into(),
                needs_decrypt: false,
            },
            UserId::new(1),
        )
        .await
        .unwrap();
}

async fn register_alice(client: &reqwest::Client, srv: &TestServer) -> u64 {
    let res = client
        .post(srv.url("/auth/register"))
        .json(&json!({ "tenant_code": "acme", "username": "alice", "password": "pw" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: Value = res.json().await.unwrap();
    body["id"].as_u64().unwrap()
}

async fn login(client: &reqwest::Client, srv: &TestServer, ct: &str, username: &str, password: &str) -> Value {
    let res = client
        .post(srv.url("/auth/login"))
        .json(&json!({
            "client_type": ct,
            "grant_type": "password",
            "username": username,
            "password": password,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK, "login {username}/{ct}");
    res.json().await.unwrap()
}

async fn validate(client: &reqwest::Client, srv: &TestServer, ct: &str, token: &str) -> Value {
    client
        .post(srv.url("/auth/validate"))
        .json(&json!({ "client_type": ct, "token_category": "ACCESS", "token": token }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

#[tokio::test]
async fn health_is_public() {
    let srv = TestServer::spawn().await;
    let res = reqwest::get(srv.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn auth_required_for_protected_endpoints() {
    let srv = TestServer::spawn().await;
    let res = reqwest::Client::new().get(srv.url("/auth/whoami")).send().await.unwrap();

    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "UNAUTHORIZED");
}

#[tokio::test]
async fn login_whoami_logout() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let alice = register_alice(&client, &srv).await;

    let tokens = login(&client, &srv, "app", "alice", "pw").await;
    assert_eq!(tokens["token_type"], "bearer");
    let at = tokens["access_token"].as_str().unwrap();

    let res = client.get(srv.url("/auth/whoami")).bearer_auth(at).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let me: Value = res.json().await.unwrap();
    assert_eq!(me["user_id"].as_u64(), Some(alice));
    assert_eq!(me["client_type"], "app");

    let res = client.post(srv.url("/auth/logout")).bearer_auth(at).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = client.get(srv.url("/auth/whoami")).bearer_auth(at).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn wrong_password_and_backend_gate() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    register_alice(&client, &srv).await;

    let res = client
        .post(srv.url("/auth/login"))
        .json(&json!({ "client_type": "app", "grant_type": "password", "username": "alice", "password": "nope" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "INCORRECT_PASSWORD");

    let res = client
        .post(srv.url("/auth/login"))
        .json(&json!({ "client_type": "app", "grant_type": "password", "username": "nobody", "password": "nope" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let unknown: Value = res.json().await.unwrap();
    assert_eq!(unknown, body);

    let res = client
        .post(srv.url("/auth/login"))
        .json(&json!({ "client_type": "admin", "grant_type": "password", "username": "alice", "password": "pw" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn validate_reports_forged_tokens_in_the_body() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    register_alice(&client, &srv).await;

    let tokens = login(&client, &srv, "app", "alice", "pw").await;
    let ok = validate(&client, &srv, "app", tokens["access_token"].as_str().unwrap()).await;
    assert_eq!(ok["is_valid"], true);
    assert_eq!(ok["payload"]["username"], "alice");

    let now = Utc::now();
    let claims = JwtClaims {
        sub: UserId::new(2),
        tenant_id: TenantId::new(1),
        jti: "forged".into(),
        client_type: ClientType::App,
        iat: now.timestamp(),
        exp: (now + ChronoDuration::minutes(10)).timestamp(),
        roles: vec!["admin".into()],
        username: None,
        client_id: None,
        device_id: None,
    };
    let forged = jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(b"not-the-app-secret"),
    )
    .unwrap();

    let bad = validate(&client, &srv, "app", &forged).await;
    assert_eq!(bad["is_valid"], false);
    assert_eq!(bad["error"], "UNAUTHORIZED");
    assert_eq!(bad["message"], "invalid token");

    // Correctly signed but never issued.
    let unissued = jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(APP_SECRET.as_bytes()),
    )
    .unwrap();
    let bad = validate(&client, &srv, "app", &unissued).await;
    assert_eq!(bad["message"], "access token is revoked or expired");
}

#[tokio::test]
async fn refresh_rotates_once() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let alice = register_alice(&client, &srv).await;
    let tokens = login(&client, &srv, "app", "alice", "pw").await;
    let body = json!({ "client_type": "app", "user_id": alice, "refresh_token": tokens["refresh_token"] });

    let res = client.post(srv.url("/auth/refresh")).json(&body).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let rotated: Value = res.json().await.unwrap();
    assert_ne!(rotated["refresh_token"], tokens["refresh_token"]);

    let res = client.post(srv.url("/auth/refresh")).json(&body).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let err: Value = res.json().await.unwrap();
    assert_eq!(err["error"], "INCORRECT_REFRESH_TOKEN");
}

#[tokio::test]
async fn tenant_admin_blocks_then_unblocks_a_session() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let alice = register_alice(&client, &srv).await;
    let session = login(&client, &srv, "app", "alice", "pw").await;
    let at = session["access_token"].as_str().unwrap();
    let admin = login(&client, &srv, "admin", "root", "s3cret").await;
    let admin_at = admin["access_token"].as_str().unwrap();

    let res = client
        .post(srv.url("/tokens/block"))
        .bearer_auth(admin_at)
        .header("x-client-type", "admin")
        .json(&json!({ "client_type": "app", "user_id": alice, "token": at, "duration_secs": 300, "reason": "abuse" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let blocked: Value = res.json().await.unwrap();
    let jti = blocked["jti"].as_str().unwrap().to_string();

    let v = validate(&client, &srv, "app", at).await;
    assert_eq!(v["message"], "access token is blocked");

    let res = client
        .post(srv.url("/tokens/unblock"))
        .bearer_auth(admin_at)
        .header("x-client-type", "admin")
        .json(&json!({ "client_type": "app", "user_id": alice, "jti": jti }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    // Unblocking also revokes the session.
    let v = validate(&client, &srv, "app", at).await;
    assert_eq!(v["message"], "access token is revoked or expired");
}

#[tokio::test]
async fn app_users_cannot_administer_other_sessions() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    register_alice(&client, &srv).await;
    let session = login(&client, &srv, "app", "alice", "pw").await;
    let at = session["access_token"].as_str().unwrap();

    let res = client
        .post(srv.url("/tokens/revoke"))
        .bearer_auth(at)
        .json(&json!({ "user_id": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = client
        .post(srv.url("/tenants"))
        .bearer_auth(at)
        .json(&json!({
            "tenant": { "code": "globex", "name": "Globex" },
            "admin": { "username": "boss" },
            "password": "pw"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}
