//! Audit events for identity operations.
//!
//! Recording is fire-and-forget: the write runs on its own task and a
//! failing sink is logged at `warn`, never returned to the request.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use windcms_auth::ClientType;
use windcms_core::{TenantId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditKind {
    Login,
    LoginFailed,
    Refresh,
    Logout,
    TokenBlocked,
    TokenUnblocked,
    TenantCreated,
    UserRegistered,
    RoleCreated,
    RoleUpdated,
    RoleDeleted,
    RoleClonedFromTemplate,
    RolePermissionsReplaced,
    RelationsAssigned,
}

/// What a permission-change event acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditTarget {
    Role,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRef {
    #[serde(rename = "type")]
    pub kind: AuditTarget,
    pub id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub kind: AuditKind,
    pub at: DateTime<Utc>,
    pub tenant_id: TenantId,
    pub user_id: Option<UserId>,
    pub client_type: Option<ClientType>,
    pub ip: Option<String>,
    pub detail: Option<String>,
    /// Who made a permission change; `user_id` is whom it concerns.
    pub operator: Option<UserId>,
    pub target: Option<TargetRef>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

impl AuditEvent {
    pub fn new(kind: AuditKind, tenant_id: TenantId, user_id: Option<UserId>) -> Self {
        Self {
            kind,
            at: Utc::now(),
            tenant_id,
            user_id,
            client_type: None,
            ip: None,
            detail: None,
            operator: None,
            target: None,
            old_value: None,
            new_value: None,
        }
    }

    pub fn operator(mut self, operator: Option<UserId>) -> Self {
        self.operator = operator;
        self
    }

    pub fn target(mut self, kind: AuditTarget, id: u32) -> Self {
        self.target = Some(TargetRef { kind, id });
        self
    }

    pub fn change(mut self, old_value: Option<String>, new_value: Option<String>) -> Self {
        self.old_value = old_value;
        self.new_value = new_value;
        self
    }

    pub fn client_type(mut self, client_type: ClientType) -> Self {
        self.client_type = Some(client_type);
        self
    }

    pub fn ip(mut self, ip: Option<String>) -> Self {
        self.ip = ip;
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// `[1, 2, 3]` rendering for id lists in old/new values.
pub(crate) fn render_ids(ids: impl IntoIterator<Item = u32>) -> String {
    format!("{:?}", ids.into_iter().collect::<Vec<_>>())
}

#[derive(Debug, Error)]
#[error("audit sink error: {0}")]
pub struct AuditError(pub String);

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent) -> Result<(), AuditError>;
}

/// Writes events to the `audit` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAuditSink;

#[async_trait]
impl AuditSink for LogAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        info!(
            target: "audit",
            kind = ?event.kind,
            tenant_id = %event.tenant_id,
            user_id = ?event.user_id,
            client_type = ?event.client_type,
            ip = ?event.ip,
            detail = ?event.detail,
            operator = ?event.operator,
            target = ?event.target,
            old_value = ?event.old_value,
            new_value = ?event.new_value,
            "audit event"
        );
        Ok(())
    }
}

/// Keeps events in memory; used by tests and single-process setups.
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        self.events
            .lock()
            .map_err(|_| AuditError("audit buffer poisoned".into()))?
            .push(event);
        Ok(())
    }
}

/// Hands events to a sink without waiting for the write.
#[derive(Clone)]
pub struct AuditRecorder {
    sink: Arc<dyn AuditSink>,
}

impl AuditRecorder {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Spawn the write when a tokio runtime is present; otherwise drop the
    /// event with a warning.
    pub fn record(&self, event: AuditEvent) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(kind = ?event.kind, "no runtime for audit write; event dropped");
            return;
        };
        let sink = Arc::clone(&self.sink);
        handle.spawn(async move {
            let kind = event.kind;
            if let Err(e) = sink.record(event).await {
                warn!(error = %e, ?kind, "audit write failed");
            }
        });
    }
}

impl Default for AuditRecorder {
    fn default() -> Self {
        Self::new(Arc::new(LogAuditSink))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    struct FailingSink;

    #[async_trait]
    impl AuditSink for FailingSink {
        async fn record(&self, _event: AuditEvent) -> Result<(), AuditError> {
            Err(AuditError("disk full".into()))
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn events_reach_the_sink() {
        let sink = Arc::new(InMemoryAuditSink::new());
        let recorder = AuditRecorder::new(sink.clone());
        recorder.record(
            AuditEvent::new(AuditKind::Login, TenantId::new(1), Some(UserId::new(42)))
                .client_type(ClientType::App)
                .ip(Some("10.0.0.1".into())),
        );
        settle().await;

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AuditKind::Login);
        assert_eq!(events[0].ip.as_deref(), Some("10.0.0.1"));
    }

    #[tokio::test]
    async fn sink_failure_is_swallowed() {
        let recorder = AuditRecorder::new(Arc::new(FailingSink));
        recorder.record(AuditEvent::new(AuditKind::Logout, TenantId::new(1), None));
        settle().await;
    }
}
