//! Login policy rules: allow/deny by user id, IP or device.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use windcms_core::{AuditFields, DomainError, DomainResult, LoginPolicyId, TenantId, UserId, wire_enum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyType {
    UserId,
    Ip,
    Device,
}

wire_enum!(PolicyType {
    UserId => "USER_ID",
    Ip => "IP",
    Device => "DEVICE",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyMethod {
    Allow,
    Deny,
}

wire_enum!(PolicyMethod {
    Allow => "ALLOW",
    Deny => "DENY",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginPolicy {
    pub id: LoginPolicyId,
    pub tenant_id: TenantId,
    /// Scopes the rule to one user; `None` applies to everyone.
    pub target_id: Option<UserId>,
    pub policy_type: PolicyType,
    pub method: PolicyMethod,
    /// User id, IP address, CIDR block or device id depending on type.
    pub value: String,
    pub reason: Option<String>,
    pub audit: AuditFields,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLoginPolicy {
    pub tenant_id: TenantId,
    pub target_id: Option<UserId>,
    pub policy_type: PolicyType,
    pub method: PolicyMethod,
    pub value: String,
    pub reason: Option<String>,
    pub created_by: Option<UserId>,
}

impl NewLoginPolicy {
    pub fn validate(&self) -> DomainResult<()> {
        let value = self.value.trim();
        if value.is_empty() {
            return Err(DomainError::bad_request("policy value is required"));
        }
        match self.policy_type {
            PolicyType::UserId => {
                value
                    .parse::<u32>()
                    .map_err(|_| DomainError::bad_request("policy value must be a user id"))?;
            }
            PolicyType::Ip => {
                IpRule::parse(value)
                    .ok_or_else(|| DomainError::bad_request("policy value must be an IP or CIDR"))?;
            }
            PolicyType::Device => {}
        }
        Ok(())
    }

    pub fn into_policy(self, id: LoginPolicyId, now: DateTime<Utc>) -> LoginPolicy {
        LoginPolicy {
            id,
            tenant_id: self.tenant_id,
            target_id: self.target_id,
            policy_type: self.policy_type,
            method: self.method,
            value: self.value.trim().to_string(),
            reason: self.reason,
            audit: AuditFields::created(now, self.created_by),
        }
    }
}

/// What the gate knows about a login attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginAttempt {
    pub user_id: Option<UserId>,
    pub ip: Option<IpAddr>,
    pub device_id: Option<String>,
}

impl LoginPolicy {
    pub fn applies_to(&self, attempt: &LoginAttempt) -> bool {
        match self.target_id {
            Some(target) => attempt.user_id == Some(target),
            None => true,
        }
    }

    pub fn matches(&self, attempt: &LoginAttempt) -> bool {
        let value = self.value.trim();
        match self.policy_type {
            PolicyType::UserId => attempt
                .user_id
                .is_some_and(|uid| value.parse::<u32>().is_ok_and(|v| v == uid.get())),
            PolicyType::Ip => attempt
                .ip
                .is_some_and(|ip| IpRule::parse(value).is_some_and(|rule| rule.contains(ip))),
            PolicyType::Device => attempt.device_id.as_deref() == Some(value),
        }
    }
}

/// Apply the rules: any matching DENY rejects; otherwise the attempt passes.
pub fn evaluate(policies: &[LoginPolicy], attempt: &LoginAttempt) -> DomainResult<()> {
    let denied = policies.iter().find(|p| {
        p.method == PolicyMethod::Deny && p.applies_to(attempt) && p.matches(attempt)
    });
    match denied {
        Some(rule) => Err(DomainError::forbidden(
            rule.reason.clone().unwrap_or_else(|| "login denied by policy".to_string()),
        )),
        None => Ok(()),
    }
}

/// A single address or a CIDR block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IpRule {
    network: IpAddr,
    prefix: u8,
}

impl IpRule {
    fn parse(value: &str) -> Option<Self> {
        let (addr, prefix) = match value.split_once('/') {
            Some((addr, prefix)) => (addr.parse::<IpAddr>().ok()?, Some(prefix.parse::<u8>().ok()?)),
            None => (value.parse::<IpAddr>().ok()?, None),
        };
        let max = if addr.is_ipv4() { 32 } else { 128 };
        let prefix = prefix.unwrap_or(max);
        (prefix <= max).then_some(Self { network: addr, prefix })
    }

    fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                prefix_eq(u32::from(net).into(), u32::from(ip).into(), self.prefix, 32)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                prefix_eq(u128::from(net), u128::from(ip), self.prefix, 128)
            }
            _ => false,
        }
    }
}

fn prefix_eq(a: u128, b: u128, prefix: u8, bits: u32) -> bool {
    if prefix == 0 {
        return true;
    }
    let shift = bits - u32::from(prefix);
    (a >> shift) == (b >> shift)
}

#[cfg(test)]
mod tests {
    use windcms_core::ErrorCode;

    use super::*;

    fn rule(policy_type: PolicyType, method: PolicyMethod, value: &str) -> LoginPolicy {
        LoginPolicy {
            id: LoginPolicyId::new(1),
            tenant_id: TenantId::new(1),
            target_id: None,
            policy_type,
            method,
            value: value.into(),
            reason: Some("blocked".into()),
            audit: AuditFields::default(),
        }
    }

    fn attempt(ip: &str) -> LoginAttempt {
        LoginAttempt {
            user_id: Some(UserId::new(42)),
            ip: Some(ip.parse().unwrap()),
            device_id: Some("dev-1".into()),
        }
    }

    #[test]
    fn deny_beats_allow() {
        let rules = vec![
            rule(PolicyType::Ip, PolicyMethod::Allow, "10.0.0.1"),
            rule(PolicyType::Ip, PolicyMethod::Deny, "10.0.0.0/8"),
        ];
        let err = evaluate(&rules, &attempt("10.0.0.1")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Forbidden);
        assert_eq!(err.message(), "blocked");
    }

    #[test]
    fn no_matching_deny_passes() {
        let rules = vec![rule(PolicyType::Ip, PolicyMethod::Deny, "10.0.0.0/8")];
        assert!(evaluate(&rules, &attempt("192.168.1.1")).is_ok());
        assert!(evaluate(&[], &attempt("10.0.0.1")).is_ok());
    }

    #[test]
    fn matches_user_and_device() {
        assert!(rule(PolicyType::UserId, PolicyMethod::Deny, "42").matches(&attempt("1.1.1.1")));
        assert!(rule(PolicyType::Device, PolicyMethod::Deny, "dev-1").matches(&attempt("1.1.1.1")));
        assert!(!rule(PolicyType::Device, PolicyMethod::Deny, "dev-2").matches(&attempt("1.1.1.1")));
    }

    #[test]
    fn targeted_rule_ignores_other_users() {
        let mut r = rule(PolicyType::Ip, PolicyMethod::Deny, "1.1.1.1");
        r.target_id = Some(UserId::new(7));
        assert!(evaluate(&[r], &attempt("1.1.1.1")).is_ok());
    }

    #[test]
    fn cidr_edges() {
        let r = IpRule::parse("192.168.0.0/16").unwrap();
        assert!(r.contains("192.168.255.1".parse().unwrap()));
        assert!(!r.contains("192.169.0.1".parse().unwrap()));
        assert!(IpRule::parse("0.0.0.0/0").unwrap().contains("8.8.8.8".parse().unwrap()));
        assert!(IpRule::parse("fe80::/10").unwrap().contains("fe80::1".parse().unwrap()));
        assert!(IpRule::parse("1.2.3.4/33").is_none());
        assert!(IpRule::parse("not-an-ip").is_none());
    }
}
