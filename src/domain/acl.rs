use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

use crate::rules::address;

/// Upper bound (exclusive) for rule sequence numbers.
pub const SEQUENCE_LIMIT: u32 = 1000;

/// Step used when a sequence number is allocated automatically.
pub const SEQUENCE_STEP: u32 = 10;

/// Verdict attached to a rule or used as a domain's implicit action.
///
/// Persisted as a boolean where `true` means permit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Let the relay attempt proceed
    Permit,
    /// Reject the relay attempt
    Deny,
}

impl Action {
    /// Build from the stored boolean representation.
    #[inline]
    pub fn from_permit(permit: bool) -> Self {
        if permit {
            Action::Permit
        } else {
            Action::Deny
        }
    }

    /// Stored boolean representation.
    #[inline]
    pub fn is_permit(&self) -> bool {
        *self == Action::Permit
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Permit => "permit",
            Action::Deny => "deny",
        }
    }
}

impl Default for Action {
    fn default() -> Self {
        Action::Permit
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A relay target domain with its fallback behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    /// Hostname, primary key
    pub name: String,

    /// Decision applied when no rule of this domain matches
    pub implicit_action: Action,

    /// Disabled domains are ignored by the decision engine
    pub enabled: bool,
}

impl Domain {
    /// Create an enabled domain with an implicit permit.
    pub fn new(name: impl Into<String>) -> Self {
        Domain {
            name: name.into(),
            implicit_action: Action::Permit,
            enabled: true,
        }
    }

    pub fn with_implicit(mut self, action: Action) -> Self {
        self.implicit_action = action;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// A single ordered access-control entry of a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclRule {
    /// Owning domain name
    pub domain: String,

    /// Evaluation order within the domain, unique per domain
    pub sequence: u32,

    /// Authenticated user to match, `None` matches any user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Source network as `address/prefix`, `None` matches any address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Verdict when the rule matches
    pub action: Action,
}

impl AclRule {
    /// Create a wildcard rule (any user, any address).
    pub fn new(domain: impl Into<String>, sequence: u32, action: Action) -> Self {
        AclRule {
            domain: domain.into(),
            sequence,
            user: None,
            address: None,
            action,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Check whether this rule accepts the given user and source address.
    ///
    /// An unparseable remote address or stored address never matches an
    /// address-restricted rule.
    pub fn matches(&self, user: Option<&str>, remote: Option<IpAddr>) -> bool {
        if let Some(expected) = self.user.as_deref() {
            if user != Some(expected) {
                return false;
            }
        }

        match self.address.as_deref() {
            None => true,
            Some(spec) => remote.is_some_and(|ip| address::spec_matches(ip, spec)),
        }
    }
}

/// Field changes for an existing domain. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainPatch {
    pub implicit_action: Option<Action>,
    pub enabled: Option<bool>,
}

impl DomainPatch {
    pub fn is_empty(&self) -> bool {
        self.implicit_action.is_none() && self.enabled.is_none()
    }
}

/// Field changes for an existing rule.
///
/// The outer `Option` says whether the field is touched at all; for user
/// and address an inner `None` resets the field to the wildcard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RulePatch {
    pub user: Option<Option<String>>,
    pub address: Option<Option<String>>,
    pub action: Option<Action>,
}

impl RulePatch {
    pub fn is_empty(&self) -> bool {
        self.user.is_none() && self.address.is_none() && self.action.is_none()
    }

    /// Apply the changes to a rule value.
    pub fn apply_to(&self, rule: &mut AclRule) {
        if let Some(user) = &self.user {
            rule.user = user.clone();
        }
        if let Some(address) = &self.address {
            rule.address = address.clone();
        }
        if let Some(action) = self.action {
            rule.action = action;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> Option<IpAddr> {
        s.parse().ok()
    }

    #[test]
    fn test_action_bool_mapping() {
        assert_eq!(Action::from_permit(true), Action::Permit);
        assert_eq!(Action::from_permit(false), Action::Deny);
        assert!(Action::Permit.is_permit());
        assert!(!Action::Deny.is_permit());
    }

    #[test]
    fn test_wildcard_rule_matches_everything() {
        let rule = AclRule::new("example.com", 10, Action::Permit);

        assert!(rule.matches(None, ip("10.0.0.1")));
        assert!(rule.matches(Some("alice"), ip("::1")));
        assert!(rule.matches(None, None));
    }

    #[test]
    fn test_user_rule() {
        let rule = AclRule::new("example.com", 10, Action::Deny).with_user("alice");

        assert!(rule.matches(Some("alice"), ip("10.0.0.1")));
        assert!(!rule.matches(Some("bob"), ip("10.0.0.1")));
        assert!(!rule.matches(None, ip("10.0.0.1")));
    }

    #[test]
    fn test_address_rule() {
        let rule = AclRule::new("example.com", 10, Action::Deny).with_address("10.0.0.0/8");

        assert!(rule.matches(None, ip("10.1.1.1")));
        assert!(!rule.matches(None, ip("8.8.8.8")));
        assert!(!rule.matches(None, None));
    }

    #[test]
    fn test_user_and_address_must_both_match() {
        let rule = AclRule::new("example.com", 10, Action::Permit)
            .with_user("alice")
            .with_address("192.168.0.0/16");

        assert!(rule.matches(Some("alice"), ip("192.168.4.2")));
        assert!(!rule.matches(Some("alice"), ip("10.0.0.1")));
        assert!(!rule.matches(Some("bob"), ip("192.168.4.2")));
    }

    #[test]
    fn test_malformed_stored_address_never_matches() {
        let rule = AclRule::new("example.com", 10, Action::Permit).with_address("not-an-ip/8");

        assert!(!rule.matches(None, ip("10.0.0.1")));
    }

    #[test]
    fn test_rule_patch_partial_update() {
        let mut rule = AclRule::new("example.com", 10, Action::Permit)
            .with_user("alice")
            .with_address("10.0.0.0/8");

        let patch = RulePatch {
            user: Some(None),
            address: None,
            action: Some(Action::Deny),
        };
        patch.apply_to(&mut rule);

        assert_eq!(rule.user, None);
        assert_eq!(rule.address.as_deref(), Some("10.0.0.0/8"));
        assert_eq!(rule.action, Action::Deny);
    }
}
