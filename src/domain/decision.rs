use serde::{Deserialize, Serialize};
use std::fmt;

use super::acl::{AclRule, Action};
use super::policy::DefaultHandle;
use super::result::ResultRecord;

/// Verdict of one relay evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    /// Relay allowed
    Permit,
    /// Relay rejected
    Deny,
    /// No opinion registered, the session proceeds
    Continue,
}

impl Outcome {
    /// Label used in result record messages.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Permit => "permit",
            Outcome::Deny => "deny",
            Outcome::Continue => "skip",
        }
    }
}

impl From<Action> for Outcome {
    fn from(action: Action) -> Self {
        match action {
            Action::Permit => Outcome::Permit,
            Action::Deny => Outcome::Deny,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Permit => write!(f, "PERMIT"),
            Outcome::Deny => write!(f, "DENY"),
            Outcome::Continue => write!(f, "CONTINUE"),
        }
    }
}

/// Stage of the evaluation that produced the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    /// A rule of the domain matched
    RuleMatch,
    /// The domain is usable but no rule matched
    DomainImplicit,
    /// The domain is missing, disabled or could not be read
    GlobalDefault,
}

impl Tier {
    /// Source tag attached to result records.
    pub fn source_tag(&self) -> &'static str {
        match self {
            Tier::RuleMatch => "acl",
            Tier::DomainImplicit => "domain",
            Tier::GlobalDefault => "implicit",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::RuleMatch => write!(f, "RULE_MATCH"),
            Tier::DomainImplicit => write!(f, "DOMAIN_IMPLICIT"),
            Tier::GlobalDefault => write!(f, "GLOBAL_DEFAULT"),
        }
    }
}

/// Result of evaluating a relaying session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub outcome: Outcome,
    pub tier: Tier,

    /// Sequence of the matching rule for [`Tier::RuleMatch`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_sequence: Option<u32>,
}

impl Decision {
    /// Decision taken by a matching rule.
    pub fn rule_match(rule: &AclRule) -> Self {
        Decision {
            outcome: rule.action.into(),
            tier: Tier::RuleMatch,
            matched_sequence: Some(rule.sequence),
        }
    }

    /// Decision taken by a domain's implicit action.
    pub fn domain_implicit(action: Action) -> Self {
        Decision {
            outcome: action.into(),
            tier: Tier::DomainImplicit,
            matched_sequence: None,
        }
    }

    /// Decision taken by the global default handling.
    pub fn global_default(handle: DefaultHandle) -> Self {
        let outcome = match handle {
            DefaultHandle::Permit => Outcome::Permit,
            DefaultHandle::Deny => Outcome::Deny,
            DefaultHandle::Skip => Outcome::Continue,
        };

        Decision {
            outcome,
            tier: Tier::GlobalDefault,
            matched_sequence: None,
        }
    }

    /// Returns true if the session must be rejected.
    ///
    /// `Continue` is indistinguishable from `Permit` at this level.
    #[inline]
    pub fn rejects(&self) -> bool {
        self.outcome == Outcome::Deny
    }

    /// Result record describing this decision.
    pub fn to_record(&self) -> ResultRecord {
        let tag = self.tier.source_tag();
        let message = format!("{}({})", tag, self.outcome.label());

        match self.outcome {
            Outcome::Permit => ResultRecord::pass(tag, message),
            Outcome::Deny => ResultRecord::fail(tag, message),
            Outcome::Continue => ResultRecord::skip(tag, message),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.matched_sequence {
            Some(seq) => write!(f, "{} ({} seq={})", self.outcome, self.tier, seq),
            None => write!(f, "{} ({})", self.outcome, self.tier),
        }
    }
}
