use std::sync::Arc;
use tracing::info;

use crate::domain::{AclRule, Action, Domain, DomainPatch, RulePatch};
use crate::storage::RuleStore;

use super::error::{AdminError, AdminResult};
use super::validate::{
    next_sequence, normalize_address, normalize_user, validate_hostname, validate_sequence,
};

/// Rule to add. Omitted fields take their defaults: an allocated
/// sequence, wildcard user and address, permit.
#[derive(Debug, Clone, Default)]
pub struct RuleDraft {
    pub sequence: Option<i64>,
    pub user: Option<String>,
    pub address: Option<String>,
    pub action: Option<Action>,
}

/// Changes to an existing rule. Omitted fields are left untouched; an
/// empty user or address resets the field to the wildcard.
#[derive(Debug, Clone, Default)]
pub struct RuleChanges {
    pub user: Option<String>,
    pub address: Option<String>,
    pub action: Option<Action>,
}

impl RuleChanges {
    fn into_patch(self) -> AdminResult<RulePatch> {
        let address = match self.address {
            Some(text) => Some(normalize_address(Some(&text))?),
            None => None,
        };

        Ok(RulePatch {
            user: self.user.map(|u| normalize_user(Some(u))),
            address,
            action: self.action,
        })
    }
}

/// A domain with its rules, when requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainListing {
    pub domain: Domain,
    pub rules: Option<Vec<AclRule>>,
}

/// Validating front end over a rule store.
///
/// Every input is validated before the store is touched, and each command
/// changes the store in a single store call.
pub struct RuleAdmin {
    store: Arc<dyn RuleStore>,
}

impl RuleAdmin {
    pub fn new(store: Arc<dyn RuleStore>) -> Self {
        RuleAdmin { store }
    }

    /// List one domain or all domains, optionally with their rules.
    pub async fn list(&self, domain: Option<&str>, with_rules: bool) -> AdminResult<Vec<DomainListing>> {
        let domains = match domain {
            Some(name) => vec![self.require_domain(name).await?],
            None => self.store.list_domains().await?,
        };

        let mut listings = Vec::with_capacity(domains.len());
        for domain in domains {
            let rules = if with_rules {
                Some(self.store.list_rules(&domain.name).await?)
            } else {
                None
            };
            listings.push(DomainListing { domain, rules });
        }

        Ok(listings)
    }

    /// Rules of an existing domain in evaluation order.
    pub async fn rules(&self, domain: &str) -> AdminResult<Vec<AclRule>> {
        self.require_domain(domain).await?;
        Ok(self.store.list_rules(domain).await?)
    }

    /// Create a domain. Unset fields default to implicit permit and enabled.
    pub async fn add_domain(&self, name: &str, settings: &DomainPatch) -> AdminResult<Domain> {
        validate_hostname(name)?;

        let domain = Domain {
            name: name.to_string(),
            implicit_action: settings.implicit_action.unwrap_or_default(),
            enabled: settings.enabled.unwrap_or(true),
        };
        self.store.insert_domain(&domain).await?;

        info!(domain = name, implicit = %domain.implicit_action, enabled = domain.enabled, "Domain added");
        Ok(domain)
    }

    /// Change the supplied fields of an existing domain.
    pub async fn modify_domain(&self, name: &str, patch: &DomainPatch) -> AdminResult<Domain> {
        validate_hostname(name)?;
        self.require_domain(name).await?;

        if !patch.is_empty() && !self.store.update_domain(name, patch).await? {
            return Err(AdminError::DomainNotFound(name.to_string()));
        }

        info!(domain = name, patch = ?patch, "Domain modified");
        self.require_domain(name).await
    }

    /// Delete a domain and its rules. Returns whether it existed.
    pub async fn delete_domain(&self, name: &str) -> AdminResult<bool> {
        validate_hostname(name)?;

        let removed = self.store.delete_domain(name).await?;
        if removed {
            info!(domain = name, "Domain deleted");
        }
        Ok(removed)
    }

    /// Add a rule, allocating the sequence number when none is given.
    pub async fn add_rule(&self, domain: &str, draft: RuleDraft) -> AdminResult<AclRule> {
        validate_hostname(domain)?;
        self.require_domain(domain).await?;

        let sequence = match draft.sequence {
            Some(seq) => validate_sequence(seq)?,
            None => {
                let max = self.store.max_sequence(domain).await?;
                next_sequence(max).ok_or(AdminError::SequenceExhausted {
                    max: max.unwrap_or(0),
                })?
            }
        };
        let address = normalize_address(draft.address.as_deref())?;

        if self.store.rule_exists(domain, sequence).await? {
            return Err(AdminError::DuplicateSequence {
                domain: domain.to_string(),
                sequence,
            });
        }

        let rule = AclRule {
            domain: domain.to_string(),
            sequence,
            user: normalize_user(draft.user),
            address,
            action: draft.action.unwrap_or_default(),
        };

        // The store re-checks uniqueness, so a concurrent add of the same
        // sequence surfaces as DuplicateSequence
        self.store.insert_rule(&rule).await?;

        info!(
            domain = domain,
            sequence = sequence,
            user = ?rule.user,
            address = ?rule.address,
            action = %rule.action,
            "Rule added"
        );
        Ok(rule)
    }

    /// Change the supplied fields of an existing rule.
    pub async fn modify_rule(
        &self,
        domain: &str,
        sequence: i64,
        changes: RuleChanges,
    ) -> AdminResult<AclRule> {
        validate_hostname(domain)?;
        self.require_domain(domain).await?;
        let sequence = validate_sequence(sequence)?;
        let patch = changes.into_patch()?;

        let not_found = || AdminError::RuleNotFound {
            domain: domain.to_string(),
            sequence,
        };

        if !self.store.rule_exists(domain, sequence).await? {
            return Err(not_found());
        }
        if !patch.is_empty() && !self.store.update_rule(domain, sequence, &patch).await? {
            return Err(not_found());
        }

        info!(domain = domain, sequence = sequence, patch = ?patch, "Rule modified");

        self.store
            .list_rules(domain)
            .await?
            .into_iter()
            .find(|rule| rule.sequence == sequence)
            .ok_or_else(not_found)
    }

    /// Delete a rule. Returns whether it existed.
    pub async fn delete_rule(&self, domain: &str, sequence: i64) -> AdminResult<bool> {
        validate_hostname(domain)?;
        self.require_domain(domain).await?;
        let sequence = validate_sequence(sequence)?;

        let removed = self.store.delete_rule(domain, sequence).await?;
        if removed {
            info!(domain = domain, sequence = sequence, "Rule deleted");
        }
        Ok(removed)
    }

    async fn require_domain(&self, name: &str) -> AdminResult<Domain> {
        self.store
            .get_domain(name)
            .await?
            .ok_or_else(|| AdminError::DomainNotFound(name.to_string()))
    }
}
