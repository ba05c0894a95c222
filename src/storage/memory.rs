// src/storage/memory.rs
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::domain::{AclRule, Action, Domain, DomainPatch, RulePatch, SEQUENCE_LIMIT};

use super::traits::{Constraint, RuleStore, StoreError, StoreResult};

#[derive(Debug, Default)]
struct Tables {
    domains: BTreeMap<String, Domain>,
    rules: BTreeMap<(String, u32), AclRule>,
}

impl Tables {
    fn rules_of<'a>(&'a self, domain: &str) -> impl Iterator<Item = &'a AclRule> + 'a {
        self.rules
            .range((domain.to_string(), 0)..=(domain.to_string(), u32::MAX))
            .map(|(_, rule)| rule)
    }

    fn rule_mut(&mut self, domain: &str, sequence: u32) -> Option<&mut AclRule> {
        self.rules.get_mut(&(domain.to_string(), sequence))
    }
}

/// In-memory rule store with the same constraint semantics as the SQLite
/// store. All tables sit behind one lock so each call is atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
    read_delay: Mutex<Option<Duration>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `StoreError::Unavailable` (for testing).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every read by the given duration (for testing).
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        *self.read_delay.lock() = delay;
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }

    async fn before_read(&self) -> StoreResult<()> {
        let delay = *self.read_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check_available()
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn get_domain(&self, name: &str) -> StoreResult<Option<Domain>> {
        self.before_read().await?;
        Ok(self.tables.lock().domains.get(name).cloned())
    }

    async fn list_domains(&self) -> StoreResult<Vec<Domain>> {
        self.before_read().await?;
        Ok(self.tables.lock().domains.values().cloned().collect())
    }

    async fn insert_domain(&self, domain: &Domain) -> StoreResult<()> {
        self.check_available()?;
        let mut tables = self.tables.lock();

        if tables.domains.contains_key(&domain.name) {
            return Err(StoreError::ConstraintViolation(Constraint::DuplicateDomain(
                domain.name.clone(),
            )));
        }
        tables.domains.insert(domain.name.clone(), domain.clone());
        Ok(())
    }

    async fn update_domain_implicit(&self, name: &str, action: Action) -> StoreResult<bool> {
        let patch = DomainPatch {
            implicit_action: Some(action),
            enabled: None,
        };
        self.update_domain(name, &patch).await
    }

    async fn update_domain_enabled(&self, name: &str, enabled: bool) -> StoreResult<bool> {
        let patch = DomainPatch {
            implicit_action: None,
            enabled: Some(enabled),
        };
        self.update_domain(name, &patch).await
    }

    async fn update_domain(&self, name: &str, patch: &DomainPatch) -> StoreResult<bool> {
        self.check_available()?;
        let mut tables = self.tables.lock();

        let Some(domain) = tables.domains.get_mut(name) else {
            return Ok(false);
        };
        if let Some(action) = patch.implicit_action {
            domain.implicit_action = action;
        }
        if let Some(enabled) = patch.enabled {
            domain.enabled = enabled;
        }
        Ok(true)
    }

    async fn delete_domain(&self, name: &str) -> StoreResult<bool> {
        self.check_available()?;
        let mut tables = self.tables.lock();

        if tables.domains.remove(name).is_none() {
            return Ok(false);
        }
        tables.rules.retain(|(domain, _), _| domain != name);
        Ok(true)
    }

    async fn list_rules(&self, domain: &str) -> StoreResult<Vec<AclRule>> {
        self.before_read().await?;
        Ok(self.tables.lock().rules_of(domain).cloned().collect())
    }

    async fn max_sequence(&self, domain: &str) -> StoreResult<Option<u32>> {
        self.before_read().await?;
        Ok(self.tables.lock().rules_of(domain).map(|r| r.sequence).max())
    }

    async fn rule_exists(&self, domain: &str, sequence: u32) -> StoreResult<bool> {
        self.before_read().await?;
        Ok(self
            .tables
            .lock()
            .rules
            .contains_key(&(domain.to_string(), sequence)))
    }

    async fn insert_rule(&self, rule: &AclRule) -> StoreResult<()> {
        self.check_available()?;
        if rule.sequence >= SEQUENCE_LIMIT {
            return Err(StoreError::ConstraintViolation(Constraint::SequenceOutOfRange {
                domain: rule.domain.clone(),
                sequence: rule.sequence,
            }));
        }
        let mut tables = self.tables.lock();

        if !tables.domains.contains_key(&rule.domain) {
            return Err(StoreError::ConstraintViolation(Constraint::UnknownDomain(
                rule.domain.clone(),
            )));
        }

        let key = (rule.domain.clone(), rule.sequence);
        if tables.rules.contains_key(&key) {
            return Err(StoreError::ConstraintViolation(Constraint::DuplicateRule {
                domain: rule.domain.clone(),
                sequence: rule.sequence,
            }));
        }
        tables.rules.insert(key, rule.clone());
        Ok(())
    }

    async fn update_rule_user(
        &self,
        domain: &str,
        sequence: u32,
        user: Option<&str>,
    ) -> StoreResult<bool> {
        let patch = RulePatch {
            user: Some(user.map(str::to_string)),
            ..Default::default()
        };
        self.update_rule(domain, sequence, &patch).await
    }

    async fn update_rule_address(
        &self,
        domain: &str,
        sequence: u32,
        address: Option<&str>,
    ) -> StoreResult<bool> {
        let patch = RulePatch {
            address: Some(address.map(str::to_string)),
            ..Default::default()
        };
        self.update_rule(domain, sequence, &patch).await
    }

    async fn update_rule_action(
        &self,
        domain: &str,
        sequence: u32,
        action: Action,
    ) -> StoreResult<bool> {
        let patch = RulePatch {
            action: Some(action),
            ..Default::default()
        };
        self.update_rule(domain, sequence, &patch).await
    }

    async fn update_rule(
        &self,
        domain: &str,
        sequence: u32,
        patch: &RulePatch,
    ) -> StoreResult<bool> {
        self.check_available()?;
        let mut tables = self.tables.lock();

        match tables.rule_mut(domain, sequence) {
            Some(rule) => {
                patch.apply_to(rule);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_rule(&self, domain: &str, sequence: u32) -> StoreResult<bool> {
        self.check_available()?;
        Ok(self
            .tables
            .lock()
            .rules
            .remove(&(domain.to_string(), sequence))
            .is_some())
    }
}
