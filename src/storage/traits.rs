// src/storage/traits.rs
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

use crate::domain::{AclRule, Action, Domain, DomainPatch, RulePatch};

/// Integrity constraint that rejected a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    /// A domain with this name already exists
    DuplicateDomain(String),
    /// A rule with this (domain, sequence) already exists
    DuplicateRule { domain: String, sequence: u32 },
    /// The referenced domain does not exist
    UnknownDomain(String),
    /// The sequence lies outside `[0, 1000)`
    SequenceOutOfRange { domain: String, sequence: u32 },
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::DuplicateDomain(name) => write!(f, "domain '{}' already exists", name),
            Constraint::DuplicateRule { domain, sequence } => {
                write!(f, "rule {} of domain '{}' already exists", sequence, domain)
            }
            Constraint::UnknownDomain(name) => write!(f, "domain '{}' does not exist", name),
            Constraint::SequenceOutOfRange { domain, sequence } => {
                write!(f, "rule {} of domain '{}' is outside 0 <= x < 1000", sequence, domain)
            }
        }
    }
}

/// Errors raised by rule store implementations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Constraint violation: {0}")]
    ConstraintViolation(Constraint),

    #[error("Rule store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Transactional storage of domains and their ACL rules.
///
/// Every method runs as a single transaction. Update and delete methods
/// return whether a row was changed.
#[async_trait]
pub trait RuleStore: Send + Sync {
    // Domains
    async fn get_domain(&self, name: &str) -> StoreResult<Option<Domain>>;
    async fn list_domains(&self) -> StoreResult<Vec<Domain>>;
    async fn insert_domain(&self, domain: &Domain) -> StoreResult<()>;
    async fn update_domain_implicit(&self, name: &str, action: Action) -> StoreResult<bool>;
    async fn update_domain_enabled(&self, name: &str, enabled: bool) -> StoreResult<bool>;
    async fn update_domain(&self, name: &str, patch: &DomainPatch) -> StoreResult<bool>;
    async fn delete_domain(&self, name: &str) -> StoreResult<bool>;

    // Rules
    async fn list_rules(&self, domain: &str) -> StoreResult<Vec<AclRule>>;
    async fn max_sequence(&self, domain: &str) -> StoreResult<Option<u32>>;
    async fn rule_exists(&self, domain: &str, sequence: u32) -> StoreResult<bool>;
    async fn insert_rule(&self, rule: &AclRule) -> StoreResult<()>;
    async fn update_rule_user(&self, domain: &str, sequence: u32, user: Option<&str>) -> StoreResult<bool>;
    async fn update_rule_address(&self, domain: &str, sequence: u32, address: Option<&str>) -> StoreResult<bool>;
    async fn update_rule_action(&self, domain: &str, sequence: u32, action: Action) -> StoreResult<bool>;
    async fn update_rule(&self, domain: &str, sequence: u32, patch: &RulePatch) -> StoreResult<bool>;
    async fn delete_rule(&self, domain: &str, sequence: u32) -> StoreResult<bool>;
}
