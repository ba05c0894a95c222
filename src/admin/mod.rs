//! Validated administration of domains and ACL rules.

pub mod error;
pub mod service;
pub mod validate;

pub use error::{AdminError, AdminResult};
pub use service::{DomainListing, RuleAdmin, RuleChanges, RuleDraft};
