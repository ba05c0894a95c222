pub mod admin;
pub mod cli;
pub mod config;
pub mod domain;
pub mod observability;
pub mod policy;
pub mod rules;
pub mod storage;

pub use admin::{AdminError, RuleAdmin};
pub use config::Config;
pub use domain::{AclRule, Decision, Domain, RelaySession, ResultRecord};
pub use rules::RelayAclEngine;
pub use storage::{MemoryStore, RuleStore, SqliteStore};
