use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::cli::{Command, ListArgs};

/// Relay ACL administration configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "relay-acl")]
#[command(about = "Manage and test relay access-control lists")]
pub struct Config {
    /// Path to relay policy YAML file
    #[arg(long = "config", default_value = "relay_acl.yaml", env = "RELAY_ACL_CONFIG", global = true)]
    pub policy_path: PathBuf,

    /// Path to rule database (overrides db_file from the policy file)
    #[arg(long, env = "RELAY_ACL_DB_FILE", global = true)]
    pub db_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", env = "RUST_LOG", global = true)]
    pub log_level: String,

    /// Bound on each rule store read during a check, in milliseconds
    #[arg(long, default_value = "1000", env = "RELAY_ACL_STORE_TIMEOUT_MS", global = true)]
    pub store_timeout_ms: u64,

    /// Policy reload check interval in seconds (at least 1)
    #[arg(
        long,
        default_value = "30",
        env = "RELAY_ACL_POLICY_RELOAD_SECS",
        global = true,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub policy_reload_secs: u64,

    #[command(subcommand)]
    pub command: Command,
}

impl Config {
    /// Get store timeout as Duration.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Get policy reload interval as Duration.
    pub fn policy_reload_interval(&self) -> Duration {
        Duration::from_secs(self.policy_reload_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            policy_path: PathBuf::from("relay_acl.yaml"),
            db_file: None,
            log_level: "warn".to_string(),
            store_timeout_ms: 1000,
            policy_reload_secs: 30,
            command: Command::List(ListArgs::default()),
        }
    }
}
