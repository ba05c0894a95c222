use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Behaviour of the global default tier, used when the target domain is
/// unknown or disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum DefaultHandle {
    /// Let the session continue and record a pass
    Permit,
    /// Reject the relay attempt
    Deny,
    /// Let the session continue without registering an opinion
    Skip,
}

impl DefaultHandle {
    /// Parse from string representation, `None` for unknown values.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "permit" => Some(DefaultHandle::Permit),
            "deny" => Some(DefaultHandle::Deny),
            "skip" => Some(DefaultHandle::Skip),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DefaultHandle::Permit => "permit",
            DefaultHandle::Deny => "deny",
            DefaultHandle::Skip => "skip",
        }
    }
}

impl Default for DefaultHandle {
    fn default() -> Self {
        DefaultHandle::Skip
    }
}

// Unknown values behave like `skip`.
impl From<String> for DefaultHandle {
    fn from(s: String) -> Self {
        DefaultHandle::parse(&s).unwrap_or_default()
    }
}

impl fmt::Display for DefaultHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relay policy settings read from the policy file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayPolicy {
    /// Global default tier behaviour
    #[serde(default)]
    pub default_handle: DefaultHandle,

    /// Location of the rule store database
    #[serde(default = "default_db_file")]
    pub db_file: PathBuf,
}

fn default_db_file() -> PathBuf {
    PathBuf::from("relay_acl.db")
}

impl Default for RelayPolicy {
    fn default() -> Self {
        RelayPolicy {
            default_handle: DefaultHandle::default(),
            db_file: default_db_file(),
        }
    }
}

impl RelayPolicy {
    pub fn with_default_handle(mut self, handle: DefaultHandle) -> Self {
        self.default_handle = handle;
        self
    }
}
