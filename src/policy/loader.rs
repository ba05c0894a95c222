use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::domain::RelayPolicy;

/// Errors that can occur during policy loading.
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Load a relay policy from a YAML file.
///
/// An empty file yields the default policy.
pub fn load_policy(path: impl AsRef<Path>) -> Result<RelayPolicy, PolicyError> {
    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(RelayPolicy::default());
    }

    let policy: RelayPolicy = serde_yaml::from_str(&content)?;
    Ok(policy)
}

/// Policy loader bound to a file path, with an optional database override
/// coming from the command line.
#[derive(Debug, Clone)]
pub struct PolicyLoader {
    policy_path: PathBuf,
    db_file: Option<PathBuf>,
}

impl PolicyLoader {
    /// Create a new policy loader.
    pub fn new(policy_path: impl Into<PathBuf>) -> Self {
        PolicyLoader {
            policy_path: policy_path.into(),
            db_file: None,
        }
    }

    /// Force the database location regardless of the file contents.
    pub fn with_db_file(mut self, db_file: Option<PathBuf>) -> Self {
        self.db_file = db_file;
        self
    }

    /// Load the policy. A missing file yields the defaults.
    pub fn load(&self) -> Result<RelayPolicy, PolicyError> {
        let mut policy = match load_policy(&self.policy_path) {
            Ok(policy) => policy,
            Err(PolicyError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.policy_path.display(), "Policy file not found, using defaults");
                RelayPolicy::default()
            }
            Err(e) => return Err(e),
        };

        if let Some(db_file) = &self.db_file {
            policy.db_file = db_file.clone();
        }

        Ok(policy)
    }

    /// Get the policy file path.
    pub fn policy_path(&self) -> &Path {
        &self.policy_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DefaultHandle;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_policy() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
default_handle: permit
db_file: /tmp/acl.db
"#
        )
        .unwrap();

        let policy = load_policy(file.path()).unwrap();

        assert_eq!(policy.default_handle, DefaultHandle::Permit);
        assert_eq!(policy.db_file, PathBuf::from("/tmp/acl.db"));
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let file = NamedTempFile::new().unwrap();
        let policy = load_policy(file.path()).unwrap();
        assert_eq!(policy, RelayPolicy::default());
    }

    #[test]
    fn test_invalid_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "default_handle: [permit").unwrap();

        let result = load_policy(file.path());
        assert!(matches!(result, Err(PolicyError::Yaml(_))));
    }

    #[test]
    fn test_loader_missing_file_and_override() {
        let dir = tempfile::tempdir().unwrap();
        let loader = PolicyLoader::new(dir.path().join("absent.yaml"))
            .with_db_file(Some(PathBuf::from("override.db")));

        let policy = loader.load().unwrap();

        assert_eq!(policy.default_handle, DefaultHandle::Skip);
        assert_eq!(policy.db_file, PathBuf::from("override.db"));
    }
}
