use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Inputs supplied by the host SMTP session for one relay evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelaySession {
    /// Whether the session is relaying; non-relaying sessions are not evaluated
    pub relaying: bool,

    /// Remote peer address as reported by the connection
    pub remote_ip: String,

    /// Authenticated user, if the sender authenticated
    #[serde(default)]
    pub auth_user: Option<String>,

    /// Host part of the target domain
    pub target_host: String,
}

impl RelaySession {
    /// Create a relaying session without an authenticated user.
    pub fn new(target_host: impl Into<String>, remote_ip: impl Into<String>) -> Self {
        RelaySession {
            relaying: true,
            remote_ip: remote_ip.into(),
            auth_user: None,
            target_host: target_host.into(),
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.auth_user = Some(user.into());
        self
    }

    pub fn with_relaying(mut self, relaying: bool) -> Self {
        self.relaying = relaying;
        self
    }

    /// Parsed remote address, `None` if the connection reported garbage.
    pub fn remote_addr(&self) -> Option<IpAddr> {
        self.remote_ip.trim().parse().ok()
    }

    pub fn user(&self) -> Option<&str> {
        self.auth_user.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_builder() {
        let session = RelaySession::new("example.com", "10.1.1.1").with_user("alice");

        assert!(session.relaying);
        assert_eq!(session.user(), Some("alice"));
        assert_eq!(session.remote_addr(), Some("10.1.1.1".parse().unwrap()));
    }

    #[test]
    fn test_unparseable_remote() {
        let session = RelaySession::new("example.com", "unknown");
        assert_eq!(session.remote_addr(), None);
    }
}
