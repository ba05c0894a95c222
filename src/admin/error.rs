use thiserror::Error;

use crate::rules::address::AddressError;
use crate::storage::{Constraint, StoreError};

/// Errors returned by rule administration commands.
///
/// Every error leaves the store untouched.
#[derive(Error, Debug)]
pub enum AdminError {
    #[error("Domain \"{0}\" is not a valid hostname")]
    InvalidHostname(String),

    #[error("Sequence number {0} not in range 0 <= x < 1000")]
    InvalidSequence(i64),

    #[error("Sequence number not specified")]
    MissingSequence,

    #[error("Not a valid IP address or range \"{input}\": {source}")]
    InvalidAddress {
        input: String,
        #[source]
        source: AddressError,
    },

    #[error("ACL with sequence number {sequence} already exists for \"{domain}\"")]
    DuplicateSequence { domain: String, sequence: u32 },

    #[error("Unable to determine sequence number automatically (highest is {max}), use manual assignment")]
    SequenceExhausted { max: u32 },

    #[error("Domain \"{0}\" not found")]
    DomainNotFound(String),

    #[error("ACL with sequence number {sequence} does not exist for \"{domain}\"")]
    RuleNotFound { domain: String, sequence: u32 },

    #[error("Constraint violation: {0}")]
    ConstraintViolation(Constraint),

    #[error(transparent)]
    Store(StoreError),
}

impl AdminError {
    /// True for errors that mean the addressed row does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AdminError::DomainNotFound(_) | AdminError::RuleNotFound { .. }
        )
    }
}

impl From<StoreError> for AdminError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::ConstraintViolation(Constraint::DuplicateRule { domain, sequence }) => {
                AdminError::DuplicateSequence { domain, sequence }
            }
            StoreError::ConstraintViolation(Constraint::SequenceOutOfRange { sequence, .. }) => {
                AdminError::InvalidSequence(i64::from(sequence))
            }
            StoreError::ConstraintViolation(constraint) => AdminError::ConstraintViolation(constraint),
            other => AdminError::Store(other),
        }
    }
}

pub type AdminResult<T> = Result<T, AdminError>;
