//! Input validation for administration commands.

use crate::domain::{SEQUENCE_LIMIT, SEQUENCE_STEP};
use crate::rules::address;

use super::error::{AdminError, AdminResult};

const MAX_HOSTNAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// Check hostname syntax: dot-separated labels of letters, digits and
/// hyphens, one optional trailing dot.
pub fn is_valid_hostname(name: &str) -> bool {
    let name = name.strip_suffix('.').unwrap_or(name);
    if name.is_empty() || name.len() > MAX_HOSTNAME_LEN {
        return false;
    }

    name.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= MAX_LABEL_LEN
            && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
            && !label.starts_with('-')
            && !label.ends_with('-')
    })
}

pub fn validate_hostname(name: &str) -> AdminResult<()> {
    if is_valid_hostname(name) {
        Ok(())
    } else {
        Err(AdminError::InvalidHostname(name.to_string()))
    }
}

/// Check that a sequence number lies in `[0, 1000)`.
pub fn validate_sequence(sequence: i64) -> AdminResult<u32> {
    match u32::try_from(sequence) {
        Ok(seq) if seq < SEQUENCE_LIMIT => Ok(seq),
        _ => Err(AdminError::InvalidSequence(sequence)),
    }
}

/// Sequence for a rule added without one: the next multiple of ten above
/// the current maximum. `None` when that would leave `[0, 1000)`.
pub fn next_sequence(max: Option<u32>) -> Option<u32> {
    let max = max.unwrap_or(0);
    (max - max % SEQUENCE_STEP)
        .checked_add(SEQUENCE_STEP)
        .filter(|next| *next < SEQUENCE_LIMIT)
}

/// Validate an address specification and return its stored form.
///
/// `None` or blank input is the wildcard.
pub fn normalize_address(input: Option<&str>) -> AdminResult<Option<String>> {
    match input.map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => address::normalize_spec(text)
            .map(Some)
            .map_err(|source| AdminError::InvalidAddress {
                input: text.to_string(),
                source,
            }),
    }
}

/// An empty user name is the wildcard.
pub fn normalize_user(input: Option<String>) -> Option<String> {
    input.filter(|u| !u.is_empty())
}
