use ipnet::IpNet;
use std::net::IpAddr;
use thiserror::Error;

/// Errors raised while parsing an `address[/prefix]` specification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("empty address")]
    Empty,

    #[error("invalid IP address: {0}")]
    InvalidAddress(String),

    #[error("invalid prefix length: {0}")]
    InvalidPrefix(String),

    #[error("prefix length {prefix} exceeds {max} for {address}")]
    PrefixOutOfRange { address: IpAddr, prefix: u32, max: u8 },
}

/// Maximum prefix length for the address family.
#[inline]
pub fn max_prefix(address: &IpAddr) -> u8 {
    match address {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

/// Check whether the first `prefix_len` bits of `remote` equal those of `spec`.
///
/// Addresses of different families never match, and neither does a prefix
/// longer than the family allows.
pub fn matches(remote: IpAddr, spec: IpAddr, prefix_len: u8) -> bool {
    match IpNet::new(spec, prefix_len) {
        Ok(net) => net.contains(&remote),
        Err(_) => false,
    }
}

/// Parse `address` or `address/prefix`.
///
/// A missing prefix selects a single host (32 for IPv4, 128 for IPv6).
/// Host bits are kept so the original text round-trips.
pub fn parse_spec(text: &str) -> Result<IpNet, AddressError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(AddressError::Empty);
    }

    let (addr_part, prefix_part) = match text.split_once('/') {
        Some((addr, prefix)) => (addr, Some(prefix)),
        None => (text, None),
    };

    let address: IpAddr = addr_part
        .parse()
        .map_err(|_| AddressError::InvalidAddress(addr_part.to_string()))?;
    let max = max_prefix(&address);

    let prefix = match prefix_part {
        None => max,
        Some(p) => {
            if p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit()) {
                return Err(AddressError::InvalidPrefix(p.to_string()));
            }
            let value: u32 = p
                .parse()
                .map_err(|_| AddressError::InvalidPrefix(p.to_string()))?;
            if value > max as u32 {
                return Err(AddressError::PrefixOutOfRange {
                    address,
                    prefix: value,
                    max,
                });
            }
            value as u8
        }
    };

    IpNet::new(address, prefix).map_err(|_| AddressError::InvalidPrefix(prefix.to_string()))
}

/// Canonical stored form of a specification (`address/prefix`).
pub fn normalize_spec(text: &str) -> Result<String, AddressError> {
    parse_spec(text).map(|net| net.to_string())
}

/// Evaluation-time match of a remote address against a stored specification.
///
/// A malformed specification is treated as no match.
pub fn spec_matches(remote: IpAddr, spec: &str) -> bool {
    match parse_spec(spec) {
        Ok(net) => net.contains(&remote),
        Err(e) => {
            tracing::warn!(spec = spec, error = %e, "Ignoring malformed address specification");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_ipv4_prefix_match() {
        assert!(matches(ip("1.2.3.4"), ip("1.2.3.0"), 24));
        assert!(!matches(ip("1.2.4.4"), ip("1.2.3.0"), 24));
        assert!(matches(ip("10.200.1.1"), ip("10.0.0.0"), 8));
    }

    #[test]
    fn test_ipv6_match() {
        assert!(matches(ip("::1"), ip("::1"), 128));
        assert!(!matches(ip("::2"), ip("::1"), 128));
        assert!(matches(ip("2001:db8::42"), ip("2001:db8::"), 32));
    }

    #[test]
    fn test_mixed_family_never_matches() {
        assert!(!matches(ip("1.2.3.4"), ip("::"), 0));
        assert!(!matches(ip("::1"), ip("0.0.0.0"), 0));
        assert!(!matches(ip("::ffff:1.2.3.4"), ip("1.2.3.0"), 24));
    }

    #[test]
    fn test_zero_prefix_matches_family() {
        assert!(matches(ip("8.8.8.8"), ip("0.0.0.0"), 0));
        assert!(matches(ip("2001:db8::1"), ip("::"), 0));
    }

    #[test]
    fn test_prefix_out_of_range_fails_closed() {
        assert!(!matches(ip("1.2.3.4"), ip("1.2.3.4"), 33));
    }

    #[test]
    fn test_parse_spec_defaults() {
        assert_eq!(parse_spec("10.0.0.1").unwrap().prefix_len(), 32);
        assert_eq!(parse_spec("2001:db8::1").unwrap().prefix_len(), 128);
        assert_eq!(parse_spec("10.0.0.0/8").unwrap().prefix_len(), 8);
    }

    #[test]
    fn test_parse_spec_keeps_host_bits() {
        assert_eq!(normalize_spec("1.2.3.4/24").unwrap(), "1.2.3.4/24");
        assert_eq!(normalize_spec(" 10.0.0.1 ").unwrap(), "10.0.0.1/32");
        assert_eq!(normalize_spec("::1").unwrap(), "::1/128");
    }

    #[test]
    fn test_parse_spec_errors() {
        assert_eq!(parse_spec(""), Err(AddressError::Empty));
        assert!(matches!(
            parse_spec("300.1.1.1/8"),
            Err(AddressError::InvalidAddress(_))
        ));
        assert!(matches!(
            parse_spec("10.0.0.0/abc"),
            Err(AddressError::InvalidPrefix(_))
        ));
        assert!(matches!(
            parse_spec("10.0.0.0/"),
            Err(AddressError::InvalidPrefix(_))
        ));
        assert!(matches!(
            parse_spec("10.0.0.0/+8"),
            Err(AddressError::InvalidPrefix(_))
        ));
        assert!(matches!(
            parse_spec("10.0.0.0/33"),
            Err(AddressError::PrefixOutOfRange { max: 32, .. })
        ));
        assert!(matches!(
            parse_spec("::/129"),
            Err(AddressError::PrefixOutOfRange { max: 128, .. })
        ));
    }

    #[test]
    fn test_spec_matches() {
        assert!(spec_matches(ip("10.1.1.1"), "10.0.0.0/8"));
        assert!(!spec_matches(ip("8.8.8.8"), "10.0.0.0/8"));
        assert!(!spec_matches(ip("10.1.1.1"), "garbage"));
    }
}
