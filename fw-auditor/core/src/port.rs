//! Destination port specifiers and address normalization.
//!
//! Rules carry their destination ports as free-form strings so that operators
//! can write `443`, `tcp/22` or `udp/53`. Each specifier is parsed on its own
//! so that a single bad entry only fails the probes that use it.

use std::{fmt, num::NonZeroU16};
use thiserror::Error;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

/// A parsed destination port.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Port {
    pub protocol: Protocol,
    pub number: NonZeroU16,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum PortError {
    #[error("port {0:?} doesn't match any protocol pattern")]
    Format(String),

    #[error("port {0:?} is out of range")]
    Range(String),
}

// === impl Protocol ===

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl Port ===

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.protocol, self.number)
    }
}

impl std::str::FromStr for Port {
    type Err = PortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_port(s)
    }
}

/// Parses a raw port specifier.
///
/// A bare number implies TCP. Otherwise the specifier must be `tcp/<digits>`
/// or `udp/<digits>`. Matching is case-insensitive and ignores surrounding
/// whitespace.
pub fn parse_port(raw: &str) -> Result<Port, PortError> {
    let spec = raw.trim().to_ascii_lowercase();

    let (protocol, digits) = match spec.split_once('/') {
        None => (Protocol::Tcp, spec.as_str()),
        Some(("tcp", digits)) => (Protocol::Tcp, digits),
        Some(("udp", digits)) => (Protocol::Udp, digits),
        Some(_) => return Err(PortError::Format(raw.to_string())),
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PortError::Format(raw.to_string()));
    }

    let number = digits
        .parse::<u16>()
        .ok()
        .and_then(NonZeroU16::new)
        .ok_or_else(|| PortError::Range(raw.to_string()))?;

    Ok(Port { protocol, number })
}

/// Removes a leading `http://` or `https://` from an address.
pub fn strip_scheme(address: &str) -> &str {
    address
        .strip_prefix("https://")
        .or_else(|| address.strip_prefix("http://"))
        .unwrap_or(address)
}

/// Joins a host and port into a dialable `host:port` string, bracketing IPv6
/// literals.
pub fn join_host_port(host: &str, port: NonZeroU16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(protocol: Protocol, number: u16) -> Port {
        Port {
            protocol,
            number: NonZeroU16::new(number).unwrap(),
        }
    }

    #[test]
    fn parses_specifiers() {
        assert_eq!(parse_port("443"), Ok(port(Protocol::Tcp, 443)));
        assert_eq!(parse_port("tcp/22"), Ok(port(Protocol::Tcp, 22)));
        assert_eq!(parse_port("udp/53"), Ok(port(Protocol::Udp, 53)));
        assert_eq!(parse_port(" 80 "), Ok(port(Protocol::Tcp, 80)));
        assert_eq!(parse_port("TCP/8080"), Ok(port(Protocol::Tcp, 8080)));
        assert_eq!(parse_port(" Udp/123\n"), Ok(port(Protocol::Udp, 123)));
    }

    #[test]
    fn rejects_malformed_specifiers() {
        for raw in ["ftp/21", "", "tcp/", "udp/x", "tcp/22/33", "-1", "+80", "tcp 22"] {
            assert!(
                matches!(parse_port(raw), Err(PortError::Format(_))),
                "{raw:?} must not parse"
            );
        }
        assert_eq!(parse_port("0"), Err(PortError::Range("0".to_string())));
        assert_eq!(
            parse_port("tcp/65536"),
            Err(PortError::Range("tcp/65536".to_string()))
        );
    }

    #[test]
    fn strips_schemes() {
        assert_eq!(strip_scheme("https://example.com"), "example.com");
        assert_eq!(strip_scheme("http://10.0.0.5"), "10.0.0.5");
        assert_eq!(strip_scheme("10.0.0.5"), "10.0.0.5");
        assert_eq!(strip_scheme("ftp://example.com"), "ftp://example.com");
    }

    #[test]
    fn joins_hosts() {
        let p = NonZeroU16::new(3306).unwrap();
        assert_eq!(join_host_port("10.0.0.5", p), "10.0.0.5:3306");
        assert_eq!(join_host_port("db.internal", p), "db.internal:3306");
        assert_eq!(join_host_port("fd00::5", p), "[fd00::5]:3306");
        assert_eq!(join_host_port("[fd00::5]", p), "[fd00::5]:3306");
    }
}
