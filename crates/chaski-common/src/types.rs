//! Common types for Chaski

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;

/// Separator between the local part and the domain of an address
pub const ADDRESS_DELIM: char = '@';

/// Mail address in `local@domain` form.
///
/// Clients may submit unqualified addresses (no domain); the server
/// qualifies them with its own identity before they are stored or relayed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    pub local: String,
    pub domain: Option<String>,
}

impl Address {
    /// Create a fully qualified address
    pub fn new(local: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            domain: Some(domain.into()),
        }
    }

    /// Parse an address from a string
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }

        match s.rsplit_once(ADDRESS_DELIM) {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {
                Some(Self::new(local, domain))
            }
            Some(_) => None,
            None => Some(Self {
                local: s.to_string(),
                domain: None,
            }),
        }
    }

    /// Fill in the domain when the address is unqualified
    pub fn qualified(mut self, identity: &str) -> Self {
        if self.domain.is_none() {
            self.domain = Some(identity.to_string());
        }
        self
    }

    /// Whether this address belongs to the server named `identity`
    pub fn is_local_to(&self, identity: &str) -> bool {
        self.domain
            .as_deref()
            .map(|d| d.eq_ignore_ascii_case(identity))
            .unwrap_or(false)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.domain {
            Some(domain) => write!(f, "{}{}{}", self.local, ADDRESS_DELIM, domain),
            None => write!(f, "{}", self.local),
        }
    }
}

impl std::str::FromStr for Address {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| crate::Error::Protocol(format!("Invalid address: {:?}", s)))
    }
}

/// Size in bytes, configurable as an integer or with a `b/k/m/g/t` suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::str::FromStr for ByteSize {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_size(s).map(ByteSize)
    }
}

impl Serialize for ByteSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bytes(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Bytes(n) => Ok(ByteSize(n)),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Parse a size such as `10m`, `2G` or `1024 K` into bytes
pub fn parse_size(size: &str) -> crate::Result<u64> {
    let size = size.trim();
    let last = size
        .chars()
        .last()
        .ok_or_else(|| crate::Error::Config("Empty size".to_string()))?;

    let factor: u64 = match last.to_ascii_lowercase() {
        'b' => 1,
        'k' => 1 << 10,
        'm' => 1 << 20,
        'g' => 1 << 30,
        't' => 1 << 40,
        _ => 0,
    };

    let (digits, factor) = if factor == 0 {
        (size, 1)
    } else {
        (&size[..size.len() - last.len_utf8()], factor)
    };

    let value: u64 = digits
        .trim()
        .parse()
        .map_err(|e| crate::Error::Config(format!("Invalid size {:?}: {}", size, e)))?;

    value
        .checked_mul(factor)
        .ok_or_else(|| crate::Error::Config(format!("Size {:?} is too large", size)))
}

/// Parse a legacy `key=value, key=value` parameter string.
///
/// Keys without a value map to an empty string; empty keys are dropped.
pub fn parse_params(data: &str) -> HashMap<String, String> {
    data.split(',')
        .filter_map(|token| {
            let (key, value) = match token.split_once('=') {
                Some((k, v)) => (k.trim(), v.trim()),
                None => (token.trim(), ""),
            };
            if key.is_empty() {
                None
            } else {
                Some((key.to_string(), value.to_string()))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_address_parse() {
        let addr = Address::parse("bob@serverA").unwrap();
        assert_eq!(addr.local, "bob");
        assert_eq!(addr.domain.as_deref(), Some("serverA"));
        assert_eq!(addr.to_string(), "bob@serverA");

        let bare = Address::parse(" alice ").unwrap();
        assert_eq!(bare.domain, None);
        assert_eq!(bare.qualified("serverA").to_string(), "alice@serverA");
    }

    #[test]
    fn test_address_invalid() {
        assert!(Address::parse("").is_none());
        assert!(Address::parse("@serverA").is_none());
        assert!(Address::parse("bob@").is_none());
    }

    #[test]
    fn test_address_locality() {
        let addr = Address::new("bob", "ServerA");
        assert!(addr.is_local_to("servera"));
        assert!(!addr.is_local_to("serverB"));
        assert!(!Address::parse("bob").unwrap().is_local_to("serverA"));
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("2G").unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_size("5m").unwrap(), 5 * 1024 * 1024);
        assert_eq!(parse_size("1024 K ").unwrap(), 1024 * 1024);
        assert_eq!(parse_size(" 1024 ").unwrap(), 1024);
        assert_eq!(parse_size("12b").unwrap(), 12);
    }

    #[test]
    fn test_parse_size_invalid() {
        assert!(parse_size("2gb").is_err());
        assert!(parse_size("").is_err());
        assert!(parse_size("m").is_err());
        assert!(parse_size("99999999999t").is_err());
    }

    #[test]
    fn test_parse_params() {
        let params = parse_params(" ab = cd ,ba=dc,abcd");
        assert_eq!(params.len(), 3);
        assert_eq!(params["ab"], "cd");
        assert_eq!(params["ba"], "dc");
        assert_eq!(params["abcd"], "");

        assert!(parse_params("").is_empty());
        assert!(parse_params(",,").is_empty());
    }

    #[test]
    fn test_byte_size_deserialize() {
        #[derive(Deserialize)]
        struct Holder {
            size: ByteSize,
        }

        let holder: Holder = toml::from_str("size = \"10m\"").unwrap();
        assert_eq!(holder.size, ByteSize(10 * 1024 * 1024));

        let holder: Holder = toml::from_str("size = 2048").unwrap();
        assert_eq!(holder.size.as_u64(), 2048);
    }
}
