//! Custom DNS record type shared by the store, the API and the resolver.
//!
//! A record is identified by `(domain, name)`; the queried name is
//! `<name>.<domain>`. On the wire (API bodies and the snapshot file) a record
//! is a flat JSON object:
//!
//! ```json
//! { "name": "api", "domain": "example.com", "type": "A", "value": "10.0.0.5", "ttl": 60 }
//! ```

use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::error::DnsError;

/// TTL assigned by the store when a record is written with `ttl == 0`.
pub const DEFAULT_TTL: u32 = 60;

/// Supported record types.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordType {
    /// IPv4 address record.
    A,
    /// Canonical name (alias) record.
    CNAME,
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => f.write_str("A"),
            Self::CNAME => f.write_str("CNAME"),
        }
    }
}

/// Typed record payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordData {
    /// IPv4 address.
    A(Ipv4Addr),
    /// Alias target, as given (with or without a trailing dot).
    Cname(String),
}

impl RecordData {
    /// Parse a textual value for the given type.
    pub fn parse(record_type: RecordType, value: &str) -> Result<Self, DnsError> {
        if value.is_empty() {
            return Err(DnsError::InvalidRecord(
                "record value cannot be empty".to_string(),
            ));
        }

        match record_type {
            RecordType::A => value
                .parse::<Ipv4Addr>()
                .map(Self::A)
                .map_err(|_| DnsError::InvalidRecord(format!("invalid IPv4 address: {value}"))),
            RecordType::CNAME => {
                if is_valid_domain(value) {
                    Ok(Self::Cname(value.to_string()))
                } else {
                    Err(DnsError::InvalidRecord(format!(
                        "invalid CNAME target: {value}"
                    )))
                }
            }
        }
    }

    /// Type tag of this payload.
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::A(_) => RecordType::A,
            Self::Cname(_) => RecordType::CNAME,
        }
    }

    /// Textual value as stored on disk.
    pub fn value(&self) -> String {
        match self {
            Self::A(ip) => ip.to_string(),
            Self::Cname(target) => target.clone(),
        }
    }
}

/// One custom DNS mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RecordRepr", into = "RecordRepr")]
pub struct Record {
    /// First label of the queried name.
    pub name: String,
    /// Served domain the record lives under.
    pub domain: String,
    /// Typed payload.
    pub data: RecordData,
    /// TTL in seconds; zero means "use the default".
    pub ttl: u32,
}

impl Record {
    /// Build a record, checking every field.
    pub fn new(
        name: impl Into<String>,
        domain: impl Into<String>,
        data: RecordData,
        ttl: u32,
    ) -> Result<Self, DnsError> {
        let record = Self {
            name: name.into(),
            domain: domain.into(),
            data,
            ttl,
        };
        record.validate()?;
        Ok(record)
    }

    /// Build a record from its textual form.
    pub fn parse(
        name: impl Into<String>,
        domain: impl Into<String>,
        record_type: RecordType,
        value: &str,
        ttl: u32,
    ) -> Result<Self, DnsError> {
        let data = RecordData::parse(record_type, value)?;
        Self::new(name, domain, data, ttl)
    }

    /// Check name, domain and value constraints.
    pub fn validate(&self) -> Result<(), DnsError> {
        if self.name.is_empty() {
            return Err(DnsError::InvalidRecord(
                "record name cannot be empty".to_string(),
            ));
        }
        if self.domain.is_empty() {
            return Err(DnsError::InvalidRecord(
                "record domain cannot be empty".to_string(),
            ));
        }
        if let RecordData::Cname(target) = &self.data {
            if !is_valid_domain(target) {
                return Err(DnsError::InvalidRecord(format!(
                    "invalid CNAME target: {target}"
                )));
            }
        }
        Ok(())
    }

    /// Type tag of this record.
    pub fn record_type(&self) -> RecordType {
        self.data.record_type()
    }

    /// Fully qualified, dot-terminated name this record answers for.
    pub fn fqdn(&self) -> String {
        format!("{}.{}.", self.name, self.domain)
    }
}

/// Flat wire shape of a record.
#[derive(Serialize, Deserialize)]
struct RecordRepr {
    #[serde(default)]
    name: String,
    #[serde(default)]
    domain: String,
    #[serde(rename = "type")]
    record_type: RecordType,
    #[serde(default)]
    value: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    ttl: u32,
}

fn is_zero(ttl: &u32) -> bool {
    *ttl == 0
}

impl TryFrom<RecordRepr> for Record {
    type Error = DnsError;

    fn try_from(repr: RecordRepr) -> Result<Self, Self::Error> {
        Self::parse(repr.name, repr.domain, repr.record_type, &repr.value, repr.ttl)
    }
}

impl From<Record> for RecordRepr {
    fn from(record: Record) -> Self {
        Self {
            record_type: record.record_type(),
            value: record.data.value(),
            name: record.name,
            domain: record.domain,
            ttl: record.ttl,
        }
    }
}

/// Syntactic domain-name check: 1-253 chars, labels of 1-63 letters, digits
/// or hyphens, no label starting or ending with a hyphen. A single trailing
/// dot is allowed.
pub fn is_valid_domain(domain: &str) -> bool {
    let domain = domain.strip_suffix('.').unwrap_or(domain);
    if domain.is_empty() || domain.len() > 253 {
        return false;
    }

    domain.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
            && !label.starts_with('-')
            && !label.ends_with('-')
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_a_record_requires_ipv4() {
        let err = Record::parse("web", "example.com", RecordType::A, "not-an-ip", 0).unwrap_err();
        assert!(matches!(err, DnsError::InvalidRecord(_)));

        let record = Record::parse("web", "example.com", RecordType::A, "10.0.0.5", 0).unwrap();
        assert_eq!(record.data, RecordData::A("10.0.0.5".parse().unwrap()));
    }

    #[test]
    fn test_a_record_rejects_ipv6() {
        assert!(Record::parse("web", "example.com", RecordType::A, "fd00::1", 0).is_err());
    }

    #[test]
    fn test_cname_rejects_leading_hyphen() {
        let err = Record::parse(
            "api",
            "example.com",
            RecordType::CNAME,
            "-bad-.example.com",
            0,
        )
        .unwrap_err();
        assert!(matches!(err, DnsError::InvalidRecord(_)));
    }

    #[test]
    fn test_cname_accepts_trailing_dot() {
        let record = Record::parse(
            "api",
            "example.com",
            RecordType::CNAME,
            "web.example.com.",
            0,
        )
        .unwrap();
        assert_eq!(record.record_type(), RecordType::CNAME);
    }

    #[test]
    fn test_empty_fields_rejected() {
        assert!(Record::parse("", "example.com", RecordType::A, "10.0.0.1", 0).is_err());
        assert!(Record::parse("web", "", RecordType::A, "10.0.0.1", 0).is_err());
        assert!(Record::parse("web", "example.com", RecordType::A, "", 0).is_err());
    }

    #[test]
    fn test_validate_catches_mutated_fields() {
        let mut record = Record::parse("web", "example.com", RecordType::A, "10.0.0.1", 0).unwrap();
        record.name.clear();
        assert!(record.validate().is_err());
    }

    #[test]
    fn test_domain_label_rules() {
        assert!(is_valid_domain("example.com"));
        assert!(is_valid_domain("a-b.example.com."));
        assert!(!is_valid_domain("bad-.example.com"));
        assert!(!is_valid_domain("exa mple.com"));
        assert!(!is_valid_domain("example..com"));
        assert!(!is_valid_domain(&format!("{}.com", "a".repeat(64))));
        assert!(!is_valid_domain("."));
    }

    #[test]
    fn test_json_wire_shape() {
        let record = Record::parse("api", "example.com", RecordType::CNAME, "web.example.com", 60)
            .unwrap();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "name": "api",
                "domain": "example.com",
                "type": "CNAME",
                "value": "web.example.com",
                "ttl": 60
            })
        );
    }

    #[test]
    fn test_json_omits_zero_ttl() {
        let record = Record::parse("web", "example.com", RecordType::A, "10.0.0.1", 0).unwrap();
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("ttl").is_none());
    }

    #[test]
    fn test_json_decode_validates() {
        let bad = r#"{"name":"web","domain":"example.com","type":"A","value":"nope"}"#;
        assert!(serde_json::from_str::<Record>(bad).is_err());

        let unknown_type = r#"{"name":"web","domain":"example.com","type":"MX","value":"x"}"#;
        assert!(serde_json::from_str::<Record>(unknown_type).is_err());

        let good = r#"{"name":"web","domain":"example.com","type":"A","value":"10.0.0.1"}"#;
        let record: Record = serde_json::from_str(good).unwrap();
        assert_eq!(record.ttl, 0);
        assert_eq!(record.fqdn(), "web.example.com.");
    }
}
