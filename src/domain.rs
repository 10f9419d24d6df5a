//! Domain records flowing from the resolvers to the report writer.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;
use thiserror::Error;

/// Raw CSV row as produced by the source.
pub type RawRecord = Vec<String>;

/// Outcome labels.
pub mod outcome {
    pub const PENDING: &str = "PENDING";
    pub const OK: &str = "OK";
    pub const NXDOMAIN: &str = "NXDOMAIN";
    pub const NO_ANSWER: &str = "NoAnswer";
    pub const TIMEOUT: &str = "Timeout";
    pub const NO_NAMESERVERS: &str = "NoNameservers";
    pub const ERROR: &str = "Error";
    /// Row rejected before any lookup
    pub const INVALID: &str = "Invalid";
}

static LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$").expect("valid regex"));

static TLD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z]{2,6}$").expect("valid regex"));

/// Reasons a row is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("missing field {0}")]
    MissingField(usize),

    #[error("invalid domain name: {0}")]
    InvalidName(String),

    #[error("invalid popularity: {0}")]
    InvalidPopularity(String),
}

/// A validated domain with its resolution outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Domain {
    pub name: String,
    pub popularity: u64,
    /// MX answers, `"<preference> <exchange>"`
    pub answer: Vec<String>,
    pub outcome: String,
}

impl Domain {
    /// Build a pending domain from a `[name, popularity, ..]` row.
    pub fn from_record(record: &[String]) -> Result<Self, DomainError> {
        let name = record.first().ok_or(DomainError::MissingField(0))?;
        let popularity = record.get(1).ok_or(DomainError::MissingField(1))?;

        let name = normalize_name(name)?;
        let popularity = popularity
            .trim()
            .parse::<u64>()
            .map_err(|_| DomainError::InvalidPopularity(popularity.clone()))?;

        Ok(Self {
            name,
            popularity,
            answer: Vec::new(),
            outcome: outcome::PENDING.to_string(),
        })
    }
}

/// Trim, lower-case and validate a domain name.
pub fn normalize_name(raw: &str) -> Result<String, DomainError> {
    let name = raw.trim().trim_end_matches('.').to_lowercase();
    let labels: Vec<&str> = name.split('.').collect();

    let valid = labels.len() >= 2
        && labels.iter().all(|label| LABEL.is_match(label))
        && labels.last().is_some_and(|tld| TLD.is_match(tld));

    if valid {
        Ok(name)
    } else {
        Err(DomainError::InvalidName(raw.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(fields: &[&str]) -> RawRecord {
        fields.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_valid_record() {
        let domain = Domain::from_record(&row(&[" Example.COM ", "42"])).unwrap();
        assert_eq!(domain.name, "example.com");
        assert_eq!(domain.popularity, 42);
        assert_eq!(domain.outcome, outcome::PENDING);
        assert!(domain.answer.is_empty());
    }

    #[test]
    fn test_missing_fields() {
        assert_eq!(Domain::from_record(&[]), Err(DomainError::MissingField(0)));
        assert_eq!(
            Domain::from_record(&row(&["example.com"])),
            Err(DomainError::MissingField(1))
        );
    }

    #[test]
    fn test_invalid_names() {
        for bad in [
            "localhost",
            "-bad.com",
            "bad-.com",
            "exa mple.com",
            "example.c0m",
            "example.toolongtld",
            "a..com",
            "",
        ] {
            assert!(normalize_name(bad).is_err(), "{:?} should be rejected", bad);
        }
    }

    #[test]
    fn test_valid_names() {
        for good in ["a.io", "mail.example.co.uk", "xn--80ak6aa92e.com", "example.com."] {
            assert!(normalize_name(good).is_ok(), "{:?} should be accepted", good);
        }
    }

    #[test]
    fn test_invalid_popularity() {
        assert_eq!(
            Domain::from_record(&row(&["example.com", "many"])),
            Err(DomainError::InvalidPopularity("many".into()))
        );
    }
}
