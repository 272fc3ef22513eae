//! Email identities.
//!
//! Email addresses are the identity the proxy authorizes and forwards. The
//! domain part is case-insensitive and stored lowercased; the local part is
//! kept as the provider returned it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error returned when parsing an email address fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEmailError {
    /// The rejected input.
    pub input: String,
    /// The reason for the parse failure.
    pub reason: &'static str,
}

impl fmt::Display for ParseEmailError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid email address '{}': {}", self.input, self.reason)
    }
}

impl std::error::Error for ParseEmailError {}

/// A normalized email address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EmailAddress {
    local: String,
    domain: String,
}

impl EmailAddress {
    /// Parses an email address, lowercasing the domain.
    ///
    /// # Errors
    ///
    /// Returns an error if the input has no `@`, or either side is empty.
    pub fn parse(input: &str) -> Result<Self, ParseEmailError> {
        let trimmed = input.trim();
        let (local, domain) = trimmed.rsplit_once('@').ok_or_else(|| ParseEmailError {
            input: input.to_string(),
            reason: "missing '@'",
        })?;

        if local.is_empty() {
            return Err(ParseEmailError {
                input: input.to_string(),
                reason: "empty local part",
            });
        }
        if domain.is_empty() {
            return Err(ParseEmailError {
                input: input.to_string(),
                reason: "empty domain",
            });
        }

        Ok(Self {
            local: local.to_string(),
            domain: domain.to_ascii_lowercase(),
        })
    }

    /// Returns the part before the `@`.
    #[must_use]
    pub fn local_part(&self) -> &str {
        &self.local
    }

    /// Returns the lowercased domain.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}

impl FromStr for EmailAddress {
    type Err = ParseEmailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EmailAddress {
    type Error = ParseEmailError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<EmailAddress> for String {
    fn from(email: EmailAddress) -> Self {
        email.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_is_lowercased() {
        let email = EmailAddress::parse("Alice@Example.COM").expect("valid");
        assert_eq!(email.local_part(), "Alice");
        assert_eq!(email.domain(), "example.com");
        assert_eq!(email.to_string(), "Alice@example.com");
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        let email: EmailAddress = "  bob@corp.io \n".parse().expect("valid");
        assert_eq!(email.to_string(), "bob@corp.io");
    }

    #[test]
    fn rejects_missing_parts() {
        assert!(EmailAddress::parse("nobody").is_err());
        assert!(EmailAddress::parse("@example.com").is_err());
        assert!(EmailAddress::parse("user@").is_err());
        assert!(EmailAddress::parse("").is_err());
    }

    #[test]
    fn quoted_local_part_keeps_last_at() {
        let email = EmailAddress::parse("\"a@b\"@example.com").expect("valid");
        assert_eq!(email.domain(), "example.com");
    }

    #[test]
    fn serde_uses_string_form() {
        let email = EmailAddress::parse("user@Allowed.com").expect("valid");
        let json = serde_json::to_string(&email).expect("serialize");
        assert_eq!(json, "\"user@allowed.com\"");
        let parsed: EmailAddress = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, email);
        assert!(serde_json::from_str::<EmailAddress>("\"broken\"").is_err());
    }
}
