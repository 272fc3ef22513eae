//! Authorization policy over resolved identities.
//!
//! A [`Validator`] permits an email when it satisfies at least one configured
//! rule: the wildcard domain `*`, a listed domain, or a listed address. With no
//! rule configured every email is denied. Htpasswd credentials are a separate
//! check used by the basic-auth and sign-in form paths.

use portcullis_core::EmailAddress;
use rootcause::prelude::ResultExt;
use std::collections::HashSet;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use tracing::debug;

use crate::error::AccessError;
use crate::htpasswd::HtpasswdStore;

const WILDCARD: &str = "*";

/// Immutable authorization policy.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    allow_any: bool,
    domains: HashSet<String>,
    emails: HashSet<EmailAddress>,
    htpasswd: Option<HtpasswdStore>,
}

impl Validator {
    /// Creates a builder with no rules.
    #[must_use]
    pub fn builder() -> ValidatorBuilder {
        ValidatorBuilder::default()
    }

    /// Builds a validator from a domain list and an optional email file.
    ///
    /// # Errors
    ///
    /// Returns an error if the email file cannot be read or contains a line
    /// that is not an email address.
    pub fn from_files(
        domains: &[String],
        emails_file: Option<&Path>,
        htpasswd: Option<HtpasswdStore>,
    ) -> portcullis_core::Result<Self, AccessError> {
        let mut builder = Self::builder().domains(domains.iter().cloned());
        if let Some(path) = emails_file {
            builder = builder.emails(load_emails(path)?);
        }
        if let Some(store) = htpasswd {
            builder = builder.htpasswd(store);
        }
        Ok(builder.build())
    }

    /// Returns true if the email is permitted.
    ///
    /// Empty or unparseable input is always denied.
    #[must_use]
    pub fn is_authorized(&self, email: &str) -> bool {
        let Ok(email) = EmailAddress::parse(email) else {
            return false;
        };
        self.is_authorized_email(&email)
    }

    /// Returns true if the parsed email is permitted.
    #[must_use]
    pub fn is_authorized_email(&self, email: &EmailAddress) -> bool {
        self.allow_any || self.domains.contains(email.domain()) || self.emails.contains(email)
    }

    /// Returns true if an htpasswd store is configured and accepts the
    /// credentials.
    #[must_use]
    pub fn is_authorized_basic(&self, user: &str, password: &str) -> bool {
        self.htpasswd
            .as_ref()
            .is_some_and(|store| store.validate(user, password))
    }

    /// Returns true if an htpasswd store is configured.
    #[must_use]
    pub fn has_htpasswd(&self) -> bool {
        self.htpasswd.is_some()
    }

    /// Returns true if any rule is configured.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.allow_any
            || !self.domains.is_empty()
            || !self.emails.is_empty()
            || self.htpasswd.is_some()
    }
}

/// Builder for [`Validator`].
#[derive(Debug, Default)]
pub struct ValidatorBuilder {
    domains: Vec<String>,
    emails: Vec<EmailAddress>,
    htpasswd: Option<HtpasswdStore>,
}

impl ValidatorBuilder {
    /// Adds allowed domains. `*` permits every email.
    #[must_use]
    pub fn domains(mut self, domains: impl IntoIterator<Item = String>) -> Self {
        self.domains.extend(domains);
        self
    }

    /// Adds individually allowed addresses.
    #[must_use]
    pub fn emails(mut self, emails: impl IntoIterator<Item = EmailAddress>) -> Self {
        self.emails.extend(emails);
        self
    }

    /// Sets the htpasswd store used for credential checks.
    #[must_use]
    pub fn htpasswd(mut self, store: HtpasswdStore) -> Self {
        self.htpasswd = Some(store);
        self
    }

    #[must_use]
    pub fn build(self) -> Validator {
        let mut allow_any = false;
        let mut domains = HashSet::new();
        for domain in self.domains {
            let domain = domain.trim().trim_start_matches('@').to_ascii_lowercase();
            if domain.is_empty() {
                continue;
            }
            if domain == WILDCARD {
                allow_any = true;
            } else {
                domains.insert(domain);
            }
        }

        Validator {
            allow_any,
            domains,
            emails: self.emails.into_iter().collect(),
            htpasswd: self.htpasswd,
        }
    }
}

/// Loads an authenticated-emails file: one address per line, blank lines and
/// `#` comments ignored.
///
/// # Errors
///
/// Returns an error if the file cannot be read or a line is not an email.
pub fn load_emails(path: &Path) -> portcullis_core::Result<Vec<EmailAddress>, AccessError> {
    let file = std::fs::File::open(path).context(AccessError::File {
        path: path.to_path_buf(),
    })?;
    let emails = parse_emails(file).context(AccessError::File {
        path: path.to_path_buf(),
    })?;
    debug!(path = %path.display(), count = emails.len(), "Loaded authenticated emails");
    Ok(emails)
}

fn parse_emails(reader: impl Read) -> portcullis_core::Result<Vec<EmailAddress>, AccessError> {
    let mut emails = Vec::new();
    for (index, line) in BufReader::new(reader).lines().enumerate() {
        let line = line.context(AccessError::Read)?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let email = EmailAddress::parse(line).map_err(|err| AccessError::InvalidEntry {
            line: index + 1,
            reason: err.to_string(),
        })?;
        emails.push(email);
    }
    Ok(emails)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn domains(list: &[&str]) -> Validator {
        Validator::builder()
            .domains(list.iter().map(|d| (*d).to_string()))
            .build()
    }

    #[test]
    fn unconfigured_validator_denies_everything() {
        let validator = Validator::builder().build();
        assert!(!validator.is_configured());
        assert!(!validator.is_authorized("user@allowed.com"));
        assert!(!validator.is_authorized_basic("user", "password"));
    }

    #[test]
    fn wildcard_allows_any_non_empty_email() {
        let validator = domains(&["*"]);
        assert!(validator.is_authorized("anyone@anywhere.org"));
        assert!(validator.is_authorized("x@y"));
        assert!(!validator.is_authorized(""));
        assert!(!validator.is_authorized("not-an-email"));
    }

    #[test]
    fn domain_match_is_case_insensitive() {
        let validator = domains(&["Allowed.com"]);
        assert!(validator.is_authorized("user@allowed.com"));
        assert!(validator.is_authorized("user@ALLOWED.COM"));
        assert!(!validator.is_authorized("user@other.com"));
        assert!(!validator.is_authorized("user@sub.allowed.com"));
    }

    #[test]
    fn decision_is_deterministic() {
        let validator = domains(&["allowed.com"]);
        let first = validator.is_authorized("user@allowed.com");
        for _ in 0..10 {
            assert_eq!(validator.is_authorized("user@allowed.com"), first);
        }
    }

    #[test]
    fn explicit_emails_are_allowed() {
        let validator = Validator::builder()
            .emails([EmailAddress::parse("boss@Corp.io").expect("email")])
            .build();
        assert!(validator.is_authorized("boss@corp.io"));
        assert!(!validator.is_authorized("intern@corp.io"));
    }

    #[test]
    fn email_file_skips_comments_and_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "# admins\n\nroot@example.com\n  ops@Example.com  ").expect("write");

        let validator = Validator::from_files(&[], Some(file.path()), None).expect("load");
        assert!(validator.is_authorized("root@example.com"));
        assert!(validator.is_authorized("ops@example.com"));
        assert!(!validator.is_authorized("dev@example.com"));
    }

    #[test]
    fn email_file_with_garbage_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "root@example.com\nnot an email").expect("write");

        let err = Validator::from_files(&[], Some(file.path()), None).expect_err("invalid");
        assert_eq!(
            err.current_context(),
            &AccessError::File {
                path: file.path().to_path_buf()
            }
        );

        let err = parse_emails("root@example.com
not an email".as_bytes()).expect_err("invalid");
        assert!(matches!(
            err.current_context(),
            AccessError::InvalidEntry { line: 2, .. }
        ));
    }

    #[test]
    fn basic_auth_requires_htpasswd_match() {
        let store = HtpasswdStore::from_reader(
            "alice:{SHA}W6ph5Mm5Pz8GgiULbPgzG37mj9g=".as_bytes(),
        )
        .expect("store");
        let validator = Validator::builder().htpasswd(store).build();

        assert!(validator.is_configured());
        assert!(validator.has_htpasswd());
        assert!(validator.is_authorized_basic("alice", "password"));
        assert!(!validator.is_authorized_basic("alice", "nope"));
        assert!(!validator.is_authorized("alice@example.com"));
    }
}
