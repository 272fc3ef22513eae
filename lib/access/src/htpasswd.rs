//! Htpasswd credential store.
//!
//! Entries are `user:hash`, one per line. Two hash families are understood:
//! `{SHA}` (base64 of the SHA-1 digest, as written by `htpasswd -s`) and the
//! Unix modular crypt formats (`$1$`, `$2a$`/`$2b$`/`$2y$`, `$5$`, `$6$`).
//! Lines with any other hash are skipped.

use aws_lc_rs::{constant_time, digest};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rootcause::prelude::ResultExt;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use tracing::{debug, warn};

use crate::error::AccessError;

const SHA_PREFIX: &str = "{SHA}";

#[derive(Debug, Clone, PartialEq, Eq)]
enum PasswordHash {
    /// Raw SHA-1 digest bytes.
    Sha1(Vec<u8>),
    /// A modular crypt string, verified by `pwhash`.
    Crypt(String),
}

impl PasswordHash {
    fn parse(hash: &str) -> Option<Self> {
        if let Some(encoded) = hash.strip_prefix(SHA_PREFIX) {
            return STANDARD.decode(encoded).ok().map(Self::Sha1);
        }
        if hash.starts_with('$') {
            return Some(Self::Crypt(hash.to_string()));
        }
        None
    }

    fn verify(&self, password: &str) -> bool {
        match self {
            Self::Sha1(expected) => {
                let actual = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, password.as_bytes());
                constant_time::verify_slices_are_equal(actual.as_ref(), expected).is_ok()
            }
            Self::Crypt(hash) => pwhash::unix::verify(password, hash),
        }
    }
}

/// Username to password-hash map loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct HtpasswdStore {
    entries: HashMap<String, PasswordHash>,
}

impl HtpasswdStore {
    /// Loads an htpasswd file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a line has no `:`.
    pub fn from_file(path: impl AsRef<Path>) -> portcullis_core::Result<Self, AccessError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).context(AccessError::File {
            path: path.to_path_buf(),
        })?;
        let store = Self::from_reader(file).context(AccessError::File {
            path: path.to_path_buf(),
        })?;
        debug!(path = %path.display(), users = store.len(), "Loaded htpasswd file");
        Ok(store)
    }

    /// Parses htpasswd entries from a reader.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails or a line has no `:`.
    pub fn from_reader(reader: impl Read) -> portcullis_core::Result<Self, AccessError> {
        let mut entries = HashMap::new();

        for (index, line) in BufReader::new(reader).lines().enumerate() {
            let line_number = index + 1;
            let line = line.context(AccessError::Read)?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (user, hash) = line.split_once(':').ok_or_else(|| AccessError::InvalidEntry {
                line: line_number,
                reason: "missing ':' separator".to_string(),
            })?;

            match PasswordHash::parse(hash) {
                Some(parsed) => {
                    entries.insert(user.to_string(), parsed);
                }
                None => {
                    warn!(
                        user,
                        line = line_number,
                        "Skipping htpasswd entry with unsupported hash"
                    );
                }
            }
        }

        Ok(Self { entries })
    }

    /// Returns true if the user exists and the password matches its hash.
    #[must_use]
    pub fn validate(&self, user: &str, password: &str) -> bool {
        self.entries
            .get(user)
            .is_some_and(|hash| hash.verify(password))
    }

    /// Returns the number of usable entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no usable entry was loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    // `htpasswd -s` and `openssl passwd -1` output for "password".
    const SHA_ENTRY: &str = "alice:{SHA}W6ph5Mm5Pz8GgiULbPgzG37mj9g=";
    const MD5_ENTRY: &str = "bob:$1$5pZSV9va$azfrPr6af3Fc7dLblQXVa0";

    fn store(contents: &str) -> HtpasswdStore {
        HtpasswdStore::from_reader(contents.as_bytes()).expect("parse")
    }

    #[test]
    fn sha_entries_verify() {
        let store = store(SHA_ENTRY);
        assert!(store.validate("alice", "password"));
        assert!(!store.validate("alice", "Password"));
    }

    #[test]
    fn crypt_entries_verify() {
        let store = store(MD5_ENTRY);
        assert!(store.validate("bob", "password"));
        assert!(!store.validate("bob", "wrong"));
    }

    #[test]
    fn generated_sha512_entry_verifies() {
        let hash = pwhash::sha512_crypt::hash("s3cret").expect("hash");
        let store = store(&format!("carol:{hash}"));
        assert!(store.validate("carol", "s3cret"));
    }

    #[test]
    fn unknown_user_is_rejected() {
        let store = store(SHA_ENTRY);
        assert!(!store.validate("mallory", "password"));
        assert!(!store.validate("", ""));
    }

    #[test]
    fn comments_blank_lines_and_unsupported_hashes_are_skipped() {
        let contents = format!("# users\n\n{SHA_ENTRY}\ndave:plaintext\n{MD5_ENTRY}\n");
        let store = store(&contents);
        assert_eq!(store.len(), 2);
        assert!(!store.validate("dave", "plaintext"));
    }

    #[test]
    fn line_without_separator_is_an_error() {
        let err = HtpasswdStore::from_reader("alice\n".as_bytes()).expect_err("invalid");
        assert!(matches!(
            err.current_context(),
            AccessError::InvalidEntry { line: 1, .. }
        ));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "{SHA_ENTRY}").expect("write");

        let store = HtpasswdStore::from_file(file.path()).expect("load");
        assert!(store.validate("alice", "password"));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = HtpasswdStore::from_file("/nonexistent/htpasswd").expect_err("missing");
        assert!(matches!(err.current_context(), AccessError::File { .. }));
    }
}
