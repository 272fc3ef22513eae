//! Error types for the access crate.
//!
//! Loading a policy file is the only fallible operation; authorization
//! decisions themselves are plain booleans that fail closed. Errors are
//! returned as rootcause reports: the underlying I/O error sits below an
//! `AccessError` naming the file.

use std::fmt;
use std::path::PathBuf;

/// Errors from loading email lists and htpasswd files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// The named file could not be loaded.
    File { path: PathBuf },
    /// Reading the file contents failed.
    Read,
    /// A line could not be parsed.
    InvalidEntry { line: usize, reason: String },
}

impl fmt::Display for AccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File { path } => write!(f, "failed to load {}", path.display()),
            Self::Read => write!(f, "failed to read access file contents"),
            Self::InvalidEntry { line, reason } => {
                write!(f, "invalid entry on line {line}: {reason}")
            }
        }
    }
}

impl std::error::Error for AccessError {}
