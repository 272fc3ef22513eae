//! Error types for the session crate.
//!
//! - `CookieDecodeError`: why an incoming cookie value was rejected. Always
//!   recovered locally by treating the request as unauthenticated.
//! - `CodecError`: failures constructing the codec or sealing a value,
//!   returned as the context of a rootcause `Report`.

use std::fmt;

/// Reasons a cookie value could not be turned back into its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieDecodeError {
    /// The integrity tag did not verify, or the value was not valid base64.
    SignatureInvalid,
    /// The payload verified but its lifetime is over.
    Expired,
    /// The value is truncated, or the verified payload cannot be parsed.
    Malformed,
}

impl fmt::Display for CookieDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SignatureInvalid => write!(f, "cookie signature is invalid"),
            Self::Expired => write!(f, "cookie has expired"),
            Self::Malformed => write!(f, "cookie is malformed"),
        }
    }
}

impl std::error::Error for CookieDecodeError {}

/// Errors from codec construction and encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The cookie secret is too short to derive keys from.
    SecretTooShort { len: usize, min: usize },
    /// Key derivation or key construction failed.
    KeyDerivation,
    /// The payload could not be serialized.
    Serialization { details: String },
    /// The cipher or the system random source failed.
    Cipher,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SecretTooShort { len, min } => {
                write!(f, "cookie secret is {len} bytes, at least {min} required")
            }
            Self::KeyDerivation => write!(f, "failed to derive cookie keys"),
            Self::Serialization { details } => {
                write!(f, "failed to serialize cookie payload: {details}")
            }
            Self::Cipher => write!(f, "cookie encryption failed"),
        }
    }
}

impl std::error::Error for CodecError {}
