//! `GAP-Signature` request signing.
//!
//! An upstream holding the same key can verify that a request came through
//! the proxy. The signature is an HMAC over the method, a fixed list of
//! headers, the path with its query, and then the body:
//!
//! ```text
//! GAP-Signature: sha256 <base64 HMAC>
//! ```

use aws_lc_rs::hmac;
use axum::http::{HeaderMap, Method, Uri};
use base64::{Engine, engine::general_purpose::STANDARD};
use std::fmt;

use crate::upstream::UpstreamError;

/// Header carrying the request signature.
pub const GAP_SIGNATURE: &str = "gap-signature";

/// Headers covered by the signature, in signing order.
pub const SIGNED_HEADERS: &[&str] = &[
    "content-length",
    "content-md5",
    "content-type",
    "date",
    "authorization",
    "x-forwarded-user",
    "x-forwarded-email",
    "x-forwarded-access-token",
    "cookie",
    "gap-auth",
];

/// An HMAC key used to sign forwarded requests.
#[derive(Clone)]
pub struct SignatureKey {
    algorithm: &'static str,
    key: hmac::Key,
}

impl fmt::Debug for SignatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureKey")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl SignatureKey {
    /// Parses `algorithm:secret`, where the algorithm is one of `sha1`,
    /// `sha224`, `sha256`, `sha384` or `sha512`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSignatureKey` for a missing separator, an unknown
    /// algorithm, or an empty secret.
    pub fn parse(spec: &str) -> Result<Self, UpstreamError> {
        let invalid = |details: &str| UpstreamError::InvalidSignatureKey {
            details: details.to_string(),
        };
        let (name, secret) = spec
            .split_once(':')
            .ok_or_else(|| invalid("expected algorithm:secret"))?;
        if secret.is_empty() {
            return Err(invalid("secret is empty"));
        }
        let (algorithm, digest) = match name.trim().to_ascii_lowercase().as_str() {
            "sha1" => ("sha1", hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY),
            "sha224" => ("sha224", hmac::HMAC_SHA224),
            "sha256" => ("sha256", hmac::HMAC_SHA256),
            "sha384" => ("sha384", hmac::HMAC_SHA384),
            "sha512" => ("sha512", hmac::HMAC_SHA512),
            other => return Err(invalid(&format!("unsupported algorithm '{other}'"))),
        };
        Ok(Self {
            algorithm,
            key: hmac::Key::new(digest, secret.as_bytes()),
        })
    }

    /// Returns the algorithm name used in the header value.
    #[must_use]
    pub fn algorithm(&self) -> &'static str {
        self.algorithm
    }

    /// Signs a request and returns the `GAP-Signature` header value.
    #[must_use]
    pub fn sign(&self, method: &Method, uri: &Uri, headers: &HeaderMap, body: &[u8]) -> String {
        let mut context = hmac::Context::with_key(&self.key);
        context.update(&string_to_sign(method, uri, headers));
        context.update(body);
        format!("{} {}", self.algorithm, STANDARD.encode(context.sign().as_ref()))
    }
}

/// Builds the signed prefix: the method, each signed header's values joined
/// with commas, then the path and query, one per line.
fn string_to_sign(method: &Method, uri: &Uri, headers: &HeaderMap) -> Vec<u8> {
    let mut buffer = Vec::new();
    buffer.extend_from_slice(method.as_str().as_bytes());
    buffer.push(b'\n');
    for name in SIGNED_HEADERS {
        for (i, value) in headers.get_all(*name).iter().enumerate() {
            if i > 0 {
                buffer.push(b',');
            }
            buffer.extend_from_slice(value.as_bytes());
        }
        buffer.push(b'\n');
    }
    buffer.extend_from_slice(uri.path().as_bytes());
    if let Some(query) = uri.query() {
        buffer.push(b'?');
        buffer.extend_from_slice(query.as_bytes());
    }
    buffer
}
