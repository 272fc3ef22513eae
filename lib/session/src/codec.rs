//! Cookie envelope encoding.
//!
//! Every cookie value the proxy issues is a base64url (unpadded) envelope:
//!
//! ```text
//! version (1 byte) ‖ body ‖ HMAC-SHA256 tag (32 bytes)
//! ```
//!
//! The body is the JSON payload, or `nonce ‖ AES-256-GCM(payload)` when
//! encryption is enabled. The tag covers a purpose label and the cookie name
//! as well as the envelope, so a value minted for one cookie never verifies
//! as another. Signing and encryption keys are derived from the cookie
//! secret with HKDF-SHA256.

use aws_lc_rs::aead::{AES_256_GCM, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use aws_lc_rs::{hkdf, hmac, rand};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use rootcause::prelude::Report;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;

use crate::error::{CodecError, CookieDecodeError};
use crate::session::Session;
use crate::state::CsrfState;

/// Minimum accepted cookie secret length in bytes.
pub const MIN_SECRET_LEN: usize = 16;

const TAG_LEN: usize = 32;
const VERSION_SIGNED: u8 = 1;
const VERSION_SEALED: u8 = 2;

const SIGNING_INFO: &[u8] = b"portcullis|cookie-signing";
const ENCRYPTION_INFO: &[u8] = b"portcullis|cookie-encryption";

const SESSION_PURPOSE: &str = "session";
const STATE_PURPOSE: &str = "csrf";

/// Encodes and decodes signed, optionally encrypted cookie values.
///
/// The codec holds no state beyond the keys derived from the secret, so
/// encode and decode are pure functions of their inputs and the secret.
pub struct SessionCodec {
    cookie_name: String,
    signing_key: hmac::Key,
    cipher: Option<LessSafeKey>,
}

impl fmt::Debug for SessionCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCodec")
            .field("cookie_name", &self.cookie_name)
            .field("encrypted", &self.cipher.is_some())
            .finish_non_exhaustive()
    }
}

impl SessionCodec {
    /// Creates a codec for the named cookie.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret is shorter than [`MIN_SECRET_LEN`] or
    /// key derivation fails.
    pub fn new(
        cookie_name: impl Into<String>,
        secret: &[u8],
        encrypt: bool,
    ) -> Result<Self, Report<CodecError>> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(CodecError::SecretTooShort {
                len: secret.len(),
                min: MIN_SECRET_LEN,
            }
            .into());
        }

        let salt = hkdf::Salt::new(hkdf::HKDF_SHA256, &[]);
        let prk = salt.extract(secret);
        let derive = |info: &[u8]| -> Result<[u8; 32], CodecError> {
            let info_binding = [info];
            let okm = prk
                .expand(&info_binding, hkdf::HKDF_SHA256)
                .map_err(|_| CodecError::KeyDerivation)?;
            let mut key_bytes = [0u8; 32];
            okm.fill(&mut key_bytes)
                .map_err(|_| CodecError::KeyDerivation)?;
            Ok(key_bytes)
        };

        let signing_key = hmac::Key::new(hmac::HMAC_SHA256, &derive(SIGNING_INFO)?);
        let cipher = if encrypt {
            let unbound = UnboundKey::new(&AES_256_GCM, &derive(ENCRYPTION_INFO)?)
                .map_err(|_| CodecError::KeyDerivation)?;
            Some(LessSafeKey::new(unbound))
        } else {
            None
        };

        Ok(Self {
            cookie_name: cookie_name.into(),
            signing_key,
            cipher,
        })
    }

    /// Returns the name of the cookie this codec signs for.
    #[must_use]
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Returns true if payloads are encrypted as well as signed.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    /// Encodes a session into a cookie value.
    ///
    /// # Errors
    ///
    /// Fails only if the system random source or the cipher fails.
    pub fn encode(&self, session: &Session) -> Result<String, Report<CodecError>> {
        self.seal(SESSION_PURPOSE, session)
    }

    /// Decodes a session cookie value, rejecting expired sessions.
    ///
    /// # Errors
    ///
    /// See [`SessionCodec::decode_at`].
    pub fn decode(&self, value: &str) -> Result<Session, CookieDecodeError> {
        self.decode_at(value, Utc::now())
    }

    /// Decodes a session cookie value as of `now`.
    ///
    /// # Errors
    ///
    /// - `SignatureInvalid` if the value does not authenticate,
    /// - `Malformed` if it is truncated or the payload cannot be parsed,
    /// - `Expired` if the session expired at or before `now`.
    pub fn decode_at(&self, value: &str, now: DateTime<Utc>) -> Result<Session, CookieDecodeError> {
        let session = self.open_session(value)?;
        if session.is_expired_at(now) {
            return Err(CookieDecodeError::Expired);
        }
        Ok(session)
    }

    /// Verifies and parses a session cookie without checking expiry.
    ///
    /// Used to recover an expired session so it can be revalidated with the
    /// provider.
    ///
    /// # Errors
    ///
    /// `SignatureInvalid` or `Malformed`, as for [`SessionCodec::decode_at`].
    pub fn open_session(&self, value: &str) -> Result<Session, CookieDecodeError> {
        self.open(SESSION_PURPOSE, value)
    }

    /// Encodes CSRF state for the transient state cookie.
    ///
    /// # Errors
    ///
    /// Fails only if the system random source or the cipher fails.
    pub fn seal_state(&self, state: &CsrfState) -> Result<String, Report<CodecError>> {
        self.seal(STATE_PURPOSE, state)
    }

    /// Decodes the transient state cookie as of `now`.
    ///
    /// # Errors
    ///
    /// Same rules as session decoding; expired state yields `Expired`.
    pub fn open_state_at(
        &self,
        value: &str,
        now: DateTime<Utc>,
    ) -> Result<CsrfState, CookieDecodeError> {
        let state: CsrfState = self.open(STATE_PURPOSE, value)?;
        if state.is_expired_at(now) {
            return Err(CookieDecodeError::Expired);
        }
        Ok(state)
    }

    fn seal<T: Serialize>(
        &self,
        purpose: &str,
        payload: &T,
    ) -> Result<String, Report<CodecError>> {
        let json = serde_json::to_vec(payload).map_err(|e| CodecError::Serialization {
            details: e.to_string(),
        })?;

        let mut envelope = match &self.cipher {
            Some(cipher) => {
                let mut nonce_bytes = [0u8; NONCE_LEN];
                rand::fill(&mut nonce_bytes).map_err(|_| CodecError::Cipher)?;
                let nonce = Nonce::assume_unique_for_key(nonce_bytes);

                let mut in_out = Vec::with_capacity(json.len() + AES_256_GCM.tag_len());
                in_out.extend_from_slice(&json);
                cipher
                    .seal_in_place_append_tag(nonce, Aad::from(purpose.as_bytes()), &mut in_out)
                    .map_err(|_| CodecError::Cipher)?;

                let mut envelope = Vec::with_capacity(1 + NONCE_LEN + in_out.len() + TAG_LEN);
                envelope.push(VERSION_SEALED);
                envelope.extend_from_slice(&nonce_bytes);
                envelope.extend_from_slice(&in_out);
                envelope
            }
            None => {
                let mut envelope = Vec::with_capacity(1 + json.len() + TAG_LEN);
                envelope.push(VERSION_SIGNED);
                envelope.extend_from_slice(&json);
                envelope
            }
        };

        let tag = hmac::sign(&self.signing_key, &self.mac_input(purpose, &envelope));
        envelope.extend_from_slice(tag.as_ref());

        Ok(URL_SAFE_NO_PAD.encode(envelope))
    }

    fn open<T: DeserializeOwned>(&self, purpose: &str, value: &str) -> Result<T, CookieDecodeError> {
        if value.is_empty() {
            return Err(CookieDecodeError::Malformed);
        }

        let raw = URL_SAFE_NO_PAD
            .decode(value)
            .map_err(|_| CookieDecodeError::SignatureInvalid)?;
        if raw.len() < 1 + TAG_LEN {
            return Err(CookieDecodeError::Malformed);
        }

        let (signed, tag) = raw.split_at(raw.len() - TAG_LEN);
        hmac::verify(&self.signing_key, &self.mac_input(purpose, signed), tag)
            .map_err(|_| CookieDecodeError::SignatureInvalid)?;

        let (version, body) = signed
            .split_first()
            .ok_or(CookieDecodeError::Malformed)?;

        let json = match (*version, &self.cipher) {
            (VERSION_SIGNED, None) => body.to_vec(),
            (VERSION_SEALED, Some(cipher)) => {
                if body.len() < NONCE_LEN + AES_256_GCM.tag_len() {
                    return Err(CookieDecodeError::Malformed);
                }
                let (nonce, ciphertext) = body.split_at(NONCE_LEN);
                let nonce = Nonce::try_assume_unique_for_key(nonce)
                    .map_err(|_| CookieDecodeError::Malformed)?;
                let mut in_out = ciphertext.to_vec();
                let plaintext = cipher
                    .open_in_place(nonce, Aad::from(purpose.as_bytes()), &mut in_out)
                    .map_err(|_| CookieDecodeError::SignatureInvalid)?;
                plaintext.to_vec()
            }
            _ => return Err(CookieDecodeError::Malformed),
        };

        serde_json::from_slice(&json).map_err(|_| CookieDecodeError::Malformed)
    }

    fn mac_input(&self, purpose: &str, envelope: &[u8]) -> Vec<u8> {
        let mut input =
            Vec::with_capacity(purpose.len() + self.cookie_name.len() + envelope.len() + 2);
        input.extend_from_slice(purpose.as_bytes());
        input.push(0);
        input.extend_from_slice(self.cookie_name.as_bytes());
        input.push(0);
        input.extend_from_slice(envelope);
        input
    }
}
