//! CSRF state carried across the provider round trip.

use aws_lc_rs::constant_time;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// How long a sign-in attempt may take before its state is rejected.
pub const STATE_LIFETIME_MINUTES: i64 = 10;

/// State bound to one sign-in attempt.
///
/// The nonce doubles as the OAuth `state` parameter; the redirect is where
/// the user lands after the callback succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsrfState {
    nonce: String,
    redirect: String,
    expires_at: DateTime<Utc>,
}

impl CsrfState {
    /// Creates state that expires [`STATE_LIFETIME_MINUTES`] from now.
    #[must_use]
    pub fn new(nonce: String, redirect: String) -> Self {
        Self {
            nonce,
            redirect,
            expires_at: Utc::now() + Duration::minutes(STATE_LIFETIME_MINUTES),
        }
    }

    #[must_use]
    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    #[must_use]
    pub fn redirect(&self) -> &str {
        &self.redirect
    }

    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Compares a returned `state` parameter with the nonce in constant time.
    #[must_use]
    pub fn verify_nonce(&self, candidate: &str) -> bool {
        constant_time::verify_slices_are_equal(self.nonce.as_bytes(), candidate.as_bytes()).is_ok()
    }

    /// Returns true if the sign-in attempt has timed out at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
