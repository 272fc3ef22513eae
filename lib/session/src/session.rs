//! Session records carried in the session cookie.
//!
//! A session is created after a successful code redemption (or an htpasswd
//! sign-in) and lives only inside the cookie that encodes it. There is no
//! server-side copy: destroying the cookie destroys the session.

use chrono::{DateTime, Duration, Utc};
use portcullis_core::EmailAddress;
use serde::{Deserialize, Serialize};

/// Represents an authenticated session.
///
/// The session holds the resolved identity, the provider tokens needed to
/// revalidate it, and its lifetime bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// The authorized email identity. Absent for htpasswd sign-ins.
    email: Option<EmailAddress>,
    /// The user name forwarded upstream.
    user: String,
    /// Provider access token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    /// Provider refresh token, when the provider issues one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    /// When the session was created or last revalidated.
    created_at: DateTime<Utc>,
    /// When the session expires.
    expires_at: DateTime<Utc>,
}

impl Session {
    /// Creates a session for an identity, valid for `duration` from now.
    #[must_use]
    pub fn new(user: String, email: Option<EmailAddress>, duration: Duration) -> Self {
        Self::starting_at(user, email, Utc::now(), duration)
    }

    /// Creates a session with an explicit creation time.
    #[must_use]
    pub fn starting_at(
        user: String,
        email: Option<EmailAddress>,
        created_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            email,
            user,
            access_token: None,
            refresh_token: None,
            created_at,
            expires_at: created_at + duration,
        }
    }

    /// Creates a session for an email identity holding provider tokens.
    ///
    /// The user name is the local part of the email.
    #[must_use]
    pub fn with_tokens(
        email: EmailAddress,
        duration: Duration,
        access_token: String,
        refresh_token: Option<String>,
    ) -> Self {
        Self::new(email.local_part().to_string(), Some(email), duration)
            .with_access_token(access_token, refresh_token)
    }

    /// Attaches provider tokens.
    #[must_use]
    pub fn with_access_token(mut self, access_token: String, refresh_token: Option<String>) -> Self {
        self.access_token = Some(access_token);
        self.refresh_token = refresh_token;
        self
    }

    /// Overrides the forwarded user name.
    #[must_use]
    pub fn with_user(mut self, user: String) -> Self {
        self.user = user;
        self
    }

    /// Returns the email identity, if any.
    #[must_use]
    pub fn email(&self) -> Option<&EmailAddress> {
        self.email.as_ref()
    }

    /// Returns the user name.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Returns when the session was created or last revalidated.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when the session expires.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Returns the provider access token, if present.
    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    /// Returns the provider refresh token, if present.
    #[must_use]
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    /// Returns true if the session has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Returns how long ago the session was created or revalidated.
    #[must_use]
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }

    /// Replaces the tokens and restarts the session lifetime.
    pub fn refresh(
        &mut self,
        access_token: String,
        refresh_token: Option<String>,
        duration: Duration,
    ) {
        self.access_token = Some(access_token);
        if refresh_token.is_some() {
            self.refresh_token = refresh_token;
        }
        self.renew(duration);
    }

    /// Restarts the session lifetime without touching the tokens.
    pub fn renew(&mut self, duration: Duration) {
        let now = Utc::now();
        self.created_at = now;
        self.expires_at = now + duration;
    }
}
