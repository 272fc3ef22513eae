//! Provider error types.

use std::fmt;

/// Errors from identity provider operations.
///
/// Every variant is a failure to establish or confirm an identity; callers
/// treat all of them as a denial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider descriptor or transport is invalid.
    Configuration {
        /// Error details.
        details: String,
    },
    /// The authorization code could not be redeemed for a token.
    RedeemFailed {
        /// Error details.
        details: String,
    },
    /// The access token could not be resolved to an identity.
    ProfileUnavailable {
        /// Error details.
        details: String,
    },
    /// A delegated authorization check could not be completed.
    AuthorizeFailed {
        /// Error details.
        details: String,
    },
    /// The refresh token could not be exchanged for a new access token.
    RefreshFailed {
        /// Error details.
        details: String,
    },
}

impl ProviderError {
    pub(crate) fn configuration(details: impl fmt::Display) -> Self {
        Self::Configuration {
            details: details.to_string(),
        }
    }

    pub(crate) fn redeem(details: impl fmt::Display) -> Self {
        Self::RedeemFailed {
            details: details.to_string(),
        }
    }

    pub(crate) fn profile(details: impl fmt::Display) -> Self {
        Self::ProfileUnavailable {
            details: details.to_string(),
        }
    }

    pub(crate) fn authorize(details: impl fmt::Display) -> Self {
        Self::AuthorizeFailed {
            details: details.to_string(),
        }
    }

    pub(crate) fn refresh(details: impl fmt::Display) -> Self {
        Self::RefreshFailed {
            details: details.to_string(),
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration { details } => {
                write!(f, "invalid provider configuration: {details}")
            }
            Self::RedeemFailed { details } => {
                write!(f, "failed to redeem authorization code: {details}")
            }
            Self::ProfileUnavailable { details } => {
                write!(f, "failed to resolve identity: {details}")
            }
            Self::AuthorizeFailed { details } => {
                write!(f, "authorization check failed: {details}")
            }
            Self::RefreshFailed { details } => {
                write!(f, "failed to refresh access token: {details}")
            }
        }
    }
}

impl std::error::Error for ProviderError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redeem_failed_display() {
        let err = ProviderError::redeem("status 400");
        assert!(err.to_string().contains("redeem"));
        assert!(err.to_string().contains("status 400"));
    }

    #[test]
    fn variants_are_distinguishable() {
        assert_ne!(
            ProviderError::profile("x").to_string(),
            ProviderError::authorize("x").to_string()
        );
        assert!(matches!(
            ProviderError::refresh("gone"),
            ProviderError::RefreshFailed { .. }
        ));
    }
}
