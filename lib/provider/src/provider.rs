//! The identity provider capability.

use async_trait::async_trait;
use rootcause::prelude::Report;
use url::Url;

use crate::error::ProviderError;
use crate::types::{Identity, Tokens};

/// An identity provider the proxy delegates sign-in to.
///
/// Every method fails closed: callers must treat any error as "not
/// authenticated" or "not authorized", never as a pass.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Returns the provider name shown on the sign-in page.
    fn name(&self) -> &str;

    /// Builds the URL the browser is sent to for sign-in.
    ///
    /// Pure: the same inputs always yield the same URL.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the redirect URI is not a valid URL.
    fn authorize_url(&self, state: &str, redirect_uri: &str) -> Result<Url, Report<ProviderError>>;

    /// Redeems an authorization code at the token endpoint.
    ///
    /// # Errors
    ///
    /// Returns `RedeemFailed` on transport errors, non-success responses, or
    /// a response without an access token.
    async fn redeem(&self, code: &str, redirect_uri: &str) -> Result<Tokens, Report<ProviderError>>;

    /// Resolves an access token to the identity it belongs to.
    ///
    /// # Errors
    ///
    /// Returns `ProfileUnavailable` if the identity cannot be resolved.
    async fn email(&self, access_token: &str) -> Result<Identity, Report<ProviderError>>;

    /// Returns true if the access token is still live.
    async fn validate(&self, access_token: &str) -> bool;

    /// Exchanges a refresh token for fresh tokens.
    ///
    /// Returns `Ok(None)` when the provider does not support refresh.
    ///
    /// # Errors
    ///
    /// Returns `RefreshFailed` if the provider rejects the refresh token.
    async fn refresh(&self, refresh_token: &str) -> Result<Option<Tokens>, Report<ProviderError>> {
        let _ = refresh_token;
        Ok(None)
    }

    /// Returns true if sign-in additionally requires [`Provider::authorize`].
    fn is_delegated(&self) -> bool {
        false
    }

    /// Asks the provider whether the identity may sign in.
    ///
    /// Providers without delegated authorization allow everyone the local
    /// policy allowed.
    ///
    /// # Errors
    ///
    /// Returns `AuthorizeFailed` if the check could not be completed.
    async fn authorize(&self, access_token: &str, identity: &Identity) -> Result<bool, Report<ProviderError>> {
        let _ = (access_token, identity);
        Ok(!self.is_delegated())
    }

    /// Returns true if requests for `path` may authenticate with a bearer
    /// token instead of a session cookie.
    fn delegates_path(&self, path: &str) -> bool {
        let _ = path;
        false
    }

    /// Asks the provider whether the token's user may access `path`.
    ///
    /// Only meaningful for paths [`Provider::delegates_path`] accepts; every
    /// other path is refused.
    ///
    /// # Errors
    ///
    /// Returns `AuthorizeFailed` if the check could not be completed.
    async fn authorize_path(&self, access_token: &str, path: &str) -> Result<bool, Report<ProviderError>> {
        let _ = (access_token, path);
        Ok(false)
    }
}
