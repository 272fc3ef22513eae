//! Plain OAuth2 provider.
//!
//! Identity comes from a JSON profile document (`{"email": "..."}`) fetched
//! with the access token. Token liveness is a successful response from the
//! validate endpoint.

use async_trait::async_trait;
use portcullis_core::EmailAddress;
use rootcause::prelude::Report;
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use crate::client::OAuthClient;
use crate::descriptor::ProviderDescriptor;
use crate::error::ProviderError;
use crate::provider::Provider;
use crate::types::{Identity, Tokens};

#[derive(Debug, Deserialize)]
struct Profile {
    #[serde(default)]
    email: String,
}

/// A generic OAuth2 provider.
#[derive(Debug, Clone)]
pub struct GenericProvider {
    oauth: OAuthClient,
    profile_url: Option<Url>,
    validate_url: Option<Url>,
}

impl GenericProvider {
    /// Creates the provider from a validated descriptor.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the OAuth2 client cannot be built.
    pub fn new(descriptor: &ProviderDescriptor, http: reqwest::Client) -> Result<Self, Report<ProviderError>> {
        Ok(Self {
            oauth: OAuthClient::new(descriptor, http)?,
            profile_url: descriptor.profile_url().cloned(),
            validate_url: descriptor.validate_url().cloned(),
        })
    }
}

#[async_trait]
impl Provider for GenericProvider {
    fn name(&self) -> &str {
        "OAuth2"
    }

    fn authorize_url(&self, state: &str, redirect_uri: &str) -> Result<Url, Report<ProviderError>> {
        self.oauth.authorize_url(state, redirect_uri)
    }

    async fn redeem(&self, code: &str, redirect_uri: &str) -> Result<Tokens, Report<ProviderError>> {
        self.oauth.redeem(code, redirect_uri).await
    }

    #[instrument(skip_all)]
    async fn email(&self, access_token: &str) -> Result<Identity, Report<ProviderError>> {
        let url = self
            .profile_url
            .as_ref()
            .or(self.validate_url.as_ref())
            .ok_or_else(|| ProviderError::profile("no profile endpoint configured"))?;

        let profile: Profile = self
            .oauth
            .http()
            .get(url.clone())
            .bearer_auth(access_token)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| ProviderError::profile(format!("profile request failed: {e}")))?
            .json()
            .await
            .map_err(|e| ProviderError::profile(format!("invalid profile response: {e}")))?;

        let email = EmailAddress::parse(&profile.email)
            .map_err(|e| ProviderError::profile(format!("profile has no usable email: {e}")))?;
        debug!(email = %email, "Resolved identity from profile");

        Ok(Identity::from_email(email))
    }

    #[instrument(skip_all)]
    async fn validate(&self, access_token: &str) -> bool {
        let Some(url) = self.validate_url.as_ref() else {
            return false;
        };

        match self
            .oauth
            .http()
            .get(url.clone())
            .bearer_auth(access_token)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "Token validation request failed");
                false
            }
        }
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Option<Tokens>, Report<ProviderError>> {
        self.oauth.refresh(refresh_token).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProviderKind;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(base: &str, with_validate: bool) -> GenericProvider {
        let mut builder = ProviderDescriptor::builder(ProviderKind::Generic, "client", "secret")
            .login_url(format!("{base}/authorize"))
            .redeem_url(format!("{base}/token"))
            .profile_url(format!("{base}/profile"));
        if with_validate {
            builder = builder.validate_url(format!("{base}/validate"));
        }
        GenericProvider::new(&builder.build().expect("descriptor"), reqwest::Client::new())
            .expect("provider")
    }

    #[tokio::test]
    async fn email_reads_profile_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/profile"))
            .and(header("authorization", "Bearer at-1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"email": "User@Allowed.com"})),
            )
            .mount(&server)
            .await;

        let identity = provider(&server.uri(), false).email("at-1").await.expect("identity");
        assert_eq!(identity.email.to_string(), "User@allowed.com");
        assert_eq!(identity.user, "User");
    }

    #[tokio::test]
    async fn email_missing_from_profile_is_profile_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/profile"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "x"})))
            .mount(&server)
            .await;

        let err = provider(&server.uri(), false).email("at-1").await.expect_err("no email");
        assert!(matches!(err.current_context(), ProviderError::ProfileUnavailable { .. }));
    }

    #[tokio::test]
    async fn profile_error_status_is_profile_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/profile"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = provider(&server.uri(), false).email("at-1").await.expect_err("denied");
        assert!(matches!(err.current_context(), ProviderError::ProfileUnavailable { .. }));
    }

    #[tokio::test]
    async fn validate_follows_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/validate"))
            .and(header("authorization", "Bearer live"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/validate"))
            .and(header("authorization", "Bearer dead"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let provider = provider(&server.uri(), true);
        assert!(provider.validate("live").await);
        assert!(!provider.validate("dead").await);
    }

    #[tokio::test]
    async fn validate_without_endpoint_fails_closed() {
        assert!(!provider("http://127.0.0.1:9", false).validate("any").await);
    }

    #[tokio::test]
    async fn validate_transport_error_fails_closed() {
        assert!(!provider("http://127.0.0.1:9", true).validate("any").await);
    }

    #[tokio::test]
    async fn generic_provider_is_not_delegated() {
        let provider = provider("https://idp.example", false);
        let identity = Identity::from_email(EmailAddress::parse("a@b.c").expect("email"));
        assert!(!provider.is_delegated());
        assert!(provider.authorize("t", &identity).await.expect("authorize"));
    }
}
