//! OAuth2 authorization-code client shared by every provider variant.

use oauth2::basic::BasicClient;
use oauth2::{
    AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet,
    EndpointSet, RedirectUrl, RefreshToken, Scope, TokenResponse, TokenUrl,
};
use rootcause::prelude::{Report, ResultExt};
use std::borrow::Cow;
use tracing::{debug, instrument};
use url::Url;

use crate::descriptor::ProviderDescriptor;
use crate::error::ProviderError;
use crate::types::Tokens;

type CodeClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Builds authorize URLs and talks to the token endpoint.
#[derive(Debug, Clone)]
pub(crate) struct OAuthClient {
    client: CodeClient,
    http: reqwest::Client,
    scope: String,
    approval_prompt: String,
}

impl OAuthClient {
    pub(crate) fn new(
        descriptor: &ProviderDescriptor,
        http: reqwest::Client,
    ) -> Result<Self, Report<ProviderError>> {
        let auth_url = AuthUrl::from_url(descriptor.login_url().clone());
        let token_url = TokenUrl::from_url(descriptor.redeem_url().clone());

        // Credentials go in the form body, which every provider accepts.
        let client = BasicClient::new(ClientId::new(descriptor.client_id().to_string()))
            .set_client_secret(ClientSecret::new(descriptor.client_secret().to_string()))
            .set_auth_type(AuthType::RequestBody)
            .set_auth_uri(auth_url)
            .set_token_uri(token_url);

        Ok(Self {
            client,
            http,
            scope: descriptor.scope().to_string(),
            approval_prompt: descriptor.approval_prompt().to_string(),
        })
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) fn authorize_url(&self, state: &str, redirect_uri: &str) -> Result<Url, Report<ProviderError>> {
        let redirect = redirect_url(redirect_uri)?;
        let state = state.to_string();

        let mut request = self
            .client
            .authorize_url(move || CsrfToken::new(state))
            .set_redirect_uri(Cow::Owned(redirect))
            .add_scopes(self.scope.split_whitespace().map(|s| Scope::new(s.to_string())));
        if !self.approval_prompt.is_empty() {
            request = request.add_extra_param("approval_prompt", self.approval_prompt.as_str());
        }

        let (url, _state) = request.url();
        Ok(url)
    }

    #[instrument(skip(self, code))]
    pub(crate) async fn redeem(&self, code: &str, redirect_uri: &str) -> Result<Tokens, Report<ProviderError>> {
        if code.is_empty() {
            return Err(ProviderError::redeem("missing authorization code").into());
        }
        let redirect =
            redirect_url(redirect_uri).context(ProviderError::redeem("invalid redirect URI"))?;

        let response = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .set_redirect_uri(Cow::Owned(redirect))
            .request_async(&self.http)
            .await
            .map_err(|e| ProviderError::redeem(format!("token exchange failed: {e}")))?;

        let access_token = response.access_token().secret().clone();
        if access_token.is_empty() {
            return Err(ProviderError::redeem("token response has an empty access token").into());
        }
        debug!(
            has_refresh_token = response.refresh_token().is_some(),
            "Redeemed authorization code"
        );

        Ok(Tokens {
            access_token,
            refresh_token: response.refresh_token().map(|t| t.secret().clone()),
        })
    }

    #[instrument(skip_all)]
    pub(crate) async fn refresh(&self, refresh_token: &str) -> Result<Tokens, Report<ProviderError>> {
        let refresh_token = RefreshToken::new(refresh_token.to_string());
        let response = self
            .client
            .exchange_refresh_token(&refresh_token)
            .request_async(&self.http)
            .await
            .map_err(|e| ProviderError::refresh(format!("token refresh failed: {e}")))?;

        let access_token = response.access_token().secret().clone();
        if access_token.is_empty() {
            return Err(ProviderError::refresh("token response has an empty access token").into());
        }

        Ok(Tokens {
            access_token,
            refresh_token: response.refresh_token().map(|t| t.secret().clone()),
        })
    }
}

fn redirect_url(redirect_uri: &str) -> Result<RedirectUrl, ProviderError> {
    RedirectUrl::new(redirect_uri.to_string())
        .map_err(|e| ProviderError::configuration(format!("invalid redirect URL: {e}")))
}
