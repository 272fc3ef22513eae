//! Provider descriptors.
//!
//! A [`ProviderDescriptor`] is the complete, validated description of one
//! identity provider: its endpoints, client credentials, and for delegated
//! providers the authorization policy. It is built once at startup and never
//! changes afterwards.

use rootcause::prelude::Report;
use url::Url;

use crate::error::ProviderError;
use crate::types::{AccessReview, DelegateUrls, ProviderKind};

/// Default API address for an OpenShift provider running in-cluster.
pub const DEFAULT_OPENSHIFT_API_URL: &str = "https://kubernetes.default.svc";

const OPENSHIFT_AUTHORIZE_PATH: &str = "/oauth/authorize";
const OPENSHIFT_TOKEN_PATH: &str = "/oauth/token";
const OPENSHIFT_USER_PATH: &str = "/apis/user.openshift.io/v1/users/~";
const OPENSHIFT_REVIEW_PATH: &str = "/apis/authorization.openshift.io/v1/subjectaccessreviews";

const DEFAULT_GENERIC_SCOPE: &str = "openid email profile";
const DEFAULT_OPENSHIFT_SCOPE: &str = "user:info user:check-access";
const DEFAULT_APPROVAL_PROMPT: &str = "force";

/// Validated provider endpoints and policy.
#[derive(Debug, Clone)]
pub struct ProviderDescriptor {
    kind: ProviderKind,
    client_id: String,
    client_secret: String,
    login_url: Url,
    redeem_url: Url,
    profile_url: Option<Url>,
    validate_url: Option<Url>,
    review_url: Option<Url>,
    scope: String,
    approval_prompt: String,
    groups: Vec<String>,
    reviews: Vec<AccessReview>,
    delegate_urls: DelegateUrls,
}

impl ProviderDescriptor {
    /// Creates a builder for the given provider variant.
    #[must_use]
    pub fn builder(
        kind: ProviderKind,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> ProviderDescriptorBuilder {
        ProviderDescriptorBuilder::new(kind, client_id.into(), client_secret.into())
    }

    #[must_use]
    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    /// Returns the authorize endpoint users are redirected to.
    #[must_use]
    pub fn login_url(&self) -> &Url {
        &self.login_url
    }

    /// Returns the token endpoint codes are redeemed at.
    #[must_use]
    pub fn redeem_url(&self) -> &Url {
        &self.redeem_url
    }

    #[must_use]
    pub fn profile_url(&self) -> Option<&Url> {
        self.profile_url.as_ref()
    }

    #[must_use]
    pub fn validate_url(&self) -> Option<&Url> {
        self.validate_url.as_ref()
    }

    /// Returns the subject access review endpoint (delegated providers only).
    #[must_use]
    pub fn review_url(&self) -> Option<&Url> {
        self.review_url.as_ref()
    }

    /// Returns the space-separated scope string.
    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    #[must_use]
    pub fn approval_prompt(&self) -> &str {
        &self.approval_prompt
    }

    /// Returns the groups of which a user must belong to at least one.
    #[must_use]
    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    /// Returns the reviews every user must pass.
    #[must_use]
    pub fn reviews(&self) -> &[AccessReview] {
        &self.reviews
    }

    /// Returns the paths that accept bearer tokens checked by review.
    #[must_use]
    pub fn delegate_urls(&self) -> &DelegateUrls {
        &self.delegate_urls
    }
}

/// Builder for [`ProviderDescriptor`].
#[derive(Debug, Clone)]
pub struct ProviderDescriptorBuilder {
    kind: ProviderKind,
    client_id: String,
    client_secret: String,
    api_url: Option<String>,
    login_url: Option<String>,
    redeem_url: Option<String>,
    profile_url: Option<String>,
    validate_url: Option<String>,
    review_url: Option<String>,
    scope: Option<String>,
    approval_prompt: Option<String>,
    groups: Vec<String>,
    reviews: Vec<AccessReview>,
    delegate_urls: DelegateUrls,
}

impl ProviderDescriptorBuilder {
    fn new(kind: ProviderKind, client_id: String, client_secret: String) -> Self {
        Self {
            kind,
            client_id,
            client_secret,
            api_url: None,
            login_url: None,
            redeem_url: None,
            profile_url: None,
            validate_url: None,
            review_url: None,
            scope: None,
            approval_prompt: None,
            groups: Vec::new(),
            reviews: Vec::new(),
            delegate_urls: DelegateUrls::default(),
        }
    }

    /// Sets the OpenShift API address the other endpoints default from.
    #[must_use]
    pub fn api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn login_url(mut self, url: impl Into<String>) -> Self {
        self.login_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn redeem_url(mut self, url: impl Into<String>) -> Self {
        self.redeem_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn profile_url(mut self, url: impl Into<String>) -> Self {
        self.profile_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn validate_url(mut self, url: impl Into<String>) -> Self {
        self.validate_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn review_url(mut self, url: impl Into<String>) -> Self {
        self.review_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    #[must_use]
    pub fn approval_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.approval_prompt = Some(prompt.into());
        self
    }

    #[must_use]
    pub fn groups(mut self, groups: Vec<String>) -> Self {
        self.groups = groups;
        self
    }

    #[must_use]
    pub fn reviews(mut self, reviews: Vec<AccessReview>) -> Self {
        self.reviews = reviews;
        self
    }

    #[must_use]
    pub fn delegate_urls(mut self, delegate_urls: DelegateUrls) -> Self {
        self.delegate_urls = delegate_urls;
        self
    }

    /// Validates the endpoints and fills in provider defaults.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the client id is empty, a URL does
    /// not parse, a generic provider lacks its login or redeem endpoint, or
    /// delegated policy is configured for a provider that cannot enforce it.
    pub fn build(self) -> Result<ProviderDescriptor, Report<ProviderError>> {
        if self.client_id.trim().is_empty() {
            return Err(ProviderError::configuration("client id is required").into());
        }

        let descriptor = match self.kind {
            ProviderKind::Generic => self.build_generic(),
            ProviderKind::OpenShift => self.build_openshift(),
        }?;
        Ok(descriptor)
    }

    fn build_generic(self) -> Result<ProviderDescriptor, ProviderError> {
        if !self.groups.is_empty() || !self.reviews.is_empty() || !self.delegate_urls.is_empty() {
            return Err(ProviderError::configuration(
                "groups, access reviews and delegate URLs require the openshift provider",
            ));
        }

        let login_url = required("login_url", self.login_url.as_deref())?;
        let redeem_url = required("redeem_url", self.redeem_url.as_deref())?;

        Ok(ProviderDescriptor {
            kind: self.kind,
            client_id: self.client_id,
            client_secret: self.client_secret,
            login_url,
            redeem_url,
            profile_url: optional("profile_url", self.profile_url.as_deref())?,
            validate_url: optional("validate_url", self.validate_url.as_deref())?,
            review_url: None,
            scope: self.scope.unwrap_or_else(|| DEFAULT_GENERIC_SCOPE.to_string()),
            approval_prompt: self
                .approval_prompt
                .unwrap_or_else(|| DEFAULT_APPROVAL_PROMPT.to_string()),
            groups: Vec::new(),
            reviews: Vec::new(),
            delegate_urls: DelegateUrls::default(),
        })
    }

    fn build_openshift(self) -> Result<ProviderDescriptor, ProviderError> {
        let api_url = parse_url(
            "api_url",
            self.api_url.as_deref().unwrap_or(DEFAULT_OPENSHIFT_API_URL),
        )?;
        let endpoint = |name: &str, explicit: Option<&str>, path: &str| match explicit {
            Some(url) => parse_url(name, url),
            None => api_url
                .join(path)
                .map_err(|e| ProviderError::configuration(format!("invalid {name}: {e}"))),
        };

        let login_url = endpoint("login_url", self.login_url.as_deref(), OPENSHIFT_AUTHORIZE_PATH)?;
        let redeem_url = endpoint("redeem_url", self.redeem_url.as_deref(), OPENSHIFT_TOKEN_PATH)?;
        let profile_url = endpoint("profile_url", self.profile_url.as_deref(), OPENSHIFT_USER_PATH)?;
        let validate_url =
            endpoint("validate_url", self.validate_url.as_deref(), OPENSHIFT_USER_PATH)?;
        let review_url = endpoint("review_url", self.review_url.as_deref(), OPENSHIFT_REVIEW_PATH)?;

        Ok(ProviderDescriptor {
            kind: self.kind,
            client_id: self.client_id,
            client_secret: self.client_secret,
            login_url,
            redeem_url,
            profile_url: Some(profile_url),
            validate_url: Some(validate_url),
            review_url: Some(review_url),
            scope: self
                .scope
                .unwrap_or_else(|| DEFAULT_OPENSHIFT_SCOPE.to_string()),
            approval_prompt: self
                .approval_prompt
                .unwrap_or_else(|| DEFAULT_APPROVAL_PROMPT.to_string()),
            groups: self.groups,
            reviews: self.reviews,
            delegate_urls: self.delegate_urls,
        })
    }
}

fn parse_url(name: &str, value: &str) -> Result<Url, ProviderError> {
    Url::parse(value).map_err(|e| ProviderError::configuration(format!("invalid {name} '{value}': {e}")))
}

fn required(name: &str, value: Option<&str>) -> Result<Url, ProviderError> {
    match value {
        Some(value) if !value.is_empty() => parse_url(name, value),
        _ => Err(ProviderError::configuration(format!("{name} is required"))),
    }
}

fn optional(name: &str, value: Option<&str>) -> Result<Option<Url>, ProviderError> {
    match value {
        Some(value) if !value.is_empty() => parse_url(name, value).map(Some),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openshift_endpoints_default_from_api_url() {
        let descriptor = ProviderDescriptor::builder(ProviderKind::OpenShift, "proxy", "secret")
            .api_url("https://api.cluster.example:6443")
            .build()
            .expect("descriptor");

        assert_eq!(
            descriptor.login_url().as_str(),
            "https://api.cluster.example:6443/oauth/authorize"
        );
        assert_eq!(
            descriptor.redeem_url().as_str(),
            "https://api.cluster.example:6443/oauth/token"
        );
        assert_eq!(
            descriptor.profile_url().map(Url::as_str),
            Some("https://api.cluster.example:6443/apis/user.openshift.io/v1/users/~")
        );
        assert_eq!(
            descriptor.review_url().map(Url::as_str),
            Some("https://api.cluster.example:6443/apis/authorization.openshift.io/v1/subjectaccessreviews")
        );
        assert_eq!(descriptor.scope(), "user:info user:check-access");
        assert_eq!(descriptor.approval_prompt(), "force");
    }

    #[test]
    fn openshift_explicit_login_url_wins() {
        let descriptor = ProviderDescriptor::builder(ProviderKind::OpenShift, "proxy", "secret")
            .login_url("https://oauth.apps.example/oauth/authorize")
            .build()
            .expect("descriptor");
        assert_eq!(descriptor.login_url().host_str(), Some("oauth.apps.example"));
        assert_eq!(descriptor.redeem_url().host_str(), Some("kubernetes.default.svc"));
    }

    #[test]
    fn generic_requires_login_and_redeem_urls() {
        let err = ProviderDescriptor::builder(ProviderKind::Generic, "client", "secret")
            .login_url("https://idp.example/authorize")
            .build()
            .expect_err("missing redeem url");
        assert!(err.to_string().contains("redeem_url"));

        let descriptor = ProviderDescriptor::builder(ProviderKind::Generic, "client", "secret")
            .login_url("https://idp.example/authorize")
            .redeem_url("https://idp.example/token")
            .build()
            .expect("descriptor");
        assert!(descriptor.profile_url().is_none());
        assert!(descriptor.review_url().is_none());
        assert_eq!(descriptor.scope(), "openid email profile");
    }

    #[test]
    fn generic_rejects_delegated_policy() {
        let err = ProviderDescriptor::builder(ProviderKind::Generic, "client", "secret")
            .login_url("https://idp.example/authorize")
            .redeem_url("https://idp.example/token")
            .groups(vec!["admins".to_string()])
            .build()
            .expect_err("groups need openshift");
        assert!(matches!(err.current_context(), ProviderError::Configuration { .. }));
    }

    #[test]
    fn generic_rejects_delegate_urls() {
        let err = ProviderDescriptor::builder(ProviderKind::Generic, "client", "secret")
            .login_url("https://idp.example/authorize")
            .redeem_url("https://idp.example/token")
            .delegate_urls(DelegateUrls::parse(r#"{"/api": {"verb": "get"}}"#).expect("urls"))
            .build()
            .expect_err("delegate urls need openshift");
        assert!(err.to_string().contains("delegate URLs"));
    }

    #[test]
    fn empty_client_id_is_rejected() {
        assert!(
            ProviderDescriptor::builder(ProviderKind::OpenShift, " ", "secret")
                .build()
                .is_err()
        );
    }

    #[test]
    fn invalid_url_is_rejected() {
        let err = ProviderDescriptor::builder(ProviderKind::Generic, "client", "secret")
            .login_url("not a url")
            .redeem_url("https://idp.example/token")
            .build()
            .expect_err("invalid");
        assert!(err.to_string().contains("login_url"));
    }
}
