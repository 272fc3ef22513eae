//! OpenShift provider with delegated authorization.
//!
//! The identity is the cluster user the token belongs to. Sign-in
//! additionally requires membership in one of the configured groups and an
//! `allowed` answer from every configured subject access review, asked with
//! the user's own token.

use async_trait::async_trait;
use portcullis_core::EmailAddress;
use rootcause::prelude::Report;
use serde::Deserialize;
use tracing::{debug, info, instrument};
use url::Url;

use crate::client::OAuthClient;
use crate::descriptor::ProviderDescriptor;
use crate::error::ProviderError;
use crate::provider::Provider;
use crate::types::{AccessReview, DelegateUrls, Identity, Tokens};

/// Domain given to cluster users whose name is not an email address.
pub const CLUSTER_EMAIL_DOMAIN: &str = "cluster.local";

#[derive(Debug, Deserialize)]
struct UserMetadata {
    name: String,
}

#[derive(Debug, Deserialize)]
struct User {
    metadata: UserMetadata,
    #[serde(default)]
    groups: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ReviewResponse {
    #[serde(default)]
    allowed: bool,
    #[serde(default)]
    reason: Option<String>,
}

/// An OpenShift cluster OAuth server.
#[derive(Debug, Clone)]
pub struct OpenShiftProvider {
    oauth: OAuthClient,
    user_url: Url,
    validate_url: Url,
    review_url: Url,
    groups: Vec<String>,
    reviews: Vec<AccessReview>,
    delegate_urls: DelegateUrls,
}

impl OpenShiftProvider {
    /// Creates the provider from a validated descriptor.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the descriptor lacks the user or
    /// review endpoints.
    pub fn new(descriptor: &ProviderDescriptor, http: reqwest::Client) -> Result<Self, Report<ProviderError>> {
        let user_url = descriptor
            .profile_url()
            .cloned()
            .ok_or_else(|| ProviderError::configuration("openshift provider needs a user URL"))?;
        let review_url = descriptor
            .review_url()
            .cloned()
            .ok_or_else(|| ProviderError::configuration("openshift provider needs a review URL"))?;

        Ok(Self {
            oauth: OAuthClient::new(descriptor, http)?,
            validate_url: descriptor.validate_url().cloned().unwrap_or_else(|| user_url.clone()),
            user_url,
            review_url,
            groups: descriptor.groups().to_vec(),
            reviews: descriptor.reviews().to_vec(),
            delegate_urls: descriptor.delegate_urls().clone(),
        })
    }

    async fn review(&self, access_token: &str, review: &AccessReview) -> Result<bool, Report<ProviderError>> {
        let response: ReviewResponse = self
            .oauth
            .http()
            .post(self.review_url.clone())
            .bearer_auth(access_token)
            .json(&review.to_request())
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| ProviderError::authorize(format!("access review request failed: {e}")))?
            .json()
            .await
            .map_err(|e| ProviderError::authorize(format!("invalid access review response: {e}")))?;

        if !response.allowed {
            debug!(
                reason = response.reason.as_deref().unwrap_or_default(),
                "Access review denied"
            );
        }
        Ok(response.allowed)
    }
}

/// Maps a cluster user name to the email the validator sees.
fn user_email(name: &str) -> Result<EmailAddress, ProviderError> {
    let candidate = if name.contains('@') {
        name.to_string()
    } else {
        format!("{name}@{CLUSTER_EMAIL_DOMAIN}")
    };
    EmailAddress::parse(&candidate)
        .map_err(|e| ProviderError::profile(format!("unusable user name: {e}")))
}

#[async_trait]
impl Provider for OpenShiftProvider {
    fn name(&self) -> &str {
        "OpenShift"
    }

    fn authorize_url(&self, state: &str, redirect_uri: &str) -> Result<Url, Report<ProviderError>> {
        self.oauth.authorize_url(state, redirect_uri)
    }

    async fn redeem(&self, code: &str, redirect_uri: &str) -> Result<Tokens, Report<ProviderError>> {
        self.oauth.redeem(code, redirect_uri).await
    }

    #[instrument(skip_all)]
    async fn email(&self, access_token: &str) -> Result<Identity, Report<ProviderError>> {
        let user: User = self
            .oauth
            .http()
            .get(self.user_url.clone())
            .bearer_auth(access_token)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| ProviderError::profile(format!("user request failed: {e}")))?
            .json()
            .await
            .map_err(|e| ProviderError::profile(format!("invalid user response: {e}")))?;

        if user.metadata.name.is_empty() {
            return Err(ProviderError::profile("user has no name").into());
        }

        Ok(Identity {
            email: user_email(&user.metadata.name)?,
            user: user.metadata.name,
            groups: user.groups,
        })
    }

    #[instrument(skip_all)]
    async fn validate(&self, access_token: &str) -> bool {
        match self
            .oauth
            .http()
            .get(self.validate_url.clone())
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

    fn is_delegated(&self) -> bool {
        true
    }

    #[instrument(skip_all, fields(user = %identity.user))]
    async fn authorize(&self, access_token: &str, identity: &Identity) -> Result<bool, Report<ProviderError>> {
        if !self.groups.is_empty() && !identity.groups.iter().any(|g| self.groups.contains(g)) {
            info!(user = %identity.user, "User is in none of the required groups");
            return Ok(false);
        }

        for review in &self.reviews {
            if !self.review(access_token, review).await? {
                info!(user = %identity.user, "User failed an access review");
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn delegates_path(&self, path: &str) -> bool {
        self.delegate_urls.review_for(path).is_some()
    }

    #[instrument(skip(self, access_token))]
    async fn authorize_path(&self, access_token: &str, path: &str) -> Result<bool, Report<ProviderError>> {
        match self.delegate_urls.review_for(path) {
            Some(review) => self.review(access_token, review).await,
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProviderKind;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const USER_PATH: &str = "/apis/user.openshift.io/v1/users/~";
    const REVIEW_PATH: &str = "/apis/authorization.openshift.io/v1/subjectaccessreviews";

    fn provider(base: &str, groups: &[&str], reviews: &str) -> OpenShiftProvider {
        delegating(base, groups, reviews, "")
    }

    fn delegating(base: &str, groups: &[&str], reviews: &str, delegate_urls: &str) -> OpenShiftProvider {
        let descriptor = ProviderDescriptor::builder(ProviderKind::OpenShift, "proxy", "secret")
            .api_url(base)
            .groups(groups.iter().map(|g| (*g).to_string()).collect())
            .reviews(AccessReview::parse_list(reviews).expect("reviews"))
            .delegate_urls(DelegateUrls::parse(delegate_urls).expect("delegate urls"))
            .build()
            .expect("descriptor");
        OpenShiftProvider::new(&descriptor, reqwest::Client::new()).expect("provider")
    }

    fn identity(groups: &[&str]) -> Identity {
        Identity {
            email: EmailAddress::parse("jdoe@cluster.local").expect("email"),
            user: "jdoe".to_string(),
            groups: groups.iter().map(|g| (*g).to_string()).collect(),
        }
    }

    async fn mount_review(server: &MockServer, verb: &str, allowed: bool) {
        Mock::given(method("POST"))
            .and(path(REVIEW_PATH))
            .and(header("authorization", "Bearer at-1"))
            .and(body_partial_json(json!({
                "kind": "SubjectAccessReview",
                "verb": verb
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"allowed": allowed})))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn email_uses_cluster_domain_for_plain_names() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(USER_PATH))
            .and(header("authorization", "Bearer at-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "metadata": {"name": "jdoe"},
                "groups": ["devs"]
            })))
            .mount(&server)
            .await;

        let identity = provider(&server.uri(), &[], "").email("at-1").await.expect("identity");
        assert_eq!(identity.email.to_string(), "jdoe@cluster.local");
        assert_eq!(identity.user, "jdoe");
        assert_eq!(identity.groups, vec!["devs".to_string()]);
    }

    #[tokio::test]
    async fn email_keeps_email_shaped_names() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(USER_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"metadata": {"name": "jane@corp.io"}})),
            )
            .mount(&server)
            .await;

        let identity = provider(&server.uri(), &[], "").email("at-1").await.expect("identity");
        assert_eq!(identity.email.to_string(), "jane@corp.io");
        assert_eq!(identity.user, "jane@corp.io");
    }

    #[tokio::test]
    async fn unauthorized_token_is_profile_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(USER_PATH))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = provider(&server.uri(), &[], "").email("at-1").await.expect_err("denied");
        assert!(matches!(err.current_context(), ProviderError::ProfileUnavailable { .. }));
    }

    #[tokio::test]
    async fn no_policy_allows_everyone() {
        let provider = provider("http://127.0.0.1:9", &[], "");
        assert!(provider.is_delegated());
        assert!(provider.authorize("at-1", &identity(&[])).await.expect("authorize"));
    }

    #[tokio::test]
    async fn groups_require_any_membership() {
        let provider = provider("http://127.0.0.1:9", &["admins", "ops"], "");
        assert!(provider.authorize("at-1", &identity(&["ops"])).await.expect("authorize"));
        assert!(!provider.authorize("at-1", &identity(&["devs"])).await.expect("authorize"));
        assert!(!provider.authorize("at-1", &identity(&[])).await.expect("authorize"));
    }

    #[tokio::test]
    async fn every_review_must_allow() {
        let server = MockServer::start().await;
        mount_review(&server, "get", true).await;
        mount_review(&server, "delete", false).await;

        let allowed = provider(&server.uri(), &[], r#"{"namespace":"apps","resource":"services","verb":"get"}"#);
        assert!(allowed.authorize("at-1", &identity(&[])).await.expect("authorize"));

        let denied = provider(
            &server.uri(),
            &[],
            r#"[{"namespace":"apps","verb":"get"},{"namespace":"apps","verb":"delete"}]"#,
        );
        assert!(!denied.authorize("at-1", &identity(&[])).await.expect("authorize"));
    }

    #[tokio::test]
    async fn review_error_is_authorize_failed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(REVIEW_PATH))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let provider = provider(&server.uri(), &[], r#"{"verb":"get"}"#);
        let err = provider
            .authorize("at-1", &identity(&[]))
            .await
            .expect_err("review failed");
        assert!(matches!(err.current_context(), ProviderError::AuthorizeFailed { .. }));
    }

    #[tokio::test]
    async fn validate_checks_user_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(USER_PATH))
            .and(header("authorization", "Bearer live"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"metadata": {"name": "x"}})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(USER_PATH))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let provider = provider(&server.uri(), &[], "");
        assert!(provider.validate("live").await);
        assert!(!provider.validate("dead").await);
    }

    #[tokio::test]
    async fn refresh_is_unsupported() {
        let provider = provider("http://127.0.0.1:9", &[], "");
        assert!(provider.refresh("rt").await.expect("refresh").is_none());
    }

    #[tokio::test]
    async fn delegated_paths_use_their_own_review() {
        let server = MockServer::start().await;
        mount_review(&server, "list", true).await;
        mount_review(&server, "delete", false).await;

        let provider = delegating(
            &server.uri(),
            &[],
            "",
            r#"{"/api": {"resource": "pods", "verb": "list"}, "/admin": {"verb": "delete"}}"#,
        );
        assert!(provider.delegates_path("/api/v1"));
        assert!(!provider.delegates_path("/static/app.js"));

        assert!(provider.authorize_path("at-1", "/api/v1").await.expect("review"));
        assert!(!provider.authorize_path("at-1", "/admin").await.expect("review"));
        assert!(!provider.authorize_path("at-1", "/static/app.js").await.expect("no review"));
    }

    #[tokio::test]
    async fn delegated_review_error_is_authorize_failed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(REVIEW_PATH))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let provider = delegating(&server.uri(), &[], "", r#"{"/": {"verb": "get"}}"#);
        let err = provider.authorize_path("at-1", "/x").await.expect_err("review failed");
        assert!(matches!(err.current_context(), ProviderError::AuthorizeFailed { .. }));
    }
}
