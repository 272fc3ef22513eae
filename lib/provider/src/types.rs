//! Identity and token types shared by all providers.

use portcullis_core::EmailAddress;
use rootcause::prelude::{Report, ResultExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ProviderError;

/// The provider variants the proxy can talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// A plain OAuth2 provider with a JSON profile endpoint.
    Generic,
    /// An OpenShift cluster OAuth server with delegated authorization.
    OpenShift,
}

impl ProviderKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::OpenShift => "openshift",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "generic" | "oauth2" => Ok(Self::Generic),
            "openshift" => Ok(Self::OpenShift),
            other => Err(ProviderError::configuration(format!(
                "unknown provider '{other}'"
            ))),
        }
    }
}

/// Tokens issued by a successful code redemption or refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tokens {
    /// The access token. Never empty.
    pub access_token: String,
    /// The refresh token, when the provider issues one.
    pub refresh_token: Option<String>,
}

/// An identity resolved from an access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// The email the validator authorizes.
    pub email: EmailAddress,
    /// The user name forwarded upstream.
    pub user: String,
    /// Groups the provider reports for the user.
    pub groups: Vec<String>,
}

impl Identity {
    /// Creates an identity whose user name is the email's local part.
    #[must_use]
    pub fn from_email(email: EmailAddress) -> Self {
        Self {
            user: email.local_part().to_string(),
            email,
            groups: Vec::new(),
        }
    }
}

/// One subject access review checked for every sign-in.
///
/// The review is the attribute object of an OpenShift
/// `SubjectAccessReview` (`namespace`, `verb`, `resource`, ...). It is sent
/// with the signing-in user's token, so the API answers for that user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessReview(Map<String, JsonValue>);

impl AccessReview {
    /// Parses a review from a JSON object.
    ///
    /// # Errors
    ///
    /// Returns a configuration error unless the input is a JSON object.
    pub fn parse(json: &str) -> Result<Self, Report<ProviderError>> {
        let review = serde_json::from_str(json)
            .context(ProviderError::configuration("invalid access review"))?;
        Ok(review)
    }

    /// Parses a single review object or a JSON array of them.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the input is neither.
    pub fn parse_list(json: &str) -> Result<Vec<Self>, Report<ProviderError>> {
        let json = json.trim();
        if json.is_empty() {
            return Ok(Vec::new());
        }
        if json.starts_with('[') {
            let reviews = serde_json::from_str(json)
                .context(ProviderError::configuration("invalid access reviews"))?;
            Ok(reviews)
        } else {
            Self::parse(json).map(|review| vec![review])
        }
    }

    /// Returns the attributes of the review.
    #[must_use]
    pub fn attributes(&self) -> &Map<String, JsonValue> {
        &self.0
    }

    /// Builds the request body for the review API.
    pub(crate) fn to_request(&self) -> JsonValue {
        let mut body = self.0.clone();
        body.insert(
            "kind".to_string(),
            JsonValue::String("SubjectAccessReview".to_string()),
        );
        body.insert(
            "apiVersion".to_string(),
            JsonValue::String("authorization.openshift.io/v1".to_string()),
        );
        JsonValue::Object(body)
    }
}

/// Path prefixes whose requests may authenticate with their own bearer token.
///
/// Each prefix maps to the review the token's user must pass. A path is
/// governed by the longest prefix that matches it on a segment boundary, so
/// `/api` covers `/api` and `/api/v1` but not `/apis`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DelegateUrls(Vec<(String, AccessReview)>);

impl DelegateUrls {
    /// Parses a JSON object of path prefix to review attributes.
    ///
    /// An empty string yields no delegated paths.
    ///
    /// # Errors
    ///
    /// Returns a configuration error unless the input is a JSON object whose
    /// values are objects.
    pub fn parse(json: &str) -> Result<Self, Report<ProviderError>> {
        let json = json.trim();
        if json.is_empty() {
            return Ok(Self::default());
        }
        let map: BTreeMap<String, AccessReview> = serde_json::from_str(json)
            .context(ProviderError::configuration("invalid delegate URLs"))?;

        let mut entries: Vec<(String, AccessReview)> = map
            .into_iter()
            .map(|(prefix, review)| (normalize_prefix(&prefix), review))
            .collect();
        entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Ok(Self(entries))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the review governing `path`, if any prefix covers it.
    #[must_use]
    pub fn review_for(&self, path: &str) -> Option<&AccessReview> {
        self.0
            .iter()
            .find(|(prefix, _)| covers(prefix, path))
            .map(|(_, review)| review)
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn covers(prefix: &str, path: &str) -> bool {
    prefix == "/"
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn provider_kind_parses_case_insensitively() {
        assert_eq!("OpenShift".parse::<ProviderKind>(), Ok(ProviderKind::OpenShift));
        assert_eq!("generic".parse::<ProviderKind>(), Ok(ProviderKind::Generic));
        assert!("github".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn identity_user_is_local_part() {
        let identity = Identity::from_email(EmailAddress::parse("jane@corp.io").expect("email"));
        assert_eq!(identity.user, "jane");
        assert!(identity.groups.is_empty());
    }

    #[test]
    fn review_list_accepts_object_or_array() {
        let single = AccessReview::parse_list(r#"{"namespace":"apps","verb":"get"}"#)
            .expect("single");
        assert_eq!(single.len(), 1);

        let many = AccessReview::parse_list(
            r#"[{"namespace":"apps","verb":"get"},{"resource":"pods","verb":"list"}]"#,
        )
        .expect("array");
        assert_eq!(many.len(), 2);

        assert!(AccessReview::parse_list("").expect("empty").is_empty());
        assert!(AccessReview::parse_list("\"verb\"").is_err());
    }

    #[test]
    fn review_request_carries_kind_and_version() {
        let review = AccessReview::parse(r#"{"namespace":"apps","verb":"get"}"#).expect("review");
        let body = review.to_request();
        assert_eq!(body["kind"], json!("SubjectAccessReview"));
        assert_eq!(body["apiVersion"], json!("authorization.openshift.io/v1"));
        assert_eq!(body["namespace"], json!("apps"));
    }

    #[test]
    fn delegate_urls_pick_longest_segment_prefix() {
        let urls = DelegateUrls::parse(
            r#"{"/": {"resource": "services", "verb": "get"},
                "/api/": {"resource": "pods", "verb": "list"},
                "metrics": {"resource": "nodes", "verb": "get"}}"#,
        )
        .expect("delegate urls");

        let resource = |path: &str| {
            urls.review_for(path)
                .and_then(|review| review.attributes().get("resource"))
                .cloned()
        };
        assert_eq!(resource("/api"), Some(json!("pods")));
        assert_eq!(resource("/api/v1/things"), Some(json!("pods")));
        assert_eq!(resource("/apis"), Some(json!("services")));
        assert_eq!(resource("/metrics/cpu"), Some(json!("nodes")));
        assert_eq!(resource("/"), Some(json!("services")));
    }

    #[test]
    fn delegate_urls_without_root_leave_other_paths_alone() {
        let urls = DelegateUrls::parse(r#"{"/api": {"verb": "get"}}"#).expect("delegate urls");
        assert!(urls.review_for("/api/x").is_some());
        assert!(urls.review_for("/app").is_none());

        assert!(DelegateUrls::parse("").expect("empty").is_empty());
        assert!(DelegateUrls::parse(r#"["/api"]"#).is_err());
    }
}
