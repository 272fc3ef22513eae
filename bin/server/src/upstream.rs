//! Upstream routing and forwarding.
//!
//! Each configured upstream owns a path prefix. HTTP upstreams receive the
//! full request path; static upstreams have the prefix stripped before the
//! remainder is resolved under their root directory.

use axum::{
    body::{Body, HttpBody, to_bytes},
    extract::Request,
    http::{
        HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri,
        header::{self, AUTHORIZATION, HOST},
    },
    response::Response,
};
use base64::{Engine, engine::general_purpose::STANDARD};
use portcullis_session::Session;
use regex::Regex;
use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};
use tower::ServiceExt;
use tower_http::services::ServeDir;
use tracing::{debug, instrument};
use url::Url;

use crate::signature::{GAP_SIGNATURE, SignatureKey};

/// Header carrying the forwarded user name.
pub const X_FORWARDED_USER: &str = "x-forwarded-user";
/// Header carrying the forwarded email.
pub const X_FORWARDED_EMAIL: &str = "x-forwarded-email";
/// Header carrying the provider access token.
pub const X_FORWARDED_ACCESS_TOKEN: &str = "x-forwarded-access-token";

const GAP_AUTH: &str = "gap-auth";

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Errors from building routes or forwarding to them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    /// An upstream spec could not be parsed.
    InvalidSpec { spec: String, details: String },
    /// Two upstreams claim the same prefix.
    DuplicatePrefix { prefix: String },
    /// A skip-auth pattern is not a valid regex.
    InvalidPattern { pattern: String, details: String },
    /// No upstream serves the path.
    NoRoute { path: String },
    /// The upstream could not be reached or timed out.
    Unavailable { details: String },
    /// The request signing key is malformed.
    InvalidSignatureKey { details: String },
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSpec { spec, details } => {
                write!(f, "invalid upstream '{spec}': {details}")
            }
            Self::DuplicatePrefix { prefix } => {
                write!(f, "more than one upstream for prefix '{prefix}'")
            }
            Self::InvalidPattern { pattern, details } => {
                write!(f, "invalid skip-auth pattern '{pattern}': {details}")
            }
            Self::NoRoute { path } => write!(f, "no upstream for '{path}'"),
            Self::Unavailable { details } => write!(f, "upstream unavailable: {details}"),
            Self::InvalidSignatureKey { details } => write!(f, "invalid signature key: {details}"),
        }
    }
}

impl std::error::Error for UpstreamError {}

/// Where requests under a prefix are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamTarget {
    /// Proxied HTTP origin.
    Http { prefix: String, origin: Url },
    /// Directory served as static files.
    Static { prefix: String, root: PathBuf },
}

impl UpstreamTarget {
    /// Parses an upstream spec.
    ///
    /// `http(s)://host[:port][/prefix]` proxies to the origin and mounts it at
    /// the URL path. `file:///dir#/prefix` serves `dir` at the fragment.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSpec` for unparseable URLs or unsupported schemes.
    pub fn parse(spec: &str) -> Result<Self, UpstreamError> {
        let invalid = |details: &str| UpstreamError::InvalidSpec {
            spec: spec.to_string(),
            details: details.to_string(),
        };
        let url = Url::parse(spec).map_err(|e| invalid(&e.to_string()))?;

        match url.scheme() {
            "http" | "https" => {
                if url.host_str().is_none() {
                    return Err(invalid("missing host"));
                }
                let prefix = normalize_prefix(url.path());
                let mut origin = url;
                origin.set_path("/");
                origin.set_query(None);
                origin.set_fragment(None);
                Ok(Self::Http { prefix, origin })
            }
            "file" => {
                let root = url
                    .to_file_path()
                    .map_err(|()| invalid("not a local path"))?;
                let prefix = normalize_prefix(url.fragment().unwrap_or("/"));
                Ok(Self::Static { prefix, root })
            }
            other => Err(invalid(&format!("unsupported scheme '{other}'"))),
        }
    }

    /// Returns the path prefix this target is mounted at.
    #[must_use]
    pub fn prefix(&self) -> &str {
        match self {
            Self::Http { prefix, .. } | Self::Static { prefix, .. } => prefix,
        }
    }
}

fn normalize_prefix(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Segment-aware prefix match: `/api` matches `/api` and `/api/x`, not `/apix`.
fn matches_prefix(path: &str, prefix: &str) -> bool {
    if prefix == "/" {
        return path.starts_with('/');
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Maps request paths to upstream targets, longest prefix first.
#[derive(Debug, Clone, Default)]
pub struct UpstreamRouter {
    targets: Vec<UpstreamTarget>,
}

impl UpstreamRouter {
    /// Builds a router from upstream specs.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid spec or a prefix claimed twice.
    pub fn from_specs(specs: &[String]) -> Result<Self, UpstreamError> {
        let mut targets: Vec<UpstreamTarget> = Vec::with_capacity(specs.len());
        for spec in specs {
            let target = UpstreamTarget::parse(spec)?;
            if targets.iter().any(|t| t.prefix() == target.prefix()) {
                return Err(UpstreamError::DuplicatePrefix {
                    prefix: target.prefix().to_string(),
                });
            }
            debug!(prefix = target.prefix(), spec = %spec, "Mapped upstream");
            targets.push(target);
        }
        targets.sort_by(|a, b| b.prefix().len().cmp(&a.prefix().len()));
        Ok(Self { targets })
    }

    /// Returns the target with the longest prefix matching `path`.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Option<&UpstreamTarget> {
        self.targets.iter().find(|t| matches_prefix(path, t.prefix()))
    }

    /// Returns the configured targets, longest prefix first.
    #[must_use]
    pub fn targets(&self) -> &[UpstreamTarget] {
        &self.targets
    }
}

/// Requests that skip authentication entirely.
#[derive(Debug, Clone, Default)]
pub struct BypassRules {
    patterns: Vec<Regex>,
    preflight: bool,
}

impl BypassRules {
    /// Compiles the skip-auth patterns.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPattern` for the first pattern that fails to compile.
    pub fn new(patterns: &[String], preflight: bool) -> Result<Self, UpstreamError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| UpstreamError::InvalidPattern {
                    pattern: p.clone(),
                    details: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            patterns,
            preflight,
        })
    }

    /// Returns true if the request skips authentication.
    #[must_use]
    pub fn should_bypass(&self, path: &str, method: &Method) -> bool {
        if self.preflight && method == Method::OPTIONS {
            return true;
        }
        self.patterns.iter().any(|p| p.is_match(path))
    }
}

/// Which identity headers are sent upstream.
#[derive(Debug, Clone)]
pub struct ForwardOptions {
    /// Send `Authorization: Basic user:basic_auth_password` plus user headers.
    pub pass_basic_auth: bool,
    /// Password used in the basic-auth header.
    pub basic_auth_password: String,
    /// Send `X-Forwarded-User` and `X-Forwarded-Email`.
    pub pass_user_headers: bool,
    /// Send `X-Forwarded-Access-Token`.
    pub pass_access_token: bool,
    /// Keep the client's `Host` header.
    pub pass_host_header: bool,
    /// Time allowed until the upstream's response headers arrive.
    pub timeout: Duration,
    /// Sign HTTP upstream requests with `GAP-Signature`.
    pub signature_key: Option<SignatureKey>,
}

impl Default for ForwardOptions {
    fn default() -> Self {
        Self {
            pass_basic_auth: true,
            basic_auth_password: String::new(),
            pass_user_headers: true,
            pass_access_token: false,
            pass_host_header: true,
            timeout: Duration::from_secs(30),
            signature_key: None,
        }
    }
}

/// The authenticated identity attached to a forwarded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamIdentity {
    pub user: String,
    pub email: Option<String>,
    pub access_token: Option<String>,
}

impl UpstreamIdentity {
    /// The `GAP-Auth` value: the email, or the user when there is none.
    #[must_use]
    pub fn gap_auth(&self) -> &str {
        self.email.as_deref().unwrap_or(&self.user)
    }
}

impl From<&Session> for UpstreamIdentity {
    fn from(session: &Session) -> Self {
        Self {
            user: session.user().to_string(),
            email: session.email().map(ToString::to_string),
            access_token: session.access_token().map(str::to_string),
        }
    }
}

/// Forwards requests to the upstream their path resolves to.
#[derive(Debug, Clone)]
pub struct UpstreamProxy {
    router: UpstreamRouter,
    options: ForwardOptions,
    client: reqwest::Client,
}

impl UpstreamProxy {
    /// Creates a proxy over the given routes.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the HTTP client cannot be built.
    pub fn new(router: UpstreamRouter, options: ForwardOptions) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(options.timeout)
            .build()
            .map_err(|e| UpstreamError::Unavailable {
                details: e.to_string(),
            })?;
        Ok(Self {
            router,
            options,
            client,
        })
    }

    /// Returns the route table.
    #[must_use]
    pub fn router(&self) -> &UpstreamRouter {
        &self.router
    }

    /// Forwards a request, attaching identity headers when an identity is given.
    ///
    /// # Errors
    ///
    /// Returns `NoRoute` when no upstream serves the path, and `Unavailable`
    /// when an HTTP upstream fails or times out.
    #[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
    pub async fn forward(
        &self,
        request: Request,
        identity: Option<&UpstreamIdentity>,
    ) -> Result<Response, UpstreamError> {
        let path = request.uri().path().to_string();
        let target = self
            .router
            .resolve(&path)
            .ok_or(UpstreamError::NoRoute { path })?;

        let mut response = match target {
            UpstreamTarget::Http { origin, .. } => {
                self.forward_http(request, origin, identity).await?
            }
            UpstreamTarget::Static { prefix, root } => serve_static(request, prefix, root).await?,
        };

        if let Some(identity) = identity {
            if let Ok(value) = HeaderValue::from_str(identity.gap_auth()) {
                response
                    .headers_mut()
                    .insert(HeaderName::from_static(GAP_AUTH), value);
            }
        }
        Ok(response)
    }

    async fn forward_http(
        &self,
        request: Request,
        origin: &Url,
        identity: Option<&UpstreamIdentity>,
    ) -> Result<Response, UpstreamError> {
        let (parts, body) = request.into_parts();

        let mut url = origin.clone();
        url.set_path(parts.uri.path());
        url.set_query(parts.uri.query());

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        for name in [
            X_FORWARDED_USER,
            X_FORWARDED_EMAIL,
            X_FORWARDED_ACCESS_TOKEN,
            GAP_AUTH,
            GAP_SIGNATURE,
        ] {
            headers.remove(name);
        }
        if let Some(identity) = identity {
            self.inject_identity(&mut headers, identity);
        }

        if let Some(host) = headers.get(HOST).cloned() {
            headers
                .entry("x-forwarded-host")
                .or_insert(host);
        }
        headers
            .entry("x-forwarded-proto")
            .or_insert(HeaderValue::from_static("http"));
        if !self.options.pass_host_header {
            headers.remove(HOST);
        }

        let unavailable = |details: String| UpstreamError::Unavailable { details };
        let body = match &self.options.signature_key {
            Some(key) => {
                let bytes = to_bytes(body, usize::MAX)
                    .await
                    .map_err(|e| unavailable(format!("failed to read request body: {e}")))?;
                if let Some(identity) = identity {
                    set_header(&mut headers, HeaderName::from_static(GAP_AUTH), identity.gap_auth());
                }
                let signature = key.sign(&parts.method, &parts.uri, &headers, &bytes);
                set_header(&mut headers, HeaderName::from_static(GAP_SIGNATURE), &signature);
                (!bytes.is_empty()).then(|| reqwest::Body::from(bytes))
            }
            None => (body.size_hint().exact() != Some(0))
                .then(|| reqwest::Body::wrap_stream(body.into_data_stream())),
        };

        let mut upstream = self
            .client
            .request(parts.method, url)
            .headers(headers);
        if let Some(body) = body {
            upstream = upstream.body(body);
        }

        let upstream_response = tokio::time::timeout(self.options.timeout, upstream.send())
            .await
            .map_err(|_| unavailable("timed out waiting for response headers".to_string()))?
            .map_err(|e| unavailable(e.to_string()))?;

        let status = upstream_response.status();
        let mut response_headers = upstream_response.headers().clone();
        strip_hop_by_hop(&mut response_headers);

        let mut response = Response::new(Body::from_stream(upstream_response.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }

    fn inject_identity(&self, headers: &mut HeaderMap, identity: &UpstreamIdentity) {
        let options = &self.options;
        if options.pass_basic_auth {
            let credentials =
                STANDARD.encode(format!("{}:{}", identity.user, options.basic_auth_password));
            set_header(headers, AUTHORIZATION, &format!("Basic {credentials}"));
        }
        if options.pass_basic_auth || options.pass_user_headers {
            set_header(headers, HeaderName::from_static(X_FORWARDED_USER), &identity.user);
            if let Some(email) = &identity.email {
                set_header(headers, HeaderName::from_static(X_FORWARDED_EMAIL), email);
            }
        }
        if options.pass_access_token
            && let Some(token) = &identity.access_token
        {
            set_header(headers, HeaderName::from_static(X_FORWARDED_ACCESS_TOKEN), token);
        }
    }
}

fn set_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => debug!(header = %name, "Skipping identity header with invalid value"),
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in &listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

async fn serve_static(
    request: Request,
    prefix: &str,
    root: &Path,
) -> Result<Response, UpstreamError> {
    let (mut parts, body) = request.into_parts();
    let stripped = match parts.uri.path().strip_prefix(prefix) {
        Some(rest) if prefix != "/" => rest,
        _ => parts.uri.path(),
    };
    let stripped = if stripped.starts_with('/') {
        stripped.to_string()
    } else {
        format!("/{stripped}")
    };
    let path_and_query = match parts.uri.query() {
        Some(query) => format!("{stripped}?{query}"),
        None => stripped,
    };
    parts.uri = path_and_query
        .parse::<Uri>()
        .map_err(|e| UpstreamError::Unavailable {
            details: e.to_string(),
        })?;

    let request = Request::from_parts(parts, body);
    let response = match ServeDir::new(root).oneshot(request).await {
        Ok(response) => response.map(Body::new),
        Err(never) => match never {},
    };
    if response.status() == StatusCode::NOT_FOUND {
        debug!(root = %root.display(), "Static file not found");
    }
    Ok(response)
}
