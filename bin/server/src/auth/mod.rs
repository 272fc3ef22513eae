//! Authentication for the proxy.
//!
//! This module provides:
//! - The OAuth2 sign-in endpoints (`start`, `callback`, `sign_in`, `sign_out`)
//! - Session resolution from the session cookie, a Basic-Auth header, or a
//!   bearer token on a delegated path
//! - The shared, immutable application state built once at startup
//!
//! # Authorization Model
//!
//! Authorization is decided at sign-in: the email must pass the local
//! [`Validator`] and, for delegated providers, the provider's own group and
//! access review checks. Afterwards only the cookie's signature and expiry
//! are checked per request. With `cookie.refresh_seconds` set, sessions older
//! than the refresh period are revalidated against the provider, which bounds
//! how long a revoked token keeps working.
//!
//! Paths listed in `provider.delegate_urls` also accept an
//! `Authorization: Bearer` token without a cookie. Such requests are checked
//! every time: the token must resolve to a user the local policy allows, and
//! the access review for the path must answer `allowed`.

pub mod middleware;
pub mod routes;

use axum_extra::extract::cookie::{Cookie, SameSite};
use chrono::Duration;
use portcullis_access::{HtpasswdStore, Validator};
use portcullis_provider::{
    AccessReview, DelegateUrls, HttpTransport, Provider, ProviderDescriptor, ProviderKind,
    ServiceAccount, build_provider,
};
use portcullis_session::{STATE_LIFETIME_MINUTES, SessionCodec};
use rootcause::prelude::{Report, ResultExt};
use std::sync::Arc;
use time::Duration as TimeDuration;
use url::Url;

use crate::config::{ServerConfig, cookie_secret_bytes, read_secret};
use crate::error::StartupError;
use crate::signature::SignatureKey;
use crate::upstream::{BypassRules, ForwardOptions, UpstreamProxy, UpstreamRouter};

pub use middleware::{CookieUpdate, SessionState, bypass_auth};
pub use routes::{auth_check, callback, ping, proxy, robots, sign_in, sign_in_page, sign_out, start};

/// Suffix of the transient CSRF state cookie name.
const CSRF_COOKIE_SUFFIX: &str = "_csrf";

/// Session cookie attributes.
#[derive(Debug, Clone)]
pub struct CookieSettings {
    /// Session cookie name.
    pub name: String,
    /// CSRF state cookie name.
    pub csrf_name: String,
    pub domain: Option<String>,
    pub secure: bool,
    pub http_only: bool,
    /// Session lifetime.
    pub expire: Duration,
    /// Age after which a session is revalidated; `None` disables refresh.
    pub refresh: Option<Duration>,
}

impl CookieSettings {
    fn build(&self, name: &str, value: String, max_age: TimeDuration) -> Cookie<'static> {
        let mut cookie = Cookie::build((name.to_string(), value))
            .path("/")
            .http_only(self.http_only)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .max_age(max_age);
        if let Some(domain) = &self.domain {
            cookie = cookie.domain(domain.clone());
        }
        cookie.build()
    }

    /// Session cookie carrying an encoded session.
    pub fn session_cookie(&self, value: String) -> Cookie<'static> {
        self.build(
            &self.name,
            value,
            TimeDuration::seconds(self.expire.num_seconds()),
        )
    }

    /// Expired, empty session cookie.
    pub fn clear_session(&self) -> Cookie<'static> {
        self.build(&self.name, String::new(), TimeDuration::ZERO)
    }

    /// Transient cookie carrying sealed CSRF state.
    pub fn csrf_cookie(&self, value: String) -> Cookie<'static> {
        self.build(
            &self.csrf_name,
            value,
            TimeDuration::minutes(STATE_LIFETIME_MINUTES),
        )
    }

    /// Expired, empty CSRF state cookie.
    pub fn clear_csrf(&self) -> Cookie<'static> {
        self.build(&self.csrf_name, String::new(), TimeDuration::ZERO)
    }
}

/// Shared application state.
pub struct AppState {
    /// Identity provider.
    pub provider: Arc<dyn Provider>,
    /// Local authorization policy.
    pub validator: Validator,
    /// Cookie codec; signs both the session and the CSRF state cookie.
    pub codec: SessionCodec,
    pub cookies: CookieSettings,
    /// Upstream routes and forwarding.
    pub upstream: UpstreamProxy,
    /// Requests that skip authentication.
    pub bypass: BypassRules,
    /// Prefix of the proxy's own endpoints, without a trailing slash.
    pub proxy_prefix: String,
    /// Fixed OAuth callback URL; derived per request when unset.
    pub redirect_url: Option<Url>,
    pub display_htpasswd_form: bool,
    pub skip_provider_button: bool,
    pub set_xauthrequest: bool,
    pub request_logging: bool,
    /// Hint on the sign-in page naming the allowed email domains.
    pub sign_in_message: Option<String>,
    /// Page footer text; `None` hides the footer.
    pub footer: Option<String>,
}

impl AppState {
    /// Validates configuration and builds the runtime state.
    ///
    /// # Errors
    ///
    /// Returns an error for missing secrets, unreadable access files, an
    /// invalid provider setup, or invalid upstream specs and patterns.
    pub fn from_config(config: &ServerConfig) -> Result<Self, Report<StartupError>> {
        let cookies = cookie_settings(config)?;
        let secret = read_secret(
            config.cookie.secret.as_deref(),
            config.cookie.secret_file.as_deref(),
        )
        .context(StartupError::CookieSecret {
            details: "cookie.secret_file could not be read".to_string(),
        })?
        .ok_or_else(|| StartupError::CookieSecret {
            details: "cookie.secret or cookie.secret_file is required".to_string(),
        })?;
        let codec = SessionCodec::new(
            &cookies.name,
            &cookie_secret_bytes(&secret),
            config.cookie.encrypt,
        )
        .context(StartupError::Codec)?;

        let htpasswd = config
            .htpasswd_file
            .as_deref()
            .map(HtpasswdStore::from_file)
            .transpose()
            .context(StartupError::AccessFile)?;
        let validator = Validator::from_files(
            &config.email_domains,
            config.authenticated_emails_file.as_deref(),
            htpasswd,
        )
        .context(StartupError::AccessFile)?;
        if !validator.is_configured() {
            tracing::warn!("No email domains, email file or htpasswd file configured; every identity will be denied");
        }

        let provider = provider(config)?;

        if config.upstreams.is_empty() {
            return Err(StartupError::configuration("at least one upstream is required").into());
        }
        let router = UpstreamRouter::from_specs(&config.upstreams).context(StartupError::Upstream)?;
        let signature_key = config
            .signature_key
            .as_deref()
            .map(SignatureKey::parse)
            .transpose()
            .context(StartupError::Upstream)?;
        let options = ForwardOptions {
            pass_basic_auth: config.pass_basic_auth,
            basic_auth_password: config.basic_auth_password.clone().unwrap_or_default(),
            pass_user_headers: config.pass_user_headers,
            pass_access_token: config.pass_access_token,
            pass_host_header: config.pass_host_header,
            timeout: std::time::Duration::from_secs(config.upstream_timeout_seconds),
            signature_key,
        };
        let upstream = UpstreamProxy::new(router, options).context(StartupError::Upstream)?;
        let bypass = BypassRules::new(&config.skip_auth_regex, config.skip_auth_preflight)
            .context(StartupError::Upstream)?;

        let redirect_url = config
            .redirect_url
            .as_deref()
            .map(Url::parse)
            .transpose()
            .map_err(|e| StartupError::configuration(format!("invalid redirect_url: {e}")))?;

        Ok(Self {
            provider,
            validator,
            codec,
            cookies,
            upstream,
            bypass,
            proxy_prefix: normalize_proxy_prefix(&config.proxy_prefix),
            redirect_url,
            display_htpasswd_form: config.display_htpasswd_form,
            skip_provider_button: config.skip_provider_button,
            set_xauthrequest: config.set_xauthrequest,
            request_logging: config.request_logging,
            sign_in_message: sign_in_message(config),
            footer: footer(config),
        })
    }

    /// Path of a proxy endpoint, e.g. `endpoint("start")` is `/oauth/start`.
    #[must_use]
    pub fn endpoint(&self, name: &str) -> String {
        format!("{}/{name}", self.proxy_prefix)
    }

    /// Whether the sign-in page offers the htpasswd form.
    #[must_use]
    pub fn shows_htpasswd_form(&self) -> bool {
        self.display_htpasswd_form && self.validator.has_htpasswd()
    }
}

fn cookie_settings(config: &ServerConfig) -> Result<CookieSettings, StartupError> {
    let cookie = &config.cookie;
    let expire = seconds(cookie.expire_seconds)?;
    let refresh = match cookie.refresh_seconds {
        0 => None,
        secs => Some(seconds(secs)?),
    };
    if refresh.is_some_and(|refresh| refresh >= expire) {
        return Err(StartupError::configuration(format!(
            "cookie.refresh_seconds ({}) must be less than cookie.expire_seconds ({})",
            cookie.refresh_seconds, cookie.expire_seconds
        )));
    }
    Ok(CookieSettings {
        name: cookie.name.clone(),
        csrf_name: format!("{}{CSRF_COOKIE_SUFFIX}", cookie.name),
        domain: cookie.domain.clone(),
        secure: cookie.secure,
        http_only: cookie.httponly,
        expire,
        refresh,
    })
}

fn seconds(secs: u64) -> Result<Duration, StartupError> {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| StartupError::configuration(format!("duration of {secs}s is out of range")))
}

fn provider(config: &ServerConfig) -> Result<Arc<dyn Provider>, Report<StartupError>> {
    let settings = &config.provider;
    let account = settings
        .service_account
        .as_deref()
        .map(|name| ServiceAccount::load(&settings.service_account_dir, name))
        .transpose()
        .context(StartupError::Provider)?;

    let (client_id, client_secret) = match &account {
        Some(_) if settings.kind != ProviderKind::OpenShift => {
            return Err(StartupError::configuration(
                "provider.service_account requires the openshift provider",
            )
            .into());
        }
        Some(account) => (account.client_id(), account.client_secret().to_string()),
        None => {
            let secret = read_secret(
                settings.client_secret.as_deref(),
                settings.client_secret_file.as_deref(),
            )
            .context(StartupError::configuration("failed to read provider.client_secret_file"))?
            .ok_or_else(|| {
                StartupError::configuration(
                    "provider.client_secret, provider.client_secret_file or provider.service_account is required",
                )
            })?;
            (settings.client_id.clone(), secret)
        }
    };

    let mut builder = ProviderDescriptor::builder(settings.kind, client_id, client_secret)
        .approval_prompt(settings.approval_prompt.clone())
        .groups(settings.groups.clone());
    if let Some(url) = &settings.api_url {
        builder = builder.api_url(url.clone());
    }
    if let Some(url) = &settings.login_url {
        builder = builder.login_url(url.clone());
    }
    if let Some(url) = &settings.redeem_url {
        builder = builder.redeem_url(url.clone());
    }
    if let Some(url) = &settings.profile_url {
        builder = builder.profile_url(url.clone());
    }
    if let Some(url) = &settings.validate_url {
        builder = builder.validate_url(url.clone());
    }
    if let Some(url) = &settings.review_url {
        builder = builder.review_url(url.clone());
    }
    if let Some(scope) = &settings.scope {
        builder = builder.scope(scope.clone());
    }
    if let Some(reviews) = &settings.reviews {
        builder = builder.reviews(AccessReview::parse_list(reviews).context(StartupError::Provider)?);
    }
    if let Some(urls) = &settings.delegate_urls {
        builder = builder.delegate_urls(DelegateUrls::parse(urls).context(StartupError::Provider)?);
    }
    let descriptor = builder.build().context(StartupError::Provider)?;

    let mut ca_files = settings.ca_files.clone();
    if ca_files.is_empty()
        && let Some(ca) = account.as_ref().and_then(ServiceAccount::ca_file)
    {
        ca_files.push(ca.to_path_buf());
    }
    let transport = HttpTransport {
        timeout: std::time::Duration::from_secs(settings.timeout_seconds),
        ca_files,
        insecure_skip_verify: settings.insecure_skip_verify,
    };
    let provider = build_provider(&descriptor, &transport).context(StartupError::Provider)?;
    Ok(provider)
}

/// The domain hint shown when only email domains decide who may sign in.
fn sign_in_message(config: &ServerConfig) -> Option<String> {
    if config.authenticated_emails_file.is_some() {
        return None;
    }
    match config.email_domains.as_slice() {
        [] => None,
        [domain] if domain == "*" => None,
        [domain] => Some(format!("Authenticate using {domain}")),
        domains => Some(format!(
            "Authenticate using one of the following domains: {}",
            domains.join(", ")
        )),
    }
}

fn footer(config: &ServerConfig) -> Option<String> {
    match config.footer.as_deref() {
        Some("-") => None,
        Some(text) if !text.trim().is_empty() => Some(text.to_string()),
        _ => Some(format!("Secured with portcullis version {}", env!("CARGO_PKG_VERSION"))),
    }
}

fn normalize_proxy_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.starts_with('/') || trimmed.is_empty() {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}
