//! Centralized server configuration.
//!
//! Configuration is loaded via the `config` crate from an optional TOML
//! file (path in `PORTCULLIS_CONFIG`) overlaid with environment variables
//! prefixed `PORTCULLIS__`, using `__` between nested keys:
//!
//! ```text
//! PORTCULLIS__UPSTREAMS=http://127.0.0.1:8080/,file:///srv/static#/static
//! PORTCULLIS__COOKIE__SECRET_FILE=/etc/portcullis/cookie-secret
//! PORTCULLIS__PROVIDER__CLIENT_ID=proxy
//! ```
//!
//! List values in the environment are comma separated.

use base64::{
    Engine,
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD},
};
use portcullis_provider::{ProviderKind, SERVICE_ACCOUNT_DIR};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable naming the optional configuration file.
pub const CONFIG_FILE_ENV: &str = "PORTCULLIS_CONFIG";

const ENV_PREFIX: &str = "PORTCULLIS";

/// Decoded cookie secret lengths, matching AES-128, AES-192 and AES-256 keys.
const SECRET_KEY_LENGTHS: [usize; 3] = [16, 24, 32];

/// Keys split on commas when read from the environment.
const LIST_KEYS: &[&str] = &[
    "upstreams",
    "email_domains",
    "skip_auth_regex",
    "provider.groups",
    "provider.ca_files",
];

/// Top-level proxy configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address the proxy listens on.
    #[serde(default = "default_http_address")]
    pub http_address: String,

    /// Path prefix of the proxy's own endpoints.
    #[serde(default = "default_proxy_prefix")]
    pub proxy_prefix: String,

    /// Absolute callback URL registered with the provider. Derived from the
    /// request's `Host` header when unset.
    #[serde(default)]
    pub redirect_url: Option<String>,

    /// Upstream specs: `http(s)://host[:port][/prefix]` or `file:///dir#/prefix`.
    #[serde(default)]
    pub upstreams: Vec<String>,

    /// Upstream response header timeout in seconds.
    #[serde(default = "default_upstream_timeout_seconds")]
    pub upstream_timeout_seconds: u64,

    /// Path patterns that skip authentication entirely.
    #[serde(default)]
    pub skip_auth_regex: Vec<String>,

    /// Whether CORS preflight (`OPTIONS`) requests skip authentication.
    #[serde(default)]
    pub skip_auth_preflight: bool,

    /// Allowed email domains; `*` allows any.
    #[serde(default)]
    pub email_domains: Vec<String>,

    /// File of individually allowed emails, one per line.
    #[serde(default)]
    pub authenticated_emails_file: Option<PathBuf>,

    /// Htpasswd file for basic-auth and sign-in form credentials.
    #[serde(default)]
    pub htpasswd_file: Option<PathBuf>,

    /// Whether the sign-in page shows the htpasswd form.
    #[serde(default = "default_true")]
    pub display_htpasswd_form: bool,

    /// Skip the sign-in page and send users straight to the provider.
    #[serde(default)]
    pub skip_provider_button: bool,

    /// Send `Authorization: Basic user:basic_auth_password` upstream.
    #[serde(default = "default_true")]
    pub pass_basic_auth: bool,

    /// Password used in the upstream basic-auth header.
    #[serde(default)]
    pub basic_auth_password: Option<String>,

    /// Send `X-Forwarded-User` and `X-Forwarded-Email` upstream.
    #[serde(default = "default_true")]
    pub pass_user_headers: bool,

    /// Send `X-Forwarded-Access-Token` upstream.
    #[serde(default)]
    pub pass_access_token: bool,

    /// Keep the client's `Host` header when proxying.
    #[serde(default = "default_true")]
    pub pass_host_header: bool,

    /// Add `X-Auth-Request-User`/`-Email` to `/auth` responses.
    #[serde(default)]
    pub set_xauthrequest: bool,

    /// Log every request.
    #[serde(default = "default_true")]
    pub request_logging: bool,

    /// Sign forwarded requests with `GAP-Signature`, given as
    /// `algorithm:secret` (e.g. `sha256:...`).
    #[serde(default)]
    pub signature_key: Option<String>,

    /// Footer text for the proxy's pages; `-` hides the footer.
    #[serde(default)]
    pub footer: Option<String>,

    /// Session cookie configuration.
    #[serde(default)]
    pub cookie: CookieConfig,

    /// Identity provider configuration.
    #[serde(default)]
    pub provider: ProviderConfig,
}

/// Session cookie configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CookieConfig {
    /// Cookie name. The CSRF cookie is this name with `_csrf` appended.
    #[serde(default = "default_cookie_name")]
    pub name: String,

    /// Secret used to sign and encrypt cookies.
    ///
    /// A value that is standard or URL-safe base64 of 16, 24 or 32 bytes is
    /// decoded first; any other value is used as raw bytes.
    #[serde(default)]
    pub secret: Option<String>,

    /// File holding the cookie secret; used when `secret` is unset.
    #[serde(default)]
    pub secret_file: Option<PathBuf>,

    /// Cookie domain.
    #[serde(default)]
    pub domain: Option<String>,

    /// Session lifetime in seconds.
    #[serde(default = "default_cookie_expire_seconds")]
    pub expire_seconds: u64,

    /// Revalidate sessions older than this many seconds; 0 disables refresh.
    #[serde(default)]
    pub refresh_seconds: u64,

    /// Set the `Secure` attribute.
    #[serde(default = "default_true")]
    pub secure: bool,

    /// Set the `HttpOnly` attribute.
    #[serde(default = "default_true")]
    pub httponly: bool,

    /// Encrypt cookie contents as well as signing them.
    #[serde(default = "default_true")]
    pub encrypt: bool,
}

/// Identity provider configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Provider variant.
    #[serde(default = "default_provider_kind")]
    pub kind: ProviderKind,

    /// OAuth2 client id.
    #[serde(default)]
    pub client_id: String,

    /// OAuth2 client secret.
    #[serde(default)]
    pub client_secret: Option<String>,

    /// File holding the client secret; used when `client_secret` is unset.
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,

    /// OpenShift API address the default endpoints are derived from.
    #[serde(default)]
    pub api_url: Option<String>,

    #[serde(default)]
    pub login_url: Option<String>,

    #[serde(default)]
    pub redeem_url: Option<String>,

    #[serde(default)]
    pub profile_url: Option<String>,

    #[serde(default)]
    pub validate_url: Option<String>,

    #[serde(default)]
    pub review_url: Option<String>,

    /// Space-separated scopes; the provider default applies when unset.
    #[serde(default)]
    pub scope: Option<String>,

    #[serde(default = "default_approval_prompt")]
    pub approval_prompt: String,

    /// Groups of which users must belong to at least one (OpenShift).
    #[serde(default)]
    pub groups: Vec<String>,

    /// Subject access reviews as a JSON object or array (OpenShift).
    #[serde(default)]
    pub reviews: Option<String>,

    /// JSON object of path prefix to subject access review. Requests under a
    /// prefix may authenticate with their own bearer token (OpenShift).
    #[serde(default)]
    pub delegate_urls: Option<String>,

    /// Service account whose mounted token is used as the client
    /// credentials (OpenShift).
    #[serde(default)]
    pub service_account: Option<String>,

    /// Directory the service account is mounted at.
    #[serde(default = "default_service_account_dir")]
    pub service_account_dir: PathBuf,

    /// Extra CA bundles trusted for provider calls.
    #[serde(default)]
    pub ca_files: Vec<PathBuf>,

    /// Skip TLS verification of provider endpoints.
    #[serde(default)]
    pub insecure_skip_verify: bool,

    /// Timeout for each provider call in seconds.
    #[serde(default = "default_provider_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_http_address() -> String {
    "127.0.0.1:4180".to_string()
}

fn default_proxy_prefix() -> String {
    "/oauth".to_string()
}

fn default_upstream_timeout_seconds() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_cookie_name() -> String {
    "_oauth_proxy".to_string()
}

fn default_cookie_expire_seconds() -> u64 {
    168 * 60 * 60
}

fn default_provider_kind() -> ProviderKind {
    ProviderKind::OpenShift
}

fn default_approval_prompt() -> String {
    "force".to_string()
}

fn default_provider_timeout_seconds() -> u64 {
    30
}

fn default_service_account_dir() -> PathBuf {
    PathBuf::from(SERVICE_ACCOUNT_DIR)
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            name: default_cookie_name(),
            secret: None,
            secret_file: None,
            domain: None,
            expire_seconds: default_cookie_expire_seconds(),
            refresh_seconds: 0,
            secure: true,
            httponly: true,
            encrypt: true,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: default_provider_kind(),
            client_id: String::new(),
            client_secret: None,
            client_secret_file: None,
            api_url: None,
            login_url: None,
            redeem_url: None,
            profile_url: None,
            validate_url: None,
            review_url: None,
            scope: None,
            approval_prompt: default_approval_prompt(),
            groups: Vec::new(),
            reviews: None,
            delegate_urls: None,
            service_account: None,
            service_account_dir: default_service_account_dir(),
            ca_files: Vec::new(),
            insecure_skip_verify: false,
            timeout_seconds: default_provider_timeout_seconds(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_address: default_http_address(),
            proxy_prefix: default_proxy_prefix(),
            redirect_url: None,
            upstreams: Vec::new(),
            upstream_timeout_seconds: default_upstream_timeout_seconds(),
            skip_auth_regex: Vec::new(),
            skip_auth_preflight: false,
            email_domains: Vec::new(),
            authenticated_emails_file: None,
            htpasswd_file: None,
            display_htpasswd_form: true,
            skip_provider_button: false,
            pass_basic_auth: true,
            basic_auth_password: None,
            pass_user_headers: true,
            pass_access_token: false,
            pass_host_header: true,
            set_xauthrequest: false,
            request_logging: true,
            signature_key: None,
            footer: None,
            cookie: CookieConfig::default(),
            provider: ProviderConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from the optional file named by
    /// `PORTCULLIS_CONFIG` and the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a value is invalid.
    pub fn load() -> Result<Self, config::ConfigError> {
        let file = std::env::var_os(CONFIG_FILE_ENV).map(PathBuf::from);
        Self::from_sources(file.as_deref(), None)
    }

    /// Loads configuration from an optional file and an environment map.
    ///
    /// `env` replaces the process environment when given.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a value is invalid.
    pub fn from_sources(
        file: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(
                config::File::from(path.to_path_buf()).format(config::FileFormat::Toml),
            );
        }

        let mut environment = config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .list_separator(",")
            .try_parsing(true)
            .source(env);
        for key in LIST_KEYS {
            environment = environment.with_list_parse_key(key);
        }

        builder.add_source(environment).build()?.try_deserialize()
    }
}

/// Reads a secret given inline or in a file, trimming surrounding whitespace.
///
/// # Errors
///
/// Returns the I/O error if the file cannot be read.
pub fn read_secret(inline: Option<&str>, file: Option<&Path>) -> std::io::Result<Option<String>> {
    if let Some(secret) = inline.filter(|s| !s.is_empty()) {
        return Ok(Some(secret.to_string()));
    }
    match file {
        Some(path) => Ok(Some(std::fs::read_to_string(path)?.trim().to_string())),
        None => Ok(None),
    }
}

/// Returns the key bytes of a cookie secret.
///
/// Secrets that decode as base64 to an AES key length are decoded.
#[must_use]
pub fn cookie_secret_bytes(secret: &str) -> Vec<u8> {
    [STANDARD, URL_SAFE, STANDARD_NO_PAD, URL_SAFE_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(secret).ok())
        .filter(|bytes| SECRET_KEY_LENGTHS.contains(&bytes.len()))
        .unwrap_or_else(|| secret.as_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> config::Map<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = ServerConfig::from_sources(None, Some(env(&[]))).expect("config");
        assert_eq!(config.http_address, "127.0.0.1:4180");
        assert_eq!(config.proxy_prefix, "/oauth");
        assert_eq!(config.cookie.name, "_oauth_proxy");
        assert_eq!(config.cookie.expire_seconds, 604_800);
        assert_eq!(config.cookie.refresh_seconds, 0);
        assert!(config.cookie.secure);
        assert!(config.cookie.httponly);
        assert!(config.pass_basic_auth);
        assert!(config.pass_user_headers);
        assert!(config.pass_host_header);
        assert!(!config.pass_access_token);
        assert_eq!(config.provider.kind, ProviderKind::OpenShift);
        assert_eq!(config.provider.approval_prompt, "force");
        assert_eq!(config.provider.timeout_seconds, 30);
        assert_eq!(
            config.provider.service_account_dir,
            Path::new("/var/run/secrets/kubernetes.io/serviceaccount")
        );
        assert!(config.signature_key.is_none());
        assert!(config.footer.is_none());
    }

    #[test]
    fn environment_overrides_nested_keys_and_lists() {
        let config = ServerConfig::from_sources(
            None,
            Some(env(&[
                ("PORTCULLIS__HTTP_ADDRESS", "0.0.0.0:8080"),
                ("PORTCULLIS__UPSTREAMS", "http://127.0.0.1:3000/,http://127.0.0.1:3001/api"),
                ("PORTCULLIS__EMAIL_DOMAINS", "example.com"),
                ("PORTCULLIS__COOKIE__SECURE", "false"),
                ("PORTCULLIS__COOKIE__REFRESH_SECONDS", "3600"),
                ("PORTCULLIS__PROVIDER__KIND", "generic"),
                ("PORTCULLIS__PROVIDER__CLIENT_ID", "proxy"),
                ("UNRELATED", "ignored"),
            ])),
        )
        .expect("config");

        assert_eq!(config.http_address, "0.0.0.0:8080");
        assert_eq!(config.upstreams.len(), 2);
        assert_eq!(config.email_domains, vec!["example.com".to_string()]);
        assert!(!config.cookie.secure);
        assert_eq!(config.cookie.refresh_seconds, 3600);
        assert_eq!(config.provider.kind, ProviderKind::Generic);
        assert_eq!(config.provider.client_id, "proxy");
    }

    #[test]
    fn file_is_layered_under_environment() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            r#"
proxy_prefix = "/auth"
upstreams = ["http://127.0.0.1:9000/"]

[cookie]
name = "_portcullis"
secret = "from-file"

[provider]
kind = "openshift"
groups = ["admins", "ops"]
"#
        )
        .expect("write");

        let config = ServerConfig::from_sources(
            Some(file.path()),
            Some(env(&[("PORTCULLIS__COOKIE__SECRET", "from-env")])),
        )
        .expect("config");

        assert_eq!(config.proxy_prefix, "/auth");
        assert_eq!(config.cookie.name, "_portcullis");
        assert_eq!(config.cookie.secret.as_deref(), Some("from-env"));
        assert_eq!(config.provider.groups, vec!["admins".to_string(), "ops".to_string()]);
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = ServerConfig::from_sources(Some(Path::new("/nonexistent/portcullis.toml")), None);
        assert!(result.is_err());
    }

    #[test]
    fn secret_prefers_inline_value() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "  file-secret  ").expect("write");

        assert_eq!(
            read_secret(Some("inline"), Some(file.path())).expect("read"),
            Some("inline".to_string())
        );
        assert_eq!(
            read_secret(None, Some(file.path())).expect("read"),
            Some("file-secret".to_string())
        );
        assert_eq!(read_secret(Some(""), None).expect("read"), None);
    }

    #[test]
    fn base64_secrets_of_key_length_are_decoded() {
        let key: Vec<u8> = (0u8..32).collect();
        assert_eq!(cookie_secret_bytes(&STANDARD.encode(&key)), key);
        assert_eq!(cookie_secret_bytes(&URL_SAFE_NO_PAD.encode(&key[..24])), &key[..24]);
        assert_eq!(cookie_secret_bytes(&URL_SAFE.encode(&key[..16])), &key[..16]);
    }

    #[test]
    fn other_secrets_are_raw_bytes() {
        let passphrase = "correct horse battery staple";
        assert_eq!(cookie_secret_bytes(passphrase), passphrase.as_bytes());

        let short = STANDARD.encode([7u8; 10]);
        assert_eq!(cookie_secret_bytes(&short), short.as_bytes());
    }
}
