//! Proxy endpoints: sign-in, OAuth start and callback, sign-out, auth checks,
//! and the authenticated fallback that forwards to upstreams.

use axum::{
    Form,
    extract::{Query, Request, State},
    http::{
        HeaderMap, HeaderName, HeaderValue, StatusCode,
        header::{HOST, LOCATION},
    },
    response::{Html, IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use oauth2::CsrfToken;
use portcullis_session::{CsrfState, Session};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::{AppState, SessionState};
use crate::error::ProxyError;
use crate::pages::{SignInView, sign_in_page as render_sign_in};
use crate::upstream::UpstreamIdentity;

const X_AUTH_REQUEST_USER: &str = "x-auth-request-user";
const X_AUTH_REQUEST_EMAIL: &str = "x-auth-request-email";

/// Placeholder origin redirect targets are resolved against.
const LOCAL_ORIGIN: &str = "http://portcullis.invalid/";

/// Query parameters carrying the post-sign-in redirect.
#[derive(Debug, Default, Deserialize)]
pub struct RedirectQuery {
    rd: Option<String>,
}

/// Query parameters for the OAuth callback.
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// Credentials posted by the htpasswd sign-in form.
#[derive(Debug, Deserialize)]
pub struct SignInForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    rd: Option<String>,
}

/// Returns `rd` if it is a local path, otherwise `/`.
///
/// A target is local when it starts with `/`, holds no whitespace or control
/// characters, and resolves to the same origin as the proxy. That excludes
/// `//host`, `/\host` and `/\t/host`, which browsers send elsewhere.
pub fn sanitize_redirect(rd: Option<&str>) -> String {
    match rd {
        Some(rd) if is_local_path(rd) => rd.to_string(),
        _ => "/".to_string(),
    }
}

fn is_local_path(rd: &str) -> bool {
    if !rd.starts_with('/') || rd.contains(|c: char| c.is_control() || c.is_whitespace()) {
        return false;
    }
    let Ok(base) = Url::parse(LOCAL_ORIGIN) else {
        return false;
    };
    base.join(rd).is_ok_and(|url| url.origin() == base.origin())
}

/// Liveness check.
pub async fn ping() -> &'static str {
    "OK"
}

/// Disallows all crawlers.
pub async fn robots() -> &'static str {
    "User-agent: *\nDisallow: /"
}

/// Shows the sign-in page, or goes straight to the provider when the page
/// has nothing to offer but the provider button.
pub async fn sign_in_page(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RedirectQuery>,
) -> Response {
    let redirect = sanitize_redirect(query.rd.as_deref());
    if state.skip_provider_button && !state.shows_htpasswd_form() {
        return found(&start_location(&state, &redirect));
    }
    sign_in_response(&state, redirect, StatusCode::OK, false)
}

/// Handles the htpasswd sign-in form.
pub async fn sign_in(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<SignInForm>,
) -> Result<Response, ProxyError> {
    let redirect = sanitize_redirect(form.rd.as_deref());
    if !state.validator.is_authorized_basic(&form.username, &form.password) {
        info!(user = %form.username, "Rejected htpasswd sign-in");
        return Ok(sign_in_response(&state, redirect, StatusCode::UNAUTHORIZED, true));
    }

    info!(user = %form.username, "Signed in with htpasswd credentials");
    let session = Session::new(form.username, None, state.cookies.expire);
    let value = state.codec.encode(&session)?;
    let jar = jar.add(state.cookies.session_cookie(value));
    Ok((jar, found(&redirect)).into_response())
}

fn sign_in_response(state: &AppState, redirect: String, status: StatusCode, failed: bool) -> Response {
    let page = render_sign_in(SignInView {
        provider_name: state.provider.name().to_string(),
        proxy_prefix: state.proxy_prefix.clone(),
        redirect,
        show_htpasswd_form: state.shows_htpasswd_form(),
        failed,
        sign_in_message: state.sign_in_message.clone(),
        footer: state.footer.clone(),
    });
    (status, Html(page)).into_response()
}

/// `302 Found` to `location`.
fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(LOCATION, location)]).into_response()
}

fn start_location(state: &AppState, redirect: &str) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("rd", redirect)
        .finish();
    format!("{}?{query}", state.endpoint("start"))
}

/// The callback URL registered with the provider.
///
/// Uses the configured redirect URL, or derives one from the request's
/// `Host` and `X-Forwarded-Proto` headers.
fn redirect_uri(state: &AppState, headers: &HeaderMap) -> Result<String, ProxyError> {
    if let Some(url) = &state.redirect_url {
        return Ok(url.to_string());
    }
    let host = headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ProxyError::bad_request("missing Host header"))?;
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|s| *s == "https" || *s == "http")
        .unwrap_or("http");
    Ok(format!("{scheme}://{host}{}", state.endpoint("callback")))
}

/// Starts the OAuth flow: stores CSRF state in a transient cookie and
/// redirects to the provider.
pub async fn start(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RedirectQuery>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<impl IntoResponse, ProxyError> {
    let redirect = sanitize_redirect(query.rd.as_deref());
    let redirect_uri = redirect_uri(&state, &headers)?;

    let nonce = CsrfToken::new_random().secret().clone();
    let authorize_url = state.provider.authorize_url(&nonce, &redirect_uri)?;
    let sealed = state.codec.seal_state(&CsrfState::new(nonce, redirect))?;

    debug!(%redirect_uri, "Redirecting to identity provider");
    let jar = jar.add(state.cookies.csrf_cookie(sealed));
    Ok((jar, found(authorize_url.as_str())))
}

/// Completes the OAuth flow.
///
/// The CSRF state cookie is cleared whatever the outcome, so a state value
/// is usable at most once.
pub async fn callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
    headers: HeaderMap,
    jar: CookieJar,
) -> impl IntoResponse {
    let result = complete_sign_in(&state, query, &headers, &jar).await;
    let jar = jar.add(state.cookies.clear_csrf());
    match result {
        Ok((session_cookie, redirect)) => {
            (jar.add(state.cookies.session_cookie(session_cookie)), found(&redirect)).into_response()
        }
        Err(err) => (jar, err).into_response(),
    }
}

/// Runs the callback checks in order: state, redeem, identity, local policy,
/// delegated authorization. Returns the encoded session and the redirect.
async fn complete_sign_in(
    state: &AppState,
    query: CallbackQuery,
    headers: &HeaderMap,
    jar: &CookieJar,
) -> Result<(String, String), ProxyError> {
    if let Some(error) = query.error {
        return Err(ProxyError::denied(format!("provider returned error '{error}'")));
    }

    let csrf = jar
        .get(&state.cookies.csrf_name)
        .ok_or_else(|| ProxyError::csrf("missing state cookie"))?;
    let stored = state
        .codec
        .open_state_at(csrf.value(), Utc::now())
        .map_err(|e| ProxyError::csrf(format!("state cookie rejected: {e}")))?;
    let presented = query.state.unwrap_or_default();
    if !stored.verify_nonce(&presented) {
        return Err(ProxyError::csrf("state parameter does not match state cookie"));
    }

    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ProxyError::bad_request("missing code"))?;
    let redirect_uri = redirect_uri(state, headers)?;

    let tokens = state.provider.redeem(&code, &redirect_uri).await?;
    let identity = state.provider.email(&tokens.access_token).await?;

    if !state.validator.is_authorized_email(&identity.email) {
        return Err(ProxyError::denied(format!(
            "{} is not in an allowed domain or email list",
            identity.email
        )));
    }
    if state.provider.is_delegated() {
        match state.provider.authorize(&tokens.access_token, &identity).await {
            Ok(true) => {}
            Ok(false) => {
                return Err(ProxyError::denied(format!(
                    "{} was denied by the provider",
                    identity.email
                )));
            }
            Err(err) => {
                warn!(email = %identity.email, error = %err, "Delegated authorization failed");
                return Err(ProxyError::denied(format!(
                    "delegated authorization for {} failed",
                    identity.email
                )));
            }
        }
    }

    info!(email = %identity.email, user = %identity.user, "Authenticated via OAuth2");
    let session = Session::with_tokens(
        identity.email,
        state.cookies.expire,
        tokens.access_token,
        tokens.refresh_token,
    )
    .with_user(identity.user);
    let value = state.codec.encode(&session)?;
    Ok((value, stored.redirect().to_string()))
}

/// Clears the session cookie.
pub async fn sign_out(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RedirectQuery>,
    jar: CookieJar,
) -> impl IntoResponse {
    let redirect = sanitize_redirect(query.rd.as_deref());
    (jar.add(state.cookies.clear_session()), found(&redirect))
}

/// Answers `auth_request` subrequests: 202 when authenticated, 401 otherwise.
pub async fn auth_check(
    State(state): State<Arc<AppState>>,
    auth: SessionState,
    jar: CookieJar,
) -> Response {
    let jar = auth.apply(jar, &state);
    let Some(session) = &auth.session else {
        let status = if auth.denied {
            StatusCode::FORBIDDEN
        } else {
            StatusCode::UNAUTHORIZED
        };
        return (jar, status).into_response();
    };

    let mut response = (jar, StatusCode::ACCEPTED).into_response();
    if state.set_xauthrequest {
        let headers = response.headers_mut();
        insert_header(headers, X_AUTH_REQUEST_USER, session.user());
        if let Some(email) = session.email() {
            insert_header(headers, X_AUTH_REQUEST_EMAIL, &email.to_string());
        }
    }
    response
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), value);
    }
}

/// Forwards authenticated requests upstream; sends everyone else to sign in.
pub async fn proxy(
    State(state): State<Arc<AppState>>,
    auth: SessionState,
    jar: CookieJar,
    request: Request,
) -> Response {
    let jar = auth.apply(jar, &state);
    if auth.denied {
        return (jar, ProxyError::denied("bearer token refused for delegated path")).into_response();
    }
    let Some(session) = &auth.session else {
        let original = request
            .uri()
            .path_and_query()
            .map_or("/", |pq| pq.as_str());
        let location = start_location(&state, &sanitize_redirect(Some(original)));
        return (jar, found(&location)).into_response();
    };

    let identity = UpstreamIdentity::from(session);
    match state.upstream.forward(request, Some(&identity)).await {
        Ok(response) => (jar, response).into_response(),
        Err(err) => (jar, ProxyError::from(err)).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_redirects_are_kept() {
        assert_eq!(sanitize_redirect(Some("/protected?x=1")), "/protected?x=1");
        assert_eq!(sanitize_redirect(Some("/")), "/");
    }

    #[test]
    fn foreign_redirects_become_root() {
        assert_eq!(sanitize_redirect(None), "/");
        assert_eq!(sanitize_redirect(Some("")), "/");
        assert_eq!(sanitize_redirect(Some("https://evil.example/")), "/");
        assert_eq!(sanitize_redirect(Some("//evil.example/")), "/");
        assert_eq!(sanitize_redirect(Some("/\\evil.example/")), "/");
        assert_eq!(sanitize_redirect(Some("relative/path")), "/");
    }

    #[test]
    fn whitespace_and_control_characters_become_root() {
        assert_eq!(sanitize_redirect(Some("/\t/evil.example")), "/");
        assert_eq!(sanitize_redirect(Some("/\n/evil.example")), "/");
        assert_eq!(sanitize_redirect(Some("/\r/evil.example")), "/");
        assert_eq!(sanitize_redirect(Some("/ /evil.example")), "/");
        assert_eq!(sanitize_redirect(Some("/app\u{0}")), "/");
        assert_eq!(sanitize_redirect(Some("/\u{3000}/evil.example")), "/");
    }

    #[test]
    fn encoded_separators_stay_local() {
        assert_eq!(sanitize_redirect(Some("/%2F%2Fevil.example")), "/%2F%2Fevil.example");
        assert_eq!(sanitize_redirect(Some("/search?q=a%20b#top")), "/search?q=a%20b#top");
    }
}
