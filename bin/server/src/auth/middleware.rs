//! Session resolution and the skip-auth middleware.

use axum::{
    extract::{FromRef, FromRequestParts, Request, State},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use portcullis_session::{CookieDecodeError, Session};
use std::{convert::Infallible, sync::Arc};
use tracing::{debug, info, warn};

use super::AppState;
use crate::error::ProxyError;

/// What the response must do with the session cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieUpdate {
    /// Leave the cookie alone.
    Keep,
    /// Re-issue the cookie with this encoded value.
    Set(String),
    /// Remove the unusable cookie.
    Clear,
}

/// The session of the current request, if it has a usable one.
///
/// Resolution order: the session cookie, then an `Authorization: Basic`
/// header accepted by the htpasswd store, then an `Authorization: Bearer`
/// token on a path the provider delegates. Basic-Auth and bearer sessions
/// are synthetic and never written to a cookie.
#[derive(Debug)]
pub struct SessionState {
    pub session: Option<Session>,
    pub update: CookieUpdate,
    /// A bearer token was presented for a delegated path and refused.
    pub denied: bool,
}

/// Outcome of authenticating a bearer token on a delegated path.
enum Delegation {
    Allowed(Session),
    Denied,
    /// The token does not resolve to a user; treated as no credentials.
    Unauthenticated,
}

impl SessionState {
    /// Applies the cookie update to the response jar.
    #[must_use]
    pub fn apply(&self, jar: CookieJar, state: &AppState) -> CookieJar {
        match &self.update {
            CookieUpdate::Keep => jar,
            CookieUpdate::Set(value) => jar.add(state.cookies.session_cookie(value.clone())),
            CookieUpdate::Clear => jar.add(state.cookies.clear_session()),
        }
    }
}

impl<S> FromRequestParts<S> for SessionState
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = Arc::<AppState>::from_ref(state);
        let jar = CookieJar::from_headers(&parts.headers);
        let now = Utc::now();

        let mut update = CookieUpdate::Keep;
        if let Some(cookie) = jar.get(&app_state.cookies.name) {
            match resolve_cookie(&app_state, cookie.value(), now).await {
                Some((session, cookie_update)) => {
                    return Ok(Self {
                        session: Some(session),
                        update: cookie_update,
                        denied: false,
                    });
                }
                None => update = CookieUpdate::Clear,
            }
        }

        if let Some((user, password)) = basic_credentials(&parts.headers)
            && app_state.validator.is_authorized_basic(&user, &password)
        {
            debug!(%user, "Authenticated with htpasswd credentials");
            let session = Session::new(user, None, app_state.cookies.expire);
            return Ok(Self {
                session: Some(session),
                update,
                denied: false,
            });
        }

        if let Some(token) = bearer_token(&parts.headers)
            && app_state.provider.delegates_path(parts.uri.path())
        {
            let (session, denied) = match delegated_session(&app_state, &token, parts.uri.path()).await {
                Delegation::Allowed(session) => (Some(session), false),
                Delegation::Denied => (None, true),
                Delegation::Unauthenticated => (None, false),
            };
            return Ok(Self {
                session,
                update,
                denied,
            });
        }

        Ok(Self {
            session: None,
            update,
            denied: false,
        })
    }
}

/// Authenticates a bearer token for a delegated path.
///
/// The token's user must pass the local policy and the review configured
/// for the path. Every failure after the identity resolves is a denial.
async fn delegated_session(state: &AppState, token: &str, path: &str) -> Delegation {
    let identity = match state.provider.email(token).await {
        Ok(identity) => identity,
        Err(err) => {
            info!(error = %err, "Rejected bearer token");
            return Delegation::Unauthenticated;
        }
    };
    if !state.validator.is_authorized_email(&identity.email) {
        info!(email = %identity.email, "Bearer token user is not allowed by local policy");
        return Delegation::Denied;
    }

    match state.provider.authorize_path(token, path).await {
        Ok(true) => {
            debug!(user = %identity.user, path, "Authorized bearer token");
            let session = Session::with_tokens(
                identity.email,
                state.cookies.expire,
                token.to_string(),
                None,
            )
            .with_user(identity.user);
            Delegation::Allowed(session)
        }
        Ok(false) => {
            info!(user = %identity.user, path, "Bearer token denied by access review");
            Delegation::Denied
        }
        Err(err) => {
            warn!(user = %identity.user, path, error = %err, "Access review for bearer token failed");
            Delegation::Denied
        }
    }
}

/// Decodes the session cookie, revalidating it when it is due.
///
/// Returns `None` when the cookie cannot be used.
async fn resolve_cookie(
    state: &AppState,
    value: &str,
    now: DateTime<Utc>,
) -> Option<(Session, CookieUpdate)> {
    let (session, expired) = match state.codec.decode_at(value, now) {
        Ok(session) => (session, false),
        Err(CookieDecodeError::Expired) if state.cookies.refresh.is_some() => {
            (state.codec.open_session(value).ok()?, true)
        }
        Err(CookieDecodeError::SignatureInvalid) => {
            warn!("Rejected session cookie with invalid signature");
            return None;
        }
        Err(err) => {
            debug!(error = %err, "Ignoring unusable session cookie");
            return None;
        }
    };

    let due = state
        .cookies
        .refresh
        .is_some_and(|refresh| session.age_at(now) > refresh);
    if !expired && !due {
        return Some((session, CookieUpdate::Keep));
    }

    let session = revalidate(state, session, expired).await?;
    match state.codec.encode(&session) {
        Ok(encoded) => Some((session, CookieUpdate::Set(encoded))),
        Err(err) => {
            warn!(error = %err, "Failed to re-issue session cookie");
            Some((session, CookieUpdate::Keep))
        }
    }
}

/// Confirms a session with the provider and restarts its lifetime.
///
/// A refresh token is tried first, then the access token's liveness.
async fn revalidate(state: &AppState, mut session: Session, expired: bool) -> Option<Session> {
    let expire = state.cookies.expire;

    if let Some(refresh_token) = session.refresh_token() {
        match state.provider.refresh(refresh_token).await {
            Ok(Some(tokens)) => {
                debug!(user = session.user(), "Refreshed session tokens");
                session.refresh(tokens.access_token, tokens.refresh_token, expire);
                return Some(session);
            }
            Ok(None) => {}
            Err(err) => {
                info!(user = session.user(), error = %err, "Session refresh failed");
                return None;
            }
        }
    }

    match session.access_token() {
        Some(access_token) => {
            if state.provider.validate(access_token).await {
                session.renew(expire);
                Some(session)
            } else {
                info!(user = session.user(), "Session token no longer valid");
                None
            }
        }
        // htpasswd sessions carry no token; they renew on age but end at expiry.
        None if !expired => {
            session.renew(expire);
            Some(session)
        }
        None => None,
    }
}

/// Extracts `user:password` from an `Authorization: Basic` header.
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

/// Extracts the token from an `Authorization: Bearer` header.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_string())
}

/// Forwards requests matching a skip-auth rule without authenticating them.
///
/// `/ping` and `/robots.txt` are always answered by the proxy itself.
pub async fn bypass_auth(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if path == "/ping" || path == "/robots.txt" {
        return next.run(request).await;
    }
    if !state.bypass.should_bypass(path, request.method()) {
        return next.run(request).await;
    }

    debug!(path, "Skipping authentication");
    match state.upstream.forward(request, None).await {
        Ok(response) => response,
        Err(err) => ProxyError::from(err).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(authorization: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(authorization).expect("header"));
        headers
    }

    #[test]
    fn parses_basic_credentials() {
        let encoded = STANDARD.encode("alice:pa:ss");
        assert_eq!(
            basic_credentials(&headers(&format!("Basic {encoded}"))),
            Some(("alice".to_string(), "pa:ss".to_string()))
        );
        assert_eq!(
            basic_credentials(&headers(&format!("basic {encoded}"))),
            Some(("alice".to_string(), "pa:ss".to_string()))
        );
    }

    #[test]
    fn rejects_other_authorization_schemes() {
        assert_eq!(basic_credentials(&headers("Bearer abc")), None);
        assert_eq!(basic_credentials(&headers("Basic !!!")), None);
        let no_colon = STANDARD.encode("alice");
        assert_eq!(basic_credentials(&headers(&format!("Basic {no_colon}"))), None);
        assert_eq!(basic_credentials(&HeaderMap::new()), None);
    }

    #[test]
    fn parses_bearer_tokens() {
        assert_eq!(bearer_token(&headers("Bearer sha256~abc")), Some("sha256~abc".to_string()));
        assert_eq!(bearer_token(&headers("bearer  tok ")), Some("tok".to_string()));
        assert_eq!(bearer_token(&headers("Bearer ")), None);
        assert_eq!(bearer_token(&headers("Basic YWxpY2U6cHc=")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }
}
