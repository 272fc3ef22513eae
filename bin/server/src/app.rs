//! Router assembly.

use axum::{
    Router, middleware,
    routing::get,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::auth::{self, AppState};

/// Builds the proxy's router.
///
/// Skip-auth rules run before routing; every path not claimed by a proxy
/// endpoint falls through to the authenticated upstream proxy.
pub fn router(state: Arc<AppState>) -> Router {
    let router = Router::new()
        .route("/ping", get(auth::ping))
        .route("/robots.txt", get(auth::robots))
        .route(
            &state.endpoint("sign_in"),
            get(auth::sign_in_page).post(auth::sign_in),
        )
        .route(&state.endpoint("start"), get(auth::start))
        .route(&state.endpoint("callback"), get(auth::callback))
        .route(&state.endpoint("sign_out"), get(auth::sign_out))
        .route(&state.endpoint("auth"), get(auth::auth_check))
        .fallback(auth::proxy)
        .layer(middleware::from_fn_with_state(state.clone(), auth::bypass_auth));

    let router = if state.request_logging {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    };
    router.with_state(state)
}
