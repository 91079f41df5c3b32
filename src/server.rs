//! Axum router construction and the retrieval handler.
//!
//! The [`app`] function wires the catch-all file route and `/metrics` and
//! returns a ready-to-serve [`axum::Router`].
//!
//! Every `GET` goes through [`handle_request`], which dispatches in order:
//!   1. status path (`/<secret>`)    -> backend status report, never cached
//!   2. cache hit                    -> stored response, no backend call
//!   3. `?from=where`                -> lookup race, JSON, never cached
//!   4. otherwise                    -> content race, cached in the background

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, Request, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::Utc;
use percent_encoding::percent_decode_str;
use std::collections::HashMap;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::cache::{cache_key, CachedResponse};
use crate::errors::{generate_request_id, EdgeError};
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::race::{race, RaceOutcome};
use crate::sources::{build_candidates, Selector};
use crate::status::build_report;
use crate::AppState;

/// Build the axum [`Router`].
pub fn app(state: Arc<AppState>) -> Router {
    let mut router: Router<Arc<AppState>> = Router::new();
    if state.config.observability.metrics {
        router = router.route("/metrics", get(metrics_handler));
    }

    router
        .route("/", get(handle_request))
        .route("/*path", get(handle_request))
        .with_state(state)
        // common_headers_middleware is innermost (adds x-request-id).
        .layer(middleware::from_fn(common_headers_middleware))
        // metrics_middleware captures the full request lifecycle.
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
}

// -- Common headers middleware -----------------------------------------------

/// Adds a 16-character uppercase hex `x-request-id` to every response.
async fn common_headers_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    if !headers.contains_key("x-request-id") {
        if let Ok(value) = HeaderValue::from_str(&generate_request_id()) {
            headers.insert("x-request-id", value);
        }
    }
    response
}

// -- Retrieval handler -------------------------------------------------------

/// `GET /*path` -- status report, cached response, lookup or content race.
async fn handle_request(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if is_status_path(&state, uri.path()) {
        info!("status report requested");
        let report = build_report(state.upstream.clone(), state.catalog.clone()).await;
        return (
            [(header::CONTENT_TYPE, "text/plain;charset=UTF-8")],
            report.render(),
        )
            .into_response();
    }

    let key = cache_key(&headers, &uri);
    if let Some(hit) = state.cache.lookup(&key).await {
        debug!("serving {} from cache", uri.path());
        return hit.into_response();
    }

    let selector = Selector::parse(query.get("from").map(String::as_str));
    let file = file_name(uri.path());

    let candidates = match build_candidates(&state.catalog, &file, &selector, Utc::now()) {
        Ok(candidates) => candidates,
        Err(e) => return e.into_response(),
    };

    match race(state.upstream.clone(), candidates, selector.mode()).await {
        RaceOutcome::Located(located) => {
            let report = located.report(&file);
            match serde_json::to_string_pretty(&report) {
                Ok(body) => (
                    [
                        (header::CONTENT_TYPE, "application/json"),
                        (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
                    ],
                    body,
                )
                    .into_response(),
                Err(e) => {
                    warn!("failed to encode lookup result: {}", e);
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                }
            }
        }
        RaceOutcome::Content(content) => {
            let mut headers = content.headers;
            headers.append(header::CACHE_CONTROL, state.cache.cache_control());
            let response = CachedResponse {
                status: content.status,
                headers,
                body: content.body,
            };
            state.cache.store_detached(key, response.clone());
            response.into_response()
        }
        RaceOutcome::AllFailed(failures) => {
            for failure in &failures {
                debug!("{}", failure);
            }
            EdgeError::AllBackendsFailed {
                file,
                selector,
                failures,
            }
            .into_response()
        }
    }
}

/// Constant-time match of `path` against `/<status secret>`.
fn is_status_path(state: &AppState, path: &str) -> bool {
    match state.config.status_secret() {
        Some(secret) => {
            let expected = format!("/{secret}");
            bool::from(path.as_bytes().ct_eq(expected.as_bytes()))
        }
        None => false,
    }
}

/// Last path segment, percent-decoded.
fn file_name(path: &str) -> String {
    let last = path.rsplit('/').next().unwrap_or_default();
    percent_decode_str(last).decode_utf8_lossy().into_owned()
}
