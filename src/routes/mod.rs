//! Router assembly: common routes, generated entity routes under the prefix, and transport layers.

mod common;
mod entity;

pub use common::common_routes;
pub use entity::entity_routes;

use crate::handlers::entity::not_found;
use crate::state::AppState;
use axum::http::{HeaderValue, Method};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    if origins.is_empty() {
        return None;
    }
    if origins.iter().any(|o| o == "*") {
        return Some(CorsLayer::permissive());
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|s| {
            let parsed = s.parse();
            if parsed.is_err() {
                tracing::warn!(origin = %s, "ignoring invalid CORS origin");
            }
            parsed.ok()
        })
        .collect();
    Some(
        CorsLayer::new()
            .allow_origin(allowed)
            .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::PUT, Method::DELETE])
            .allow_headers(Any),
    )
}

/// The full application router.
pub fn app(state: AppState) -> Router {
    let settings = state.settings.clone();
    let prefix = settings.normalized_prefix();
    let api = entity_routes(state.clone());
    let mut app = common_routes(state);
    app = if prefix.is_empty() {
        app.merge(api)
    } else {
        app.nest(prefix, api)
    };
    let mut app = app.fallback(not_found).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(RequestBodyLimitLayer::new(settings.body_limit_bytes))
            .layer(TimeoutLayer::new(settings.request_timeout())),
    );
    if let Some(cors) = cors_layer(&settings.cors_origins) {
        app = app.layer(cors);
    }
    app
}
