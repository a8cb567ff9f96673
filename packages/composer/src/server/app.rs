//! Application setup and router wiring.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{header::CONTENT_TYPE, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::kernel::deps::ComposerDeps;
use crate::server::routes::{
    create_compose, get_compose_logs, get_compose_manifests, get_compose_metadata,
    get_compose_status, get_error, get_openapi, list_errors, API_PREFIX,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub deps: Arc<ComposerDeps>,
}

/// Build the Axum application router
pub fn build_app(deps: Arc<ComposerDeps>) -> Router {
    let state = AppState { deps };

    let api = Router::new()
        .route("/compose", post(create_compose))
        .route("/composes/:id", get(get_compose_status))
        .route("/composes/:id/metadata", get(get_compose_metadata))
        .route("/composes/:id/logs", get(get_compose_logs))
        .route("/composes/:id/manifests", get(get_compose_manifests))
        .route("/errors", get(list_errors))
        .route("/errors/:id", get(get_error))
        .route("/openapi", get(get_openapi));

    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE]);

    Router::new()
        .nest(API_PREFIX, api)
        .layer(Extension(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
