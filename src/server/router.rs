use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, header};
use axum::routing::{get, post};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::AppState;
use super::handlers::{chat, health, knowledge_base, upload};

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors_layer = build_cors_layer(&state.config.server.cors_origins);
    let body_limit = state.config.max_request_bytes();

    let api = Router::new()
        .route("/upload", post(upload::create_knowledge_base))
        .route("/kb", get(knowledge_base::list))
        .route("/kb/cleanup", post(knowledge_base::cleanup))
        .route(
            "/kb/:kb_id",
            get(knowledge_base::get)
                .put(knowledge_base::rename)
                .delete(knowledge_base::delete),
        )
        .route("/kb/:kb_id/files", post(upload::add_files))
        .route("/chat/:kb_id", post(chat::stream))
        .route("/chat/:kb_id/complete", post(chat::complete));

    Router::new()
        .route("/health", get(health::health))
        .route("/health/detailed", get(health::detailed))
        .nest("/api/v1", api)
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http())
}

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]);

    if origins.iter().any(|o| o.trim() == "*") {
        return layer.allow_origin(Any);
    }

    let allowed = origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin.trim()).ok())
        .collect::<Vec<_>>();
    layer.allow_origin(AllowOrigin::list(allowed))
}
