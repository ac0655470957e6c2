use super::{MAX_UPLOAD_SIZE_BYTES, SharedState, handlers};
use crate::client_id::ProxyTrust;
use axum::{
    Extension, Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use std::path::PathBuf;
use tower_http::{
    services::ServeDir,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::Level;

#[derive(Debug, Clone)]
pub struct WebConfig {
    // Gallery front-end (HTML, CSS, JS) served for every unmatched path
    pub public_dir: PathBuf,
    // Honor X-Forwarded-For / X-Real-IP when identifying clients
    pub trust_proxy: bool,
}

pub fn create_app(state: SharedState, config: &WebConfig) -> Router {
    // Thumbnails and modal previews load from here unthrottled; only
    // /download is metered.
    let images = ServeDir::new(state.photo_cache.images_dir());

    Router::new()
        .route("/download/{filename}", get(handlers::download_photo))
        .route("/api/photos", get(handlers::list_photos))
        .route("/api/verify-password", post(handlers::verify_password))
        .route(
            "/api/upload",
            post(handlers::upload_photos).layer(DefaultBodyLimit::max(MAX_UPLOAD_SIZE_BYTES)),
        )
        .route("/health", get(handlers::health))
        .nest_service("/images", images)
        .fallback_service(ServeDir::new(&config.public_dir))
        .layer(Extension(ProxyTrust(config.trust_proxy)))
        // Add tracing for HTTP requests and responses
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::new().level(Level::INFO)))
        // Provide the shared state
        .with_state(state)
}
