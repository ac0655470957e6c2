// Web server module
// Gallery API, throttled downloads and static file serving

mod app;
mod extract_upload;
mod handlers;
mod models;

pub use app::{WebConfig, create_app};

use crate::{auth_guard::AuthGuard, photo_cache::PhotoCache, rate_limiter::RateLimiter};
use std::sync::Arc;

// Maximum allowed size for upload requests
pub const MAX_UPLOAD_SIZE_BYTES: usize = 100 * 1024 * 1024; // 100MB

// Everything the handlers share. Each component owns its own state, so a
// fresh AppState is a fresh server as far as cooldowns and bans go.
pub struct AppState {
    pub photo_cache: Arc<PhotoCache>,
    pub rate_limiter: RateLimiter,
    pub auth_guard: AuthGuard,
    // None when no admin password is configured; every verification then fails.
    pub admin_password: Option<String>,
    // Bytes per second for /download
    pub download_rate: u64,
}

impl AppState {
    pub fn new(
        photo_cache: Arc<PhotoCache>,
        admin_password: Option<String>,
        download_rate: u64,
    ) -> Self {
        Self {
            photo_cache,
            rate_limiter: RateLimiter::default(),
            auth_guard: AuthGuard::default(),
            admin_password,
            download_rate,
        }
    }
}

pub type SharedState = Arc<AppState>;
