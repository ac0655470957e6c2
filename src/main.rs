// Main entry point for the photo-vault-server application.
// Loads configuration, builds the photo cache and its directory watcher,
// configures the Axum router, and starts the HTTP or HTTPS server.

mod auth_guard;
mod client_id;
mod error;
mod headers;
mod listeners;
mod photo_cache;
mod rate_limiter;
mod shutdown_signal;
mod throttle;
mod web;

use clap::Parser;
use photo_cache::{PhotoCache, REBUILD_DEBOUNCE, watch_directory};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tracing::Level;
use web::{AppState, WebConfig};

/// Command line arguments for photo-vault-server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct AppConfig {
    /// Hostname/IP to bind the server to.
    /// If this option is specified without value, it will default to "*", meaning the server will listen on all interfaces.
    #[arg(long, env = "PHOTO_VAULT_HOST", default_value = "localhost", num_args = 0..=1, default_missing_value = "*")]
    host: String,

    /// Port number to listen on.
    #[arg(short, long, env = "PORT", default_value_t = 3443)]
    port: u16,

    /// Directory holding the gallery images. Created when missing.
    #[arg(long, env = "PHOTO_VAULT_IMAGES_DIR", default_value = "images")]
    images_dir: PathBuf,

    /// Directory holding the gallery front-end, served for every other path.
    #[arg(long, env = "PHOTO_VAULT_PUBLIC_DIR", default_value = "public")]
    public_dir: PathBuf,

    /// Shared secret unlocking the admin panel.
    /// Without it every password verification fails.
    #[arg(long, env = "ADMIN_PASSWORD", hide_env_values = true)]
    admin_password: Option<String>,

    /// Identify clients by X-Forwarded-For / X-Real-IP.
    /// Only enable this behind a reverse proxy that sets these headers.
    /// The leftmost X-Forwarded-For entry is used; a proxy that appends to a
    /// client-supplied header lets clients pick their own identity, so the
    /// proxy must overwrite it.
    #[arg(long, env = "PHOTO_VAULT_TRUST_PROXY", action = clap::ArgAction::SetTrue)]
    trust_proxy: bool,

    /// PEM certificate chain. Together with --tls-key the server speaks HTTPS.
    #[arg(long, env = "PHOTO_VAULT_TLS_CERT", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// PEM private key for --tls-cert.
    #[arg(long, env = "PHOTO_VAULT_TLS_KEY", requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// Do not watch the images directory; the listing then only refreshes on startup and upload.
    #[arg(long, env = "PHOTO_VAULT_NO_WATCH", action = clap::ArgAction::SetTrue)]
    no_watch: bool,
}

#[tokio::main]
async fn main() {
    // A .env file next to the binary may provide ADMIN_PASSWORD and friends.
    let dotenv_result = dotenvy::dotenv();

    // Parse command line args and environment variables
    let config = AppConfig::parse();

    // Initialize tracing subscriber for structured logging.
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO) // Set to DEBUG to see pacing and cache details
        .with_target(true) // Include module path in logs
        .with_file(true) // Include source file name
        .with_line_number(true) // Include line numbers
        .init();

    tracing::info!("Starting photo-vault-server...");

    match dotenv_result {
        Ok(path) => tracing::info!("Loaded environment from {:?}", path),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!("Failed to load .env file: {}", e),
    }

    if let Err(e) = tokio::fs::create_dir_all(&config.images_dir).await {
        tracing::error!(
            "FATAL: Cannot create images directory {:?}: {}",
            config.images_dir,
            e
        );
        eprintln!("FATAL: Images directory unavailable. Error: {}. Exiting.", e);
        std::process::exit(1);
    }
    tracing::info!("Images directory set to: {:?}", config.images_dir);

    if config.admin_password.is_none() {
        tracing::warn!("ADMIN_PASSWORD is not set; admin verification will always fail.");
    }
    if config.trust_proxy {
        tracing::info!("Client addresses are taken from forwarding headers (trust proxy).");
    }

    // --- Initialize PhotoCache ---
    let photo_cache = Arc::new(PhotoCache::new(config.images_dir.clone()));
    photo_cache.rebuild().await;

    // Kept alive for the lifetime of the server; dropping it stops notifications.
    let _directory_watcher = if config.no_watch {
        tracing::info!("Directory watching disabled.");
        None
    } else {
        let (rebuild_queue, _worker) = photo_cache.spawn_rebuild_worker(REBUILD_DEBOUNCE);
        match watch_directory(&config.images_dir, rebuild_queue) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                tracing::warn!(
                    "Failed to watch images directory: {}. The listing will only refresh on upload.",
                    e
                );
                None
            }
        }
    };

    let state = Arc::new(AppState::new(
        photo_cache,
        config.admin_password.clone(),
        throttle::DOWNLOAD_RATE_BYTES_PER_SEC,
    ));
    tracing::info!(
        "Downloads limited to {} KiB/s, one every {}s per client.",
        throttle::DOWNLOAD_RATE_BYTES_PER_SEC / 1024,
        rate_limiter::DOWNLOAD_COOLDOWN.as_secs()
    );

    // --- Build Axum Application Router ---
    let app = web::create_app(
        state,
        &WebConfig {
            public_dir: config.public_dir.clone(),
            trust_proxy: config.trust_proxy,
        },
    );
    tracing::info!("Axum router configured.");

    // --- Load TLS material (optional) ---
    let tls_config = match (&config.tls_cert, &config.tls_key) {
        (Some(cert), Some(key)) => match listeners::load_tls_config(cert, key).await {
            Ok(tls) => Some(tls),
            Err(e) => {
                tracing::error!("FATAL: Failed to load TLS configuration: {}", e);
                eprintln!("FATAL: Could not load TLS configuration. Error: {}. Exiting.", e);
                std::process::exit(1);
            }
        },
        _ => {
            tracing::info!("No TLS certificate configured; serving plain HTTP.");
            None
        }
    };

    // --- Start HTTP(S) Server ---
    let listener = match listeners::create_listener(&config.host, config.port).await {
        Ok((addr, l)) => {
            tracing::info!("Server successfully bound. Listening on {}", addr);
            l
        }
        Err(e) => {
            tracing::error!("FATAL: Failed to bind server: {}", e);
            eprintln!("FATAL: Could not bind server. Error: {}. Exiting.", e);
            std::process::exit(1);
        }
    };

    // Run the server. Peer addresses are needed to identify clients.
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    let serve_result = match tls_config {
        Some(tls) => match listener.into_std() {
            Ok(std_listener) => {
                tracing::info!("Serving HTTPS.");
                let handle = axum_server::Handle::new();
                tokio::spawn(shutdown_signal::shutdown_handle(handle.clone()));
                axum_server::from_tcp_rustls(std_listener, tls)
                    .handle(handle)
                    .serve(make_service)
                    .await
            }
            Err(e) => Err(e),
        },
        None => {
            axum::serve(listener, make_service)
                .with_graceful_shutdown(shutdown_signal::shutdown_signal())
                .await
        }
    };

    if let Err(e) = serve_result {
        tracing::error!("Server run error: {}", e);
        eprintln!("ERROR: Server shut down unexpectedly. Error: {}", e);
    }

    tracing::info!("photo-vault-server has shut down.");
}
