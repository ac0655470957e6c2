// API handlers for the web server

use super::{
    SharedState,
    extract_upload::store_uploaded_images,
    models::*,
};
use crate::{
    auth_guard::Verdict,
    client_id::ClientId,
    error::AppError,
    headers::ContentDisposition,
    rate_limiter::Admission,
    throttle::{CHUNK_SIZE, throttled_stream},
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State},
    response::{IntoResponse, Response},
};
use axum_extra::TypedHeader;
use headers::{ContentLength, ContentType};
use std::time::Instant;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};
use uuid::Uuid;

// --- GET /api/photos ---
// Returns the current cache snapshot
pub async fn list_photos(State(state): State<SharedState>) -> Json<PhotoListResponse> {
    let photos = state.photo_cache.list().to_vec();
    debug!("Returning {} photo(s).", photos.len());
    Json(PhotoListResponse { photos })
}

// --- GET /download/{filename} ---
// Streams a photo as an attachment, subject to the per-client cooldown and
// the bandwidth cap
pub async fn download_photo(
    State(state): State<SharedState>,
    client: ClientId,
    Path(filename): Path<String>,
) -> Result<Response, AppError> {
    // The cooldown is consumed before the file is looked up.
    if let Admission::Rejected { wait_secs } = state.rate_limiter.admit(client, Instant::now())? {
        info!(
            "Download of {:?} by {} rejected: cooldown, {}s left",
            filename, client, wait_secs
        );
        return Err(AppError::CooldownActive { wait_secs });
    }

    if !is_plain_file_name(&filename) || state.photo_cache.get(&filename).is_none() {
        debug!("Download of unknown photo {:?} by {}", filename, client);
        return Err(AppError::NotFound("File not found".to_string()));
    }

    // The snapshot may be stale; the open is authoritative.
    let path = state.photo_cache.images_dir().join(&filename);
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("Photo {:?} vanished before it could be opened", filename);
            return Err(AppError::NotFound("File not found".to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    let size = file.metadata().await?.len();

    let request_id = Uuid::new_v4();
    info!(
        "Download started: file={}, size={}, client={}, request_id={}, tracked_clients={}",
        filename,
        size,
        client,
        request_id,
        state.rate_limiter.tracked_clients()
    );

    let label = format!("{} [{}]", filename, request_id);
    let body = Body::from_stream(throttled_stream(
        file,
        state.download_rate,
        CHUNK_SIZE,
        label,
    ));

    // Headers are final once the first body byte goes out.
    Ok((
        TypedHeader(ContentLength(size)),
        TypedHeader(ContentType::octet_stream()),
        TypedHeader(ContentDisposition::attachment(filename)),
        body,
    )
        .into_response())
}

// --- POST /api/verify-password ---
// Checks the shared admin secret, with brute-force lockout per client
pub async fn verify_password(
    State(state): State<SharedState>,
    client: ClientId,
    Json(payload): Json<VerifyPasswordRequest>,
) -> Result<Json<VerifyPasswordResponse>, AppError> {
    let password_ok = password_matches(state.admin_password.as_deref(), &payload.password);

    match state
        .auth_guard
        .verify(client, password_ok, Instant::now())?
    {
        Verdict::Granted => {
            info!("Admin password verified for {}", client);
            Ok(Json(VerifyPasswordResponse { success: true }))
        }
        Verdict::Denied { fail_count } => {
            debug!("Wrong admin password from {} (failure #{})", client, fail_count);
            Ok(Json(VerifyPasswordResponse { success: false }))
        }
        Verdict::Banned { minutes_left } => {
            info!(
                "Password attempt from banned client {} ({} min left)",
                client, minutes_left
            );
            Err(AppError::Banned { minutes_left })
        }
    }
}

// --- POST /api/upload ---
// Stores image parts of the `photos` field and refreshes the cache before
// answering, so the caller's next listing already contains them.
// The cache is refreshed on failure too, so it matches the disk either way.
pub async fn upload_photos(
    State(state): State<SharedState>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let result = store_uploaded_images(multipart, state.photo_cache.images_dir()).await;
    state.photo_cache.rebuild().await;
    let stored = result?;

    Ok(Json(UploadResponse {
        success: true,
        uploaded: stored.len(),
    }))
}

// --- GET /health ---
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

// A single path component naming a file directly inside the image directory.
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}


// Without a configured secret nothing matches.
fn password_matches(expected: Option<&str>, provided: &str) -> bool {
    expected.is_some_and(|expected| provided.as_bytes().ct_eq(expected.as_bytes()).into())
}
