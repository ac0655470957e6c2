use axum::extract::Multipart;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::AppError;

// Multipart field carrying the uploaded images.
pub const UPLOAD_FIELD: &str = "photos";

// Prefix marking files that arrived through the upload endpoint.
pub const UPLOAD_PREFIX: &str = "UPLOAD_";

// Writes every image part of the `photos` field into `images_dir` and returns
// the stored file names. Parts that are not `image/*`, or that carry no usable
// file name, are skipped.
//
// An upload is all or nothing: when a later part fails, the files already
// stored for this request are removed again before the error is returned.
pub async fn store_uploaded_images(
    multipart: Multipart,
    images_dir: &Path,
) -> Result<Vec<String>, AppError> {
    let mut stored = Vec::new();
    match store_parts(multipart, images_dir, &mut stored).await {
        Ok(()) => Ok(stored),
        Err(e) => {
            warn!(
                "Upload failed after {} stored file(s), removing them: {}",
                stored.len(),
                e
            );
            for name in &stored {
                if let Err(remove_err) = tokio::fs::remove_file(images_dir.join(name)).await {
                    warn!("Failed to remove partial upload {}: {}", name, remove_err);
                }
            }
            Err(e)
        }
    }
}

async fn store_parts(
    mut multipart: Multipart,
    images_dir: &Path,
    stored: &mut Vec<String>,
) -> Result<(), AppError> {
    let mut ignored_fields = 0;

    while let Some(mut field) = multipart.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            let field_name = field.name().unwrap_or("unnamed").to_string();
            debug!("Ignoring multipart field: {}", field_name);
            ignored_fields += 1;
            continue;
        }

        let is_image = field
            .content_type()
            .and_then(|ct| ct.parse::<mime::Mime>().ok())
            .is_some_and(|ct| ct.type_() == mime::IMAGE);
        if !is_image {
            debug!(
                "Dropping non-image upload {:?} ({:?})",
                field.file_name(),
                field.content_type()
            );
            ignored_fields += 1;
            continue;
        }

        let Some(stored_name) = field.file_name().and_then(upload_file_name) else {
            debug!("Dropping upload without a usable file name");
            ignored_fields += 1;
            continue;
        };

        // Written under a hidden temporary name first so a half-written file
        // never shows up in the gallery.
        let final_path = images_dir.join(&stored_name);
        let partial_path = partial_path_for(images_dir, &stored_name);
        let mut file = tokio::fs::File::create(&partial_path).await?;
        let mut written = 0u64;

        let copy_result = async {
            while let Some(chunk) = field.chunk().await? {
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            Ok::<_, AppError>(())
        }
        .await;

        if let Err(e) = copy_result {
            drop(file);
            let _ = tokio::fs::remove_file(&partial_path).await;
            return Err(e);
        }
        drop(file);
        tokio::fs::rename(&partial_path, &final_path).await?;

        info!("Stored upload {} ({} bytes)", stored_name, written);
        stored.push(stored_name);
    }

    if ignored_fields > 0 {
        debug!("Ignored {} multipart part(s) in upload", ignored_fields);
    }

    Ok(())
}

// `UPLOAD_<basename>`; any directory components sent by the client are discarded.
pub fn upload_file_name(original: &str) -> Option<String> {
    let basename = original.rsplit(['/', '\\']).next()?.trim();
    if basename.is_empty() || basename == "." || basename == ".." || basename.contains('\0') {
        return None;
    }
    Some(format!("{}{}", UPLOAD_PREFIX, basename))
}

fn partial_path_for(images_dir: &Path, stored_name: &str) -> PathBuf {
    images_dir.join(format!(".{}.part", stored_name))
}
