// Request and response bodies of the JSON API.

use crate::photo_cache::PhotoRecord;
use serde::{Deserialize, Serialize};

// Body of POST /api/verify-password.
#[derive(Deserialize, Debug)]
pub struct VerifyPasswordRequest {
    // A missing field counts as a wrong password.
    #[serde(default)]
    pub password: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct VerifyPasswordResponse {
    pub success: bool,
}

// GET /api/photos
#[derive(Serialize, Debug)]
pub struct PhotoListResponse {
    pub photos: Vec<PhotoRecord>,
}

// POST /api/upload
#[derive(Serialize, Debug)]
pub struct UploadResponse {
    pub success: bool,
    // Number of image parts stored; non-image parts are dropped silently.
    pub uploaded: usize,
}

#[derive(Serialize, Debug)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}
