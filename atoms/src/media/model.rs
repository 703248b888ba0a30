use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bucket holding uploaded and annotated images.
pub const IMAGES_BUCKET: &str = "images";
/// `Cache-Control` max-age, in seconds, for every stored object.
pub const CACHE_CONTROL_SECONDS: &str = "3600";

/// Image record - one stored image, uploaded or annotated
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ImageRecord {
    pub id: String,
    pub user_id: String,
    /// Object-storage key, unique per user
    pub path: String,
    pub filename: String,
    /// Issued by the bucket from `path`, never edited by hand
    pub public_url: String,
    /// Set when this record is an annotated copy of another
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_image_id: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CreateImagePayload {
    pub user_id: String,
    pub path: String,
    pub filename: String,
    pub public_url: String,
    pub original_image_id: Option<String>,
}

/// Options for one object upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadOptions {
    pub content_type: Option<String>,
    pub cache_control: String,
    /// Overwrite an existing object at the same path
    pub upsert: bool,
}

impl UploadOptions {
    pub fn no_overwrite(content_type: Option<String>) -> Self {
        Self {
            content_type,
            cache_control: CACHE_CONTROL_SECONDS.to_string(),
            upsert: false,
        }
    }
}

/// A signed request that stores one object straight into the bucket.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct PresignedUpload {
    pub method: String,
    pub url: String,
    /// Headers the client must send unchanged
    pub headers: BTreeMap<String, String>,
    pub expires_in_seconds: u64,
}
