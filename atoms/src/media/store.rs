use async_trait::async_trait;
use std::time::Duration;

use super::model::{ImageRecord, PresignedUpload, UploadOptions};
use crate::AppError;

/// The "images" table.
#[async_trait]
pub trait ImageTable: Send + Sync {
    async fn insert(&self, record: &ImageRecord) -> Result<(), AppError>;

    /// Every record owned by `user_id`, newest `created_at` first.
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<ImageRecord>, AppError>;

    async fn get(&self, user_id: &str, id: &str) -> Result<Option<ImageRecord>, AppError>;

    async fn delete(&self, user_id: &str, id: &str) -> Result<(), AppError>;
}

/// The "images" bucket.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(&self, path: &str, bytes: Vec<u8>, options: UploadOptions) -> Result<(), AppError>;

    async fn remove(&self, path: &str) -> Result<(), AppError>;

    /// Public URL for `path`. Derived deterministically by the store.
    fn public_url(&self, path: &str) -> String;

    /// Storage path behind one of this store's public URLs.
    fn path_for_url(&self, url: &str) -> Option<String>;

    /// A request the client can send to store exactly `size` bytes at `path`
    /// without passing them through the API.
    async fn presign_upload(
        &self,
        path: &str,
        options: &UploadOptions,
        size: u64,
        expires_in: Duration,
    ) -> Result<PresignedUpload, AppError>;

    /// Size of the object at `path`, or `None` when nothing is stored there.
    async fn object_size(&self, path: &str) -> Result<Option<u64>, AppError>;
}

/// Loads an image URL into bytes for the drawing surface.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, AppError>;
}
