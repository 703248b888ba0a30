use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use notedmark_atoms::media::{ImageFetcher, ObjectStore, PresignedUpload, UploadOptions};
use notedmark_atoms::AppError;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::backend_error;

/// Path-style base URL for a region.
pub fn default_public_base_url(region: &str) -> String {
    format!("https://s3.{}.amazonaws.com", region)
}

/// The images bucket on S3. Objects are keyed by their storage path and
/// published as `{public_base_url}/{bucket}/{path}`.
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
    public_base_url: String,
}

impl S3ObjectStore {
    pub fn new(client: S3Client, bucket: String, public_base_url: String) -> Self {
        Self {
            client,
            bucket,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Storage key behind one of this bucket's public URLs.
    pub fn key_for_url<'a>(&self, url: &'a str) -> Option<&'a str> {
        url.strip_prefix(self.public_base_url.as_str())?
            .strip_prefix('/')?
            .strip_prefix(self.bucket.as_str())?
            .strip_prefix('/')
            .filter(|key| !key.is_empty())
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn upload(&self, path: &str, bytes: Vec<u8>, options: UploadOptions) -> Result<(), AppError> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .body(ByteStream::from(bytes))
            .set_content_type(options.content_type)
            .cache_control(format!("max-age={}", options.cache_control));

        if !options.upsert {
            request = request.if_none_match("*");
        }

        request.send().await.map_err(backend_error)?;
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), AppError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(backend_error)?;
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.public_base_url, self.bucket, path)
    }

    fn path_for_url(&self, url: &str) -> Option<String> {
        self.key_for_url(url).map(str::to_string)
    }

    async fn presign_upload(
        &self,
        path: &str,
        options: &UploadOptions,
        size: u64,
        expires_in: Duration,
    ) -> Result<PresignedUpload, AppError> {
        let content_length = i64::try_from(size)
            .map_err(|_| AppError::validation(format!("Upload of {} bytes is too large", size)))?;
        let presigning = PresigningConfig::expires_in(expires_in)
            .map_err(|e| AppError::backend(format!("Invalid presign expiry: {}", e)))?;

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .content_length(content_length)
            .set_content_type(options.content_type.clone())
            .cache_control(format!("max-age={}", options.cache_control));
        if !options.upsert {
            request = request.if_none_match("*");
        }

        let presigned = request.presigned(presigning).await.map_err(backend_error)?;
        tracing::info!("Presigned upload: bucket={}, key={}, bytes={}", self.bucket, path, size);

        let mut headers: BTreeMap<String, String> = presigned
            .headers()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        if !headers.keys().any(|name| name.eq_ignore_ascii_case("content-length")) {
            headers.insert("Content-Length".to_string(), size.to_string());
        }

        Ok(PresignedUpload {
            method: presigned.method().to_string(),
            url: presigned.uri().to_string(),
            headers,
            expires_in_seconds: expires_in.as_secs(),
        })
    }

    async fn object_size(&self, path: &str) -> Result<Option<u64>, AppError> {
        match self.client.head_object().bucket(&self.bucket).key(path).send().await {
            Ok(head) => Ok(Some(head.content_length().unwrap_or_default().max(0) as u64)),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => Ok(None),
            Err(err) => Err(backend_error(err)),
        }
    }
}

#[async_trait]
impl ImageFetcher for S3ObjectStore {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, AppError> {
        let key = self
            .key_for_url(url)
            .ok_or_else(|| AppError::backend(format!("Not a URL of bucket {}: {}", self.bucket, url)))?;

        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(backend_error)?;

        let data = object
            .body
            .collect()
            .await
            .map_err(|e| AppError::backend(format!("Failed to read object {}: {}", key, e)))?;
        Ok(data.into_bytes().to_vec())
    }
}
