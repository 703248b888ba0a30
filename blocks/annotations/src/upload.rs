use lambda_http::{http::StatusCode, Body, Error, Response};
use notedmark_atoms::media::{self, ImageRecord, ImageTable, ObjectStore, PresignedUpload, UploadOptions};
use notedmark_atoms::respond::json_response;
use notedmark_atoms::users::Identity;
use notedmark_atoms::AppError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::notice::{failure_response, success_response, Notice};

/// Largest accepted upload: 50 MiB.
pub const MAX_UPLOAD_BYTES: usize = 52_428_800;

/// How long a presigned upload stays usable.
pub const UPLOAD_URL_TTL: Duration = Duration::from_secs(15 * 60);

/// A local file picked for upload.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// A file the client will send straight to the bucket.
#[derive(Debug, Clone, Deserialize)]
pub struct InitiateUploadRequest {
    pub filename: String,
    pub content_type: String,
    pub size: u64,
}

/// Where and how to send the file, plus the path to hand back on completion.
#[derive(Debug, Clone, Serialize)]
pub struct UploadTicket {
    pub path: String,
    pub filename: String,
    pub upload: PresignedUpload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompleteUploadRequest {
    pub path: String,
    pub filename: String,
}

/// Type and size checks on what the client declares, before any network call.
pub fn validate_declared(content_type: &str, size: u64) -> Result<(), AppError> {
    if !content_type.starts_with("image/") {
        return Err(AppError::validation("Please upload an image file"));
    }
    if size > MAX_UPLOAD_BYTES as u64 {
        return Err(AppError::validation("File size must be less than 50MB"));
    }
    Ok(())
}

/// Type and size checks, made before anything touches the network.
pub fn validate_upload(file: &UploadFile) -> Result<(), AppError> {
    validate_declared(&file.content_type, file.bytes.len() as u64)
}

/// Validate, store under the user's namespace, then record.
pub async fn upload_image(
    table: &dyn ImageTable,
    store: &dyn ObjectStore,
    identity: Option<&Identity>,
    file: UploadFile,
) -> Result<ImageRecord, AppError> {
    validate_upload(&file)?;
    let identity = identity.ok_or(AppError::Unauthenticated)?;

    let path = media::upload_path(&identity.user_id, &file.filename, media::now_millis());
    tracing::info!(
        "📥 upload_image: user_id={}, filename={}, bytes={}, path={}",
        identity.user_id,
        file.filename,
        file.bytes.len(),
        path
    );

    media::store_and_record(
        store,
        table,
        &identity.user_id,
        &path,
        file.bytes,
        UploadOptions::no_overwrite(Some(file.content_type)),
        file.filename,
        None,
    )
    .await
}

/// Validate the declared file and reserve a path in the user's namespace.
/// Nothing is recorded until the upload is completed.
pub async fn initiate_upload(
    store: &dyn ObjectStore,
    identity: Option<&Identity>,
    request: InitiateUploadRequest,
) -> Result<UploadTicket, AppError> {
    validate_declared(&request.content_type, request.size)?;
    let identity = identity.ok_or(AppError::Unauthenticated)?;

    let path = media::upload_path(&identity.user_id, &request.filename, media::now_millis());
    let options = UploadOptions::no_overwrite(Some(request.content_type));
    let upload = store.presign_upload(&path, &options, request.size, UPLOAD_URL_TTL).await?;
    tracing::info!(
        "📎 initiate_upload: user_id={}, filename={}, bytes={}, path={}",
        identity.user_id,
        request.filename,
        request.size,
        path
    );

    Ok(UploadTicket { path, filename: request.filename, upload })
}

/// Record an object the client has sent to the bucket.
///
/// The object must sit in the caller's namespace. One that turns out larger
/// than the limit is removed instead of recorded.
pub async fn complete_upload(
    table: &dyn ImageTable,
    store: &dyn ObjectStore,
    identity: Option<&Identity>,
    request: CompleteUploadRequest,
) -> Result<ImageRecord, AppError> {
    let identity = identity.ok_or(AppError::Unauthenticated)?;
    let owned = request
        .path
        .strip_prefix(identity.user_id.as_str())
        .and_then(|rest| rest.strip_prefix('/'))
        .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'));
    if !owned {
        return Err(AppError::validation("Upload path does not belong to this account"));
    }

    let size = store
        .object_size(&request.path)
        .await?
        .ok_or_else(|| AppError::NotFound("Uploaded file not found".to_string()))?;
    if size > MAX_UPLOAD_BYTES as u64 {
        tracing::warn!("Removing oversized upload: path={}, bytes={}", request.path, size);
        store.remove(&request.path).await?;
        return Err(AppError::validation("File size must be less than 50MB"));
    }

    media::record_stored_object(store, table, &identity.user_id, &request.path, request.filename, None).await
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, AppError> {
    serde_json::from_slice(body).map_err(|e| AppError::validation(format!("Invalid request body: {}", e)))
}

/// HTTP handler: POST /images/upload/initiate
pub async fn initiate_upload_handler(
    store: &dyn ObjectStore,
    identity: Option<&Identity>,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let result = async { initiate_upload(store, identity, parse_body(body)?).await }.await;

    match result {
        Ok(ticket) => json_response(StatusCode::OK, &ticket),
        Err(e) => failure_response("initiate_upload", &e, "Failed to upload image"),
    }
}

/// HTTP handler: POST /images/upload/complete
pub async fn complete_upload_handler(
    table: &dyn ImageTable,
    store: &dyn ObjectStore,
    identity: Option<&Identity>,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let result = async { complete_upload(table, store, identity, parse_body(body)?).await }.await;

    match result {
        Ok(image) => {
            tracing::info!("✅ complete_upload success: image_id={}, path={}", image.id, image.path);
            success_response(
                StatusCode::CREATED,
                Notice::success("Image uploaded successfully!"),
                Some(serde_json::to_value(&image)?),
            )
        }
        Err(e) => failure_response("complete_upload", &e, "Failed to upload image"),
    }
}

/// HTTP handler: POST /images?filename=...
pub async fn upload_image_handler(
    table: &dyn ImageTable,
    store: &dyn ObjectStore,
    identity: Option<&Identity>,
    filename: Option<&str>,
    content_type: Option<&str>,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let file = UploadFile {
        filename: filename.unwrap_or("upload").to_string(),
        content_type: content_type.unwrap_or_default().to_string(),
        bytes: body.to_vec(),
    };

    match upload_image(table, store, identity, file).await {
        Ok(image) => {
            tracing::info!("✅ upload_image success: image_id={}, path={}", image.id, image.path);
            success_response(
                StatusCode::CREATED,
                Notice::success("Image uploaded successfully!"),
                Some(serde_json::to_value(&image)?),
            )
        }
        Err(e) => failure_response("upload_image", &e, "Failed to upload image"),
    }
}
