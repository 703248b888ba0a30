use chrono::{SecondsFormat, Utc};

use super::model::{CreateImagePayload, ImageRecord, UploadOptions};
use super::store::{ImageTable, ObjectStore};
use crate::AppError;

/// Creation timestamp in a fixed-width form, so string order is time order.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Milliseconds since the epoch, the basis of every generated file name.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Text after the last `.` of a filename (the whole name if it has none).
pub fn file_extension(filename: &str) -> &str {
    filename.rsplit('.').next().unwrap_or(filename)
}

/// `{user_id}/{millis}.{ext}` for an uploaded file.
pub fn upload_path(user_id: &str, filename: &str, millis: i64) -> String {
    format!("{}/{}.{}", user_id, millis, file_extension(filename))
}

pub fn annotated_file_name(millis: i64) -> String {
    format!("annotated-{}.png", millis)
}

/// Create a new image record
pub async fn create_image_record(
    table: &dyn ImageTable,
    payload: CreateImagePayload,
) -> Result<ImageRecord, AppError> {
    let record = ImageRecord {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: payload.user_id,
        path: payload.path,
        filename: payload.filename,
        public_url: payload.public_url,
        original_image_id: payload.original_image_id,
        created_at: now_timestamp(),
    };

    table.insert(&record).await?;
    Ok(record)
}

/// Upload bytes, ask the bucket for their URL, then insert the record.
///
/// The steps run in that order and nothing is undone if a later one fails:
/// an object uploaded before a failed insert stays in the bucket.
pub async fn store_and_record(
    store: &dyn ObjectStore,
    table: &dyn ImageTable,
    user_id: &str,
    path: &str,
    bytes: Vec<u8>,
    options: UploadOptions,
    filename: String,
    original_image_id: Option<String>,
) -> Result<ImageRecord, AppError> {
    let size = bytes.len();
    store.upload(path, bytes, options).await.map_err(|e| {
        tracing::error!("Storage upload failed: path={}, error={}", path, e);
        e
    })?;
    tracing::info!("Stored object: path={}, bytes={}", path, size);

    record_stored_object(store, table, user_id, path, filename, original_image_id).await
}

/// Ask the bucket for the URL of an object already at `path`, then insert
/// its record.
pub async fn record_stored_object(
    store: &dyn ObjectStore,
    table: &dyn ImageTable,
    user_id: &str,
    path: &str,
    filename: String,
    original_image_id: Option<String>,
) -> Result<ImageRecord, AppError> {
    let public_url = store.public_url(path);

    create_image_record(
        table,
        CreateImagePayload {
            user_id: user_id.to_string(),
            path: path.to_string(),
            filename,
            public_url,
            original_image_id,
        },
    )
    .await
    .map_err(|e| {
        tracing::error!("Image record insert failed after upload: path={}, error={}", path, e);
        e
    })
}

/// List a user's images, newest first
pub async fn list_images_for_user(
    table: &dyn ImageTable,
    user_id: &str,
) -> Result<Vec<ImageRecord>, AppError> {
    let mut images = table.list_for_user(user_id).await?;
    // Stable, so backends that already order ties keep their order.
    images.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(images)
}

/// Get a specific image
pub async fn get_image(
    table: &dyn ImageTable,
    user_id: &str,
    image_id: &str,
) -> Result<ImageRecord, AppError> {
    table
        .get(user_id, image_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Image not found".to_string()))
}

/// Remove the stored object, then the record. Stops at the first failure.
pub async fn delete_image(
    table: &dyn ImageTable,
    store: &dyn ObjectStore,
    image: &ImageRecord,
) -> Result<(), AppError> {
    let path = store.path_for_url(&image.public_url).ok_or_else(|| {
        AppError::backend(format!("Cannot find a storage path in {}", image.public_url))
    })?;

    store.remove(&path).await?;
    table.delete(&image.user_id, &image.id).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryImageTable, MemoryObjectStore};

    #[test]
    fn extension_is_whatever_follows_the_last_dot() {
        assert_eq!(file_extension("beach.photo.JPG"), "JPG");
        assert_eq!(file_extension("README"), "README");
        assert_eq!(upload_path("u1", "cat.png", 1700), "u1/1700.png");
    }

    #[tokio::test]
    async fn delete_resolves_the_path_through_the_store() {
        let store = MemoryObjectStore::new("https://cdn.example.com/notedmark-prod");
        let table = MemoryImageTable::new();
        let record = store_and_record(
            &store,
            &table,
            "u1",
            "u1/17.png",
            vec![1, 2, 3],
            UploadOptions::no_overwrite(None),
            "17.png".into(),
            None,
        )
        .await
        .unwrap();

        delete_image(&table, &store, &record).await.unwrap();
        assert!(store.paths().await.is_empty());
        assert!(table.rows().await.is_empty());
    }

    #[tokio::test]
    async fn foreign_url_stops_before_any_removal() {
        let (store, table) = (MemoryObjectStore::default(), MemoryImageTable::new());
        let record = ImageRecord {
            id: "i1".into(),
            user_id: "u1".into(),
            path: "u1/17.png".into(),
            filename: "17.png".into(),
            public_url: "https://elsewhere.example.com/u1/17.png".into(),
            original_image_id: None,
            created_at: now_timestamp(),
        };

        assert!(matches!(delete_image(&table, &store, &record).await, Err(AppError::Backend(_))));
        assert!(store.calls().await.is_empty());
        assert!(table.calls().await.is_empty());
    }

    #[test]
    fn timestamps_sort_lexically() {
        let a = now_timestamp();
        let b = now_timestamp();
        assert!(a <= b);
        assert!(a.ends_with('Z'));
    }
}
