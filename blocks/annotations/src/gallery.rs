use lambda_http::{http::StatusCode, Body, Error, Response};
use notedmark_atoms::media::{self, ImageRecord, ImageTable, ObjectStore};
use notedmark_atoms::respond::json_response;
use notedmark_atoms::users::Identity;
use notedmark_atoms::AppError;
use serde::Serialize;

use crate::notice::{failure_response, success_response, Notice};

/// What the gallery renders: an explicit empty state or the images.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GalleryListing {
    Empty { title: String, hint: String },
    Images { images: Vec<ImageRecord> },
}

impl GalleryListing {
    fn from_images(images: Vec<ImageRecord>) -> Self {
        if images.is_empty() {
            GalleryListing::Empty {
                title: "No images yet".to_string(),
                hint: "Upload your first image to get started".to_string(),
            }
        } else {
            GalleryListing::Images { images }
        }
    }

    pub fn images(&self) -> &[ImageRecord] {
        match self {
            GalleryListing::Empty { .. } => &[],
            GalleryListing::Images { images } => images,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    /// The user did not confirm; nothing was touched.
    Cancelled,
    Deleted,
}

/// The signed-in user's images, newest first.
pub async fn list_gallery(table: &dyn ImageTable, identity: &Identity) -> Result<GalleryListing, AppError> {
    let images = media::list_images_for_user(table, &identity.user_id).await?;
    Ok(GalleryListing::from_images(images))
}

/// Delete one image: storage object first, then its record.
///
/// A failed step aborts the rest and nothing is rolled back, so a failed
/// record delete leaves the record pointing at a removed object.
pub async fn delete_image(
    table: &dyn ImageTable,
    store: &dyn ObjectStore,
    image: &ImageRecord,
    confirmed: bool,
) -> Result<DeleteOutcome, AppError> {
    if !confirmed {
        return Ok(DeleteOutcome::Cancelled);
    }
    media::delete_image(table, store, image).await?;
    tracing::info!("🗑️ Deleted image: image_id={}, path={}", image.id, image.path);
    Ok(DeleteOutcome::Deleted)
}

/// HTTP handler: GET /
pub async fn list_gallery_handler(table: &dyn ImageTable, identity: &Identity) -> Result<Response<Body>, Error> {
    match list_gallery(table, identity).await {
        Ok(listing) => json_response(
            StatusCode::OK,
            &serde_json::json!({ "email": identity.email, "gallery": listing }),
        ),
        Err(e) => failure_response("list_gallery", &e, "Failed to fetch images"),
    }
}

/// HTTP handler: DELETE /images/{id}?confirm=true
pub async fn delete_image_handler(
    table: &dyn ImageTable,
    store: &dyn ObjectStore,
    identity: &Identity,
    image_id: &str,
    confirmed: bool,
) -> Result<Response<Body>, Error> {
    if !confirmed {
        return json_response(
            StatusCode::CONFLICT,
            &serde_json::json!({
                "error": "Are you sure you want to delete this image?",
                "outcome": DeleteOutcome::Cancelled,
            }),
        );
    }

    let result = async {
        let image = media::get_image(table, &identity.user_id, image_id).await?;
        delete_image(table, store, &image, confirmed).await
    }
    .await;

    match result {
        Ok(outcome) => success_response(
            StatusCode::OK,
            Notice::success("Image deleted successfully"),
            Some(serde_json::json!({ "outcome": outcome })),
        ),
        Err(e) => failure_response("delete_image", &e, "Failed to delete image"),
    }
}
