use lambda_http::{http::StatusCode, Body, Error as LambdaError, Response};

use super::service::get_image;
use super::store::ImageTable;
use crate::respond::json_response;

/// HTTP Handler: GET /annotate/{id}
pub async fn get_image_handler(
    table: &dyn ImageTable,
    user_id: &str,
    image_id: &str,
) -> Result<Response<Body>, LambdaError> {
    match get_image(table, user_id, image_id).await {
        Ok(image) => json_response(StatusCode::OK, &image),
        Err(e) => {
            tracing::error!("get_image_handler failed: image_id={}, error={}", image_id, e);
            // The editor goes back to the gallery when the image cannot be opened.
            json_response(
                e.status_code(),
                &serde_json::json!({ "error": e.to_string(), "redirect": "/" }),
            )
        }
    }
}
