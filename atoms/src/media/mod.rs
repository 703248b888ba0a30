// Re-export model types, store traits and service functions
pub mod http;
pub mod model;
pub mod service;
pub mod store;

pub use http::*;
pub use model::{CreateImagePayload, ImageRecord, PresignedUpload, UploadOptions, IMAGES_BUCKET};
pub use service::*;
pub use store::{ImageFetcher, ImageTable, ObjectStore};
