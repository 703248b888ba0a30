//! Domain atoms for NotedMark: image records, the drawing surface and
//! identities. Everything here takes its backends as arguments; the AWS
//! clients live in `notedmark-shared`.

pub mod drawing;
pub mod error;
pub mod media;
pub mod memory;
pub mod respond;
pub mod users;

pub use error::AppError;
