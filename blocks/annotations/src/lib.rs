//! Annotation workflows: the editing session, the gallery, the upload flow
//! and the auth gate in front of them.

pub mod auth_gate;
pub mod gallery;
pub mod notice;
pub mod session;
pub mod upload;

pub use notice::{Notice, NoticeLevel};
