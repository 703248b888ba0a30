pub mod model;
pub mod provider;
pub mod service;

pub use model::{AuthEvent, Credentials, Identity, Session, MIN_PASSWORD_LEN};
pub use provider::SessionProvider;
pub use service::*;
