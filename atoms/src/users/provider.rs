use async_trait::async_trait;

use super::model::{Credentials, Session};
use crate::AppError;

/// Hosted authentication: session lookup, sign-up, sign-in, sign-out.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// The session behind `access_token`, or `None` if it is not (or no longer) valid.
    async fn current_session(&self, access_token: &str) -> Result<Option<Session>, AppError>;

    /// Register an account. Does not sign the user in.
    async fn sign_up(&self, credentials: &Credentials, redirect_to: &str) -> Result<(), AppError>;

    async fn sign_in(&self, credentials: &Credentials) -> Result<Session, AppError>;

    async fn sign_out(&self, access_token: &str) -> Result<(), AppError>;
}
