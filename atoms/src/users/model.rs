use serde::{Deserialize, Serialize};

/// Minimum password length accepted at sign-up.
pub const MIN_PASSWORD_LEN: usize = 6;

/// Who is signed in.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Identity {
    pub user_id: String,
    pub email: String,
}

/// A live session as issued by the session provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub identity: Identity,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Session-state changes observed by the auth gate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEvent {
    SignedIn { user_id: String },
    SignedOut { user_id: Option<String> },
}
