use lambda_http::{http::StatusCode, Body, Error, Response};
use notedmark_atoms::respond::json_response;
use notedmark_atoms::AppError;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Success,
    Error,
}

/// The one transient message a user sees after an action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    /// Where the client should navigate next, if anywhere.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Success, message: message.into(), redirect: None }
    }

    /// The collaborator's message when it has one, `fallback` otherwise.
    pub fn from_error(err: &AppError, fallback: &str) -> Self {
        let redirect = match err {
            AppError::Unauthenticated => Some(crate::auth_gate::SIGN_IN_ROUTE.to_string()),
            _ => None,
        };
        Self {
            level: NoticeLevel::Error,
            message: err.user_message().unwrap_or_else(|| fallback.to_string()),
            redirect,
        }
    }

    pub fn redirect_to(mut self, route: &str) -> Self {
        self.redirect = Some(route.to_string());
        self
    }
}

/// Turn a failed action into its error response, logging it once.
pub fn failure_response(action: &str, err: &AppError, fallback: &str) -> Result<Response<Body>, Error> {
    tracing::error!("❌ {} failed: {}", action, err);
    json_response(err.status_code(), &Notice::from_error(err, fallback))
}

/// A success notice with the action's result, if any, under `data`.
pub fn success_response(
    status: StatusCode,
    notice: Notice,
    data: Option<serde_json::Value>,
) -> Result<Response<Body>, Error> {
    let mut body = serde_json::to_value(&notice)?;
    if let (Some(data), Some(map)) = (data, body.as_object_mut()) {
        map.insert("data".to_string(), data);
    }
    json_response(status, &body)
}
