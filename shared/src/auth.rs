use annotations_block::auth_gate::{AuthGate, GALLERY_ROUTE};
use annotations_block::notice::{failure_response, success_response, Notice};
use lambda_http::http::{header::SET_COOKIE, HeaderMap, HeaderValue, StatusCode};
use lambda_http::{Body, Error, Response};
use notedmark_atoms::respond::json_response;
use notedmark_atoms::users::{Credentials, Session};
use notedmark_atoms::AppError;
use serde::Deserialize;

pub const ACCESS_TOKEN_COOKIE: &str = "notedmark_access_token";
pub const REFRESH_TOKEN_COOKIE: &str = "notedmark_refresh_token";

const ACCESS_TOKEN_MAX_AGE: u32 = 60 * 60;
const REFRESH_TOKEN_MAX_AGE: u32 = 30 * 24 * 60 * 60;
const FALLBACK_ORIGIN: &str = "http://localhost:5173";

#[derive(Debug, Deserialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    /// Where the confirmation email sends the user back to.
    #[serde(default)]
    pub redirect_to: Option<String>,
}

/// Value of cookie `name` in a `Cookie` header.
pub fn parse_cookie(cookie_header: Option<&str>, name: &str) -> Option<String> {
    cookie_header?
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

/// The caller's access token: the session cookie, else a bearer token.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    let cookie_header = headers.get("Cookie").and_then(|v| v.to_str().ok());
    parse_cookie(cookie_header, ACCESS_TOKEN_COOKIE).or_else(|| {
        headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    })
}

pub fn session_cookie(name: &str, value: &str, max_age: u32) -> String {
    format!("{}={}; Path=/; HttpOnly; Secure; SameSite=Lax; Max-Age={}", name, value, max_age)
}

pub fn clear_cookie(name: &str) -> String {
    format!("{}=; Path=/; HttpOnly; Secure; SameSite=Lax; Max-Age=0", name)
}

/// Echo the request origin when it is allowed, else the first allowed origin.
pub fn get_cors_origin(request_origin: Option<&str>, allowed_origins: &[String]) -> String {
    match request_origin {
        Some(origin) if allowed_origins.iter().any(|o| o == origin) => origin.to_string(),
        _ => allowed_origins
            .first()
            .cloned()
            .unwrap_or_else(|| FALLBACK_ORIGIN.to_string()),
    }
}

fn with_cookies(mut resp: Response<Body>, cookies: &[String]) -> Response<Body> {
    let headers = resp.headers_mut();
    for cookie in cookies {
        if let Ok(v) = HeaderValue::from_str(cookie) {
            headers.append(SET_COOKIE, v);
        }
    }
    resp
}

fn session_cookies(session: &Session) -> Vec<String> {
    let mut cookies = vec![session_cookie(ACCESS_TOKEN_COOKIE, &session.access_token, ACCESS_TOKEN_MAX_AGE)];
    if let Some(refresh) = &session.refresh_token {
        cookies.push(session_cookie(REFRESH_TOKEN_COOKIE, refresh, REFRESH_TOKEN_MAX_AGE));
    }
    cookies
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, AppError> {
    serde_json::from_slice(body).map_err(|e| AppError::validation(format!("Invalid request body: {}", e)))
}

/// HTTP handler: POST /signup
pub async fn signup(gate: &AuthGate, body: &[u8]) -> Result<Response<Body>, Error> {
    let result = async {
        let request: SignUpRequest = parse_body(body)?;
        let credentials = Credentials { email: request.email, password: request.password };
        let redirect_to = request.redirect_to.unwrap_or_else(|| GALLERY_ROUTE.to_string());
        gate.sign_up(&credentials, &redirect_to).await
    }
    .await;

    match result {
        Ok(notice) => success_response(StatusCode::CREATED, notice, None),
        Err(e) => failure_response("sign_up", &e, "An error occurred"),
    }
}

/// HTTP handler: POST /login
pub async fn login(gate: &AuthGate, body: &[u8]) -> Result<Response<Body>, Error> {
    let result = async {
        let credentials: Credentials = parse_body(body)?;
        gate.sign_in(&credentials).await
    }
    .await;

    match result {
        Ok((session, notice)) => {
            let resp = success_response(StatusCode::OK, notice, Some(serde_json::to_value(&session.identity)?))?;
            Ok(with_cookies(resp, &session_cookies(&session)))
        }
        Err(e) => failure_response("sign_in", &e, "An error occurred"),
    }
}

/// HTTP handler: POST /logout. Cookies are cleared even if the provider fails.
pub async fn logout(gate: &AuthGate, token: Option<&str>) -> Result<Response<Body>, Error> {
    let cleared = [clear_cookie(ACCESS_TOKEN_COOKIE), clear_cookie(REFRESH_TOKEN_COOKIE)];
    let resp = match gate.sign_out(token).await {
        Ok(notice) => success_response(StatusCode::OK, notice, None)?,
        Err(e) => failure_response("sign_out", &e, "An error occurred")?,
    };
    Ok(with_cookies(resp, &cleared))
}

/// HTTP handler: GET /auth
pub async fn auth_page(gate: &AuthGate, token: Option<&str>) -> Result<Response<Body>, Error> {
    match gate.auth_page(token).await {
        Some(route) => json_response(
            StatusCode::OK,
            &Notice::success("Already signed in").redirect_to(route),
        ),
        None => json_response(StatusCode::OK, &serde_json::json!({ "signed_in": false })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notedmark_atoms::memory::MemorySessionProvider;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn gate() -> AuthGate {
        AuthGate::new(Arc::new(MemorySessionProvider::new()))
    }

    fn body_json(resp: &Response<Body>) -> serde_json::Value {
        serde_json::from_slice(resp.body().as_ref()).unwrap()
    }

    fn set_cookies(resp: &Response<Body>) -> Vec<String> {
        resp.headers()
            .get_all(SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn cookie_header_is_searched_by_name() {
        let header = Some("theme=dark; notedmark_access_token=abc; other=1");
        assert_eq!(parse_cookie(header, ACCESS_TOKEN_COOKIE).as_deref(), Some("abc"));
        assert_eq!(parse_cookie(header, REFRESH_TOKEN_COOKIE), None);
        assert_eq!(parse_cookie(Some("notedmark_access_token="), ACCESS_TOKEN_COOKIE), None);
    }

    #[test]
    fn bearer_token_is_the_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", HeaderValue::from_static("Bearer xyz"));
        assert_eq!(session_token(&headers).as_deref(), Some("xyz"));

        headers.insert("Cookie", HeaderValue::from_static("notedmark_access_token=abc"));
        assert_eq!(session_token(&headers).as_deref(), Some("abc"));
    }

    #[test]
    fn cors_origin_only_echoes_allowed_origins() {
        let allowed = vec!["https://notedmark.app".to_string()];
        assert_eq!(get_cors_origin(Some("https://notedmark.app"), &allowed), "https://notedmark.app");
        assert_eq!(get_cors_origin(Some("https://evil.example"), &allowed), "https://notedmark.app");
        assert_eq!(get_cors_origin(None, &[]), FALLBACK_ORIGIN);
    }

    #[tokio::test]
    async fn login_sets_http_only_session_cookies() {
        let gate = gate();
        let creds = br#"{"email":"user@example.com","password":"secret1"}"#;
        assert_eq!(signup(&gate, creds).await.unwrap().status(), StatusCode::CREATED);

        let resp = login(&gate, creds).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(&resp)["message"], "Welcome back!");
        let cookies = set_cookies(&resp);
        assert_eq!(cookies.len(), 2);
        assert!(cookies.iter().all(|c| c.contains("HttpOnly")));
        assert!(cookies[0].starts_with("notedmark_access_token="));
    }

    #[tokio::test]
    async fn invalid_signup_is_a_bad_request() {
        let resp = signup(&gate(), br#"{"email":"user@example.com","password":"123"}"#).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(&resp)["message"], "Password must be at least 6 characters");
    }

    #[tokio::test]
    async fn logout_always_clears_cookies() {
        let resp = logout(&gate(), None).await.unwrap();
        assert_eq!(body_json(&resp)["message"], "Signed out successfully");
        assert!(set_cookies(&resp).iter().all(|c| c.contains("Max-Age=0")));
    }
}
