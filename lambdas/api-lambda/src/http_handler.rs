use annotations_block::auth_gate::GateDecision;
use annotations_block::notice::failure_response;
use annotations_block::{gallery, session, upload};
use lambda_http::{
    http::{
        header::{HeaderValue, VARY},
        Method, StatusCode,
    },
    Body, Error, Request, RequestExt, Response,
};
use notedmark_atoms::media;
use notedmark_atoms::respond::{method_not_allowed, not_found};
use notedmark_atoms::users::Identity;
use notedmark_atoms::AppError;
use notedmark_shared::{auth, AppState};
use std::sync::Arc;

fn with_cors_headers(mut resp: Response<Body>, request_origin: Option<&str>, allowed: &[String]) -> Response<Body> {
    let cors_origin = auth::get_cors_origin(request_origin, allowed);

    let headers = resp.headers_mut();
    if let Ok(origin) = HeaderValue::from_str(&cors_origin) {
        headers.insert("Access-Control-Allow-Origin", origin);
    }
    headers.insert("Access-Control-Allow-Credentials", HeaderValue::from_static("true"));
    headers.insert(
        "Access-Control-Allow-Methods",
        HeaderValue::from_static("GET,POST,DELETE,OPTIONS"),
    );
    headers.insert(
        "Access-Control-Allow-Headers",
        HeaderValue::from_static("Content-Type,Authorization,Cookie"),
    );
    headers.insert(
        "Access-Control-Expose-Headers",
        HeaderValue::from_static("Content-Disposition"),
    );
    headers.append(VARY, HeaderValue::from_static("Origin"));

    resp
}

fn finalize_response(
    resp: Result<Response<Body>, Error>,
    request_origin: Option<&str>,
    allowed: &[String],
) -> Result<Response<Body>, Error> {
    resp.map(|r| with_cors_headers(r, request_origin, allowed))
}

fn unauthenticated(action: &str) -> Result<Response<Body>, Error> {
    failure_response(action, &AppError::Unauthenticated, "An error occurred")
}

/// Main Lambda handler - routes requests to auth, gallery, upload and annotation endpoints
pub(crate) async fn function_handler(event: Request, state: Arc<AppState>) -> Result<Response<Body>, Error> {
    let method = event.method();
    let path = event.uri().path();
    let body: &[u8] = event.body().as_ref();
    let request_origin = event.headers().get("Origin").and_then(|v| v.to_str().ok());
    let allowed = state.config.allowed_origins.as_slice();
    tracing::info!("🚀 NotedMark API invoked - Method: {} Path: {}", method, path);

    // Handle CORS preflight
    if *method == Method::OPTIONS {
        let resp = Response::builder()
            .status(StatusCode::OK)
            .body(Body::Empty)
            .map_err(Box::new)?;
        return Ok(with_cors_headers(resp, request_origin, allowed));
    }

    let token = auth::session_token(event.headers());
    let token = token.as_deref();
    let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    // Auth endpoints (no session required)
    let resp = match (method, parts.as_slice()) {
        (&Method::POST, ["signup"]) => auth::signup(&state.gate, body).await,
        (&Method::POST, ["login"]) => auth::login(&state.gate, body).await,
        (&Method::POST, ["logout"]) => auth::logout(&state.gate, token).await,
        (&Method::GET, ["auth"]) => auth::auth_page(&state.gate, token).await,
        (_, ["signup"] | ["login"] | ["logout"] | ["auth"]) => method_not_allowed(),
        _ => protected_route(&event, &state, token, &parts, body).await,
    };

    finalize_response(resp, request_origin, allowed)
}

/// Everything behind the auth gate.
async fn protected_route(
    event: &Request,
    state: &AppState,
    token: Option<&str>,
    parts: &[&str],
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let method = event.method();
    let identity: Option<Identity> = match state.gate.enter(token).await {
        GateDecision::Proceed(identity) => Some(identity),
        GateDecision::Redirect(route) => {
            tracing::debug!("No session - client should go to {}", route);
            None
        }
    };
    let query = event.query_string_parameters_ref();
    let ctx = state.session_context();

    match (method, parts) {
        // GET / - gallery
        (&Method::GET, []) => match &identity {
            Some(identity) => gallery::list_gallery_handler(state.table.as_ref(), identity).await,
            None => unauthenticated("list_gallery"),
        },

        // POST /images?filename=... - upload (raw body)
        (&Method::POST, ["images"]) => {
            let filename = query.and_then(|params| params.first("filename"));
            let content_type = event.headers().get("Content-Type").and_then(|v| v.to_str().ok());
            upload::upload_image_handler(
                state.table.as_ref(),
                state.store.as_ref(),
                identity.as_ref(),
                filename,
                content_type,
                body,
            )
            .await
        }

        // POST /images/upload/initiate - validate and presign a direct upload
        (&Method::POST, ["images", "upload", "initiate"]) => {
            upload::initiate_upload_handler(state.store.as_ref(), identity.as_ref(), body).await
        }

        // POST /images/upload/complete - record a finished direct upload
        (&Method::POST, ["images", "upload", "complete"]) => {
            upload::complete_upload_handler(state.table.as_ref(), state.store.as_ref(), identity.as_ref(), body).await
        }

        // DELETE /images/{id}?confirm=true - delete image
        (&Method::DELETE, ["images", image_id]) => match &identity {
            Some(identity) => {
                let confirmed = query.and_then(|params| params.first("confirm")) == Some("true");
                gallery::delete_image_handler(state.table.as_ref(), state.store.as_ref(), identity, image_id, confirmed)
                    .await
            }
            None => unauthenticated("delete_image"),
        },

        // GET /annotate/{id} - the record to annotate
        (&Method::GET, ["annotate", image_id]) => match &identity {
            Some(identity) => media::get_image_handler(state.table.as_ref(), &identity.user_id, image_id).await,
            None => unauthenticated("get_image"),
        },

        // POST /annotate/{id}/download - PNG of the submitted scene
        (&Method::POST, ["annotate", image_id, "download"]) => match &identity {
            Some(identity) => session::download_handler(&ctx, identity, image_id, body).await,
            None => unauthenticated("download"),
        },

        // POST /annotate/{id}/save - store the submitted scene as a new image
        (&Method::POST, ["annotate", image_id, "save"]) => {
            session::save_handler(&ctx, identity.as_ref(), image_id, body).await
        }

        (
            _,
            [] | ["images"]
            | ["images", _]
            | ["images", "upload", "initiate" | "complete"]
            | ["annotate", _]
            | ["annotate", _, "download" | "save"],
        ) => {
            method_not_allowed()
        }

        _ => {
            tracing::warn!("⚠️ No route matched - Method: {} Path: /{}", method, parts.join("/"));
            not_found()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use lambda_http::http::header::{CONTENT_TYPE, COOKIE, ORIGIN, SET_COOKIE};
    use notedmark_atoms::media::{ObjectStore, UploadOptions};
    use notedmark_shared::Config;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Cursor;

    fn state() -> Arc<AppState> {
        let config = Config::from_lookup(|name| match name {
            "BACKEND_MODE" => Some("memory".to_string()),
            "ALLOWED_ORIGINS" => Some("http://localhost:5173".to_string()),
            _ => None,
        })
        .unwrap();
        Arc::new(AppState::in_memory(config).unwrap())
    }

    fn request(method: &str, uri: &str, cookie: Option<&str>) -> lambda_http::http::request::Builder {
        let builder = lambda_http::http::Request::builder().method(method).uri(uri);
        match cookie {
            Some(cookie) => builder.header(COOKIE, cookie),
            None => builder,
        }
    }

    async fn send(state: &Arc<AppState>, req: Request) -> Response<Body> {
        function_handler(req, state.clone()).await.unwrap()
    }

    fn json(resp: &Response<Body>) -> serde_json::Value {
        serde_json::from_slice(resp.body().as_ref()).unwrap()
    }

    fn png() -> Vec<u8> {
        let mut bytes = Vec::new();
        RgbaImage::from_pixel(40, 30, Rgba([200, 0, 0, 255]))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    async fn signed_in_cookie(state: &Arc<AppState>) -> String {
        let creds = br#"{"email":"user@example.com","password":"secret1"}"#.to_vec();
        let signup = request("POST", "/signup", None).body(Body::from(creds.clone())).unwrap();
        assert_eq!(send(state, signup).await.status(), StatusCode::CREATED);

        let login = request("POST", "/login", None).body(Body::from(creds)).unwrap();
        let resp = send(state, login).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let set_cookie = resp.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
        set_cookie.split(';').next().unwrap().to_string()
    }

    async fn upload(state: &Arc<AppState>, cookie: &str) -> serde_json::Value {
        let req = request("POST", "/images", Some(cookie))
            .header(CONTENT_TYPE, "image/png")
            .body(Body::from(png()))
            .unwrap()
            .with_query_string_parameters(query(&[("filename", "red.png")]));
        let resp = send(state, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        json(&resp)["data"].clone()
    }

    #[tokio::test]
    async fn preflight_answers_with_cors_headers() {
        let state = state();
        let req = request("OPTIONS", "/images", None)
            .header(ORIGIN, "http://localhost:5173")
            .body(Body::Empty)
            .unwrap();
        let resp = send(&state, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["Access-Control-Allow-Origin"], "http://localhost:5173");
        assert_eq!(resp.headers()["Access-Control-Allow-Credentials"], "true");
    }

    #[tokio::test]
    async fn gallery_without_session_points_at_sign_in() {
        let state = state();
        let resp = send(&state, request("GET", "/", None).body(Body::Empty).unwrap()).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json(&resp)["redirect"], "/auth");
    }

    #[tokio::test]
    async fn unknown_routes_are_not_found() {
        let state = state();
        let resp = send(&state, request("GET", "/nowhere", None).body(Body::Empty).unwrap()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let resp = send(&state, request("PUT", "/images", None).body(Body::Empty).unwrap()).await;
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn auth_page_redirects_signed_in_users() {
        let state = state();
        let cookie = signed_in_cookie(&state).await;
        let resp = send(&state, request("GET", "/auth", Some(&cookie)).body(Body::Empty).unwrap()).await;
        assert_eq!(json(&resp)["redirect"], "/");
    }

    #[tokio::test]
    async fn upload_list_annotate_save_and_delete() {
        let state = state();
        let cookie = signed_in_cookie(&state).await;

        let resp = send(&state, request("GET", "/", Some(&cookie)).body(Body::Empty).unwrap()).await;
        assert_eq!(json(&resp)["gallery"]["state"], "empty");

        let uploaded = upload(&state, &cookie).await;
        let id = uploaded["id"].as_str().unwrap().to_string();

        let resp = send(&state, request("GET", &format!("/annotate/{}", id), Some(&cookie)).body(Body::Empty).unwrap()).await;
        assert_eq!(json(&resp)["filename"], "red.png");

        let scene = br#"{"tools":["rectangle","text"]}"#.to_vec();
        let req = request("POST", &format!("/annotate/{}/download", id), Some(&cookie))
            .body(Body::from(scene.clone()))
            .unwrap();
        let resp = send(&state, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[CONTENT_TYPE], "image/png");
        let disposition = resp.headers()["Content-Disposition"].to_str().unwrap();
        assert!(disposition.starts_with("attachment; filename=\"annotated-"));

        let req = request("POST", &format!("/annotate/{}/save", id), Some(&cookie))
            .body(Body::from(scene))
            .unwrap();
        let resp = send(&state, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let saved = json(&resp);
        assert_eq!(saved["message"], "Annotated image saved!");
        assert_eq!(saved["redirect"], "/");
        assert_eq!(saved["data"]["original_image_id"], id.as_str());

        let resp = send(&state, request("GET", "/", Some(&cookie)).body(Body::Empty).unwrap()).await;
        assert_eq!(json(&resp)["gallery"]["images"].as_array().unwrap().len(), 2);

        let resp = send(&state, request("DELETE", &format!("/images/{}", id), Some(&cookie)).body(Body::Empty).unwrap()).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let req = request("DELETE", &format!("/images/{}", id), Some(&cookie))
            .body(Body::Empty)
            .unwrap()
            .with_query_string_parameters(query(&[("confirm", "true")]));
        let resp = send(&state, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json(&resp)["message"], "Image deleted successfully");

        let resp = send(&state, request("GET", "/", Some(&cookie)).body(Body::Empty).unwrap()).await;
        assert_eq!(json(&resp)["gallery"]["images"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn save_without_session_is_unauthenticated() {
        let state = state();
        let req = request("POST", "/annotate/some-id/save", None).body(Body::Empty).unwrap();
        let resp = send(&state, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json(&resp)["redirect"], "/auth");
    }

    #[tokio::test]
    async fn non_image_upload_is_rejected_before_the_session_check() {
        let state = state();
        let req = request("POST", "/images", None)
            .header(CONTENT_TYPE, "text/plain")
            .body(Body::from("hello"))
            .unwrap();
        let resp = send(&state, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(&resp)["message"], "Please upload an image file");
    }

    #[tokio::test]
    async fn direct_upload_is_checked_up_front_then_recorded() {
        let state = state();
        let cookie = signed_in_cookie(&state).await;

        let too_big = br#"{"filename":"huge.jpg","content_type":"image/jpeg","size":62914560}"#.to_vec();
        let req = request("POST", "/images/upload/initiate", Some(&cookie)).body(Body::from(too_big)).unwrap();
        let resp = send(&state, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(&resp)["message"], "File size must be less than 50MB");

        let declared = br#"{"filename":"red.png","content_type":"image/png","size":16}"#.to_vec();
        let req = request("POST", "/images/upload/initiate", Some(&cookie)).body(Body::from(declared)).unwrap();
        let resp = send(&state, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let ticket = json(&resp);
        assert_eq!(ticket["upload"]["method"], "PUT");
        let path = ticket["path"].as_str().unwrap().to_string();

        // The client's PUT to the presigned URL.
        state
            .store
            .upload(&path, vec![0; 16], UploadOptions::no_overwrite(Some("image/png".into())))
            .await
            .unwrap();

        let done = serde_json::json!({ "path": path, "filename": "red.png" }).to_string();
        let req = request("POST", "/images/upload/complete", Some(&cookie)).body(Body::from(done)).unwrap();
        let resp = send(&state, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(json(&resp)["message"], "Image uploaded successfully!");

        let resp = send(&state, request("GET", "/", Some(&cookie)).body(Body::Empty).unwrap()).await;
        assert_eq!(json(&resp)["gallery"]["images"][0]["path"], path.as_str());
    }
}
