//! Embedded web client

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use rust_embed::RustEmbed;

#[derive(RustEmbed)]
#[folder = "webpage/dist"]
struct WebAssets;

fn asset_response(path: &str) -> Option<Response> {
    let content = WebAssets::get(path)?;
    let mime = mime_guess::from_path(path).first_or_octet_stream();

    let mut response = Response::new(Body::from(content.data.into_owned()));
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    Some(response)
}

/// Serve a file from the embedded tree; directories map to their
/// `index.html`.
pub async fn serve_asset(req: Request) -> Response {
    let path = req.uri().path().trim_start_matches('/');

    let response = if path.is_empty() || path.ends_with('/') {
        asset_response(&format!("{}index.html", path))
    } else {
        asset_response(path)
    };

    response.unwrap_or_else(|| (StatusCode::NOT_FOUND, "Not Found").into_response())
}
