//! Files compiled into the binary: page templates and the stylesheet.

use axum::{
    body::Body,
    extract::Path,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use rust_embed::RustEmbed;
use tracing::instrument;

#[derive(RustEmbed)]
#[folder = "templates/"]
pub struct Templates;

#[derive(RustEmbed)]
#[folder = "static/"]
pub struct Assets;

/// Source of an embedded template, for the minijinja loader.
pub fn template_source(name: &str) -> Option<String> {
    Templates::get(name).map(|file| String::from_utf8_lossy(&file.data).into_owned())
}

/// `GET /static/{*path}`
#[instrument]
pub async fn serve_asset(Path(path): Path<String>) -> Response {
    match Assets::get(&path) {
        Some(content) => {
            let mime = mime_guess::from_path(&path).first_or_octet_stream();
            (
                [
                    (header::CONTENT_TYPE, mime.as_ref().to_string()),
                    (header::CACHE_CONTROL, "public, max-age=3600".to_string()),
                ],
                Body::from(content.data.into_owned()),
            )
                .into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, routing::get};
    use axum_test::TestServer;

    #[tokio::test]
    async fn test_serves_stylesheet_with_mime_type() {
        let server = TestServer::new(Router::new().route("/static/{*path}", get(serve_asset))).unwrap();

        let response = server.get("/static/campus.css").await;
        response.assert_status_ok();
        assert_eq!(response.headers().get("content-type").unwrap(), "text/css");

        server.get("/static/missing.js").await.assert_status_not_found();
    }

    #[test]
    fn test_templates_are_embedded() {
        for name in ["base.html", "login.html", "signup.html", "error.html", "admin_dashboard.html"] {
            assert!(template_source(name).is_some(), "{name} missing");
        }
        assert!(template_source("nope.html").is_none());
    }
}
