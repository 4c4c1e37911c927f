//! Web UI file serving with SPA fallback.

use std::path::{Component, Path, PathBuf};

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use http::{header, Method, StatusCode};
use mime_guess::from_path;
use tracing::{debug, warn};

const INDEX_FILE: &str = "index.html";

/// Serves files from the UI build directory.
///
/// Paths that do not name a file fall back to `index.html` so client-side
/// routes resolve; without an index the response is a plain 404.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub async fn serve(&self, method: &Method, path: &str) -> Response {
        if method != Method::GET && method != Method::HEAD {
            return (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed").into_response();
        }

        let Some(file_path) = self.resolve_path(path) else {
            warn!(path = %path, "Rejected static path outside dist directory");
            return not_found();
        };

        let file_path = if is_file(&file_path).await {
            file_path
        } else {
            let index = self.root.join(INDEX_FILE);
            if !is_file(&index).await {
                return not_found();
            }
            debug!(path = %path, "Falling back to index.html");
            index
        };

        match tokio::fs::read(&file_path).await {
            Ok(contents) => {
                let content_type = from_path(&file_path).first_or_octet_stream().to_string();
                let length = contents.len();
                let body = if method == Method::HEAD {
                    Body::empty()
                } else {
                    Body::from(contents)
                };
                Response::builder()
                    .status(StatusCode::OK)
                    .header(header::CONTENT_TYPE, content_type)
                    .header(header::CONTENT_LENGTH, length)
                    .body(body)
                    .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
            }
            Err(e) => {
                warn!(path = %file_path.display(), error = %e, "Failed to read static file");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }

    /// Map a request path into the root, or `None` if it climbs out.
    fn resolve_path(&self, path: &str) -> Option<PathBuf> {
        let path = Path::new(path.trim_start_matches('/'));

        let mut full_path = self.root.clone();
        for component in path.components() {
            match component {
                Component::Normal(c) => full_path.push(c),
                Component::ParentDir => return None,
                _ => {}
            }
        }
        Some(full_path)
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        [(header::CONTENT_TYPE, "text/plain")],
        "File not found",
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_path_validation() {
        let files = StaticFiles::new("/srv/dist");

        assert_eq!(
            files.resolve_path("/index.html"),
            Some(PathBuf::from("/srv/dist/index.html"))
        );
        assert_eq!(
            files.resolve_path("/assets/app.js"),
            Some(PathBuf::from("/srv/dist/assets/app.js"))
        );
        assert!(files.resolve_path("/../etc/passwd").is_none());
        assert!(files.resolve_path("/assets/../../etc/passwd").is_none());
    }

    #[tokio::test]
    async fn test_serves_file_with_content_type() {
        let temp_dir = TempDir::new().unwrap();
        tokio::fs::write(temp_dir.path().join("app.js"), "console.log(1)")
            .await
            .unwrap();
        let files = StaticFiles::new(temp_dir.path());

        let response = files.serve(&Method::GET, "/app.js").await;
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.contains("javascript"));
        assert_eq!(body_string(response).await, "console.log(1)");
    }

    #[tokio::test]
    async fn test_unknown_path_falls_back_to_index() {
        let temp_dir = TempDir::new().unwrap();
        tokio::fs::write(temp_dir.path().join("index.html"), "<html>ui</html>")
            .await
            .unwrap();
        let files = StaticFiles::new(temp_dir.path());

        let response = files.serve(&Method::GET, "/networks/home").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "<html>ui</html>");

        let response = files.serve(&Method::HEAD, "/").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "");
    }

    #[tokio::test]
    async fn test_missing_index_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let files = StaticFiles::new(temp_dir.path());

        let response = files.serve(&Method::GET, "/anything").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_string(response).await, "File not found");
    }

    #[tokio::test]
    async fn test_rejects_other_methods() {
        let temp_dir = TempDir::new().unwrap();
        let files = StaticFiles::new(temp_dir.path());

        let response = files.serve(&Method::DELETE, "/index.html").await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
