//! Static content server

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use axum::{response::IntoResponse, routing::get, Json, Router};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Routes: `/health` plus every file below `root`
pub fn router(root: impl Into<PathBuf>) -> Router {
    let root = root.into();
    Router::new()
        .route("/health", get(health_handler))
        .fallback_service(ServeDir::new(root).append_index_html_on_directories(true))
        .layer(TraceLayer::new_for_http())
}

/// Serve `root` on `addr` until SIGTERM or Ctrl-C
pub async fn serve(root: &Path, addr: SocketAddr) -> anyhow::Result<()> {
    if !root.is_dir() {
        anyhow::bail!("content root {} is not a directory", root.display());
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Local web server serving {} on http://{}", root.display(), listener.local_addr()?);

    axum::serve(listener, router(root))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Local web server stopped");
    Ok(())
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "iris-web"
    }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn get_path(app: Router, uri: &str) -> (StatusCode, String) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let root = tempfile::tempdir().unwrap();
        let (status, body) = get_path(router(root.path()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("\"status\":\"ok\""));
    }

    #[tokio::test]
    async fn serves_files_and_directory_indexes() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("bookmarks")).unwrap();
        std::fs::write(root.path().join("bookmarks/index.html"), "<h1>Bookmarks</h1>").unwrap();
        std::fs::write(root.path().join("focus.html"), "<p>focus</p>").unwrap();

        let (status, body) = get_path(router(root.path()), "/focus.html").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "<p>focus</p>");

        let (status, body) = get_path(router(root.path()), "/bookmarks/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "<h1>Bookmarks</h1>");
    }

    #[tokio::test]
    async fn missing_files_are_404() {
        let root = tempfile::tempdir().unwrap();
        let (status, _) = get_path(router(root.path()), "/nope.html").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn serve_rejects_missing_root() {
        let root = tempfile::tempdir().unwrap();
        let err = serve(&root.path().join("absent"), "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }
}
