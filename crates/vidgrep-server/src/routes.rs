//! Query API endpoints.
//!
//! `GET /search?q=<text>` — records whose text contains the query, capped.
//! `GET /all?page=<n>`    — paginated listing of every record.
//! `GET /api/progress`    — extraction progress snapshot.
//! `GET /health`          — liveness probe.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tracing::error;

use vidgrep_store::StoreError;

use crate::service::{ListingPage, ProgressReport, QueryService, SearchOutcome};

pub fn router(service: Arc<QueryService>) -> Router {
    Router::new()
        .route("/search", get(search))
        .route("/all", get(all_records))
        .route("/api/progress", get(api_progress))
        .route("/health", get(health))
        .with_state(service)
}

struct ApiError(StoreError);

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = %self.0, "query request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
}

/// GET /search — substring search over recorded text.
async fn search(
    State(service): State<Arc<QueryService>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchOutcome>, ApiError> {
    Ok(Json(service.search(&params.q).await?))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    #[serde(default = "first_page")]
    page: u64,
}

fn first_page() -> u64 {
    1
}

/// GET /all — ordered page of the full record set.
async fn all_records(
    State(service): State<Arc<QueryService>>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListingPage>, ApiError> {
    Ok(Json(service.list_page(params.page).await?))
}

/// GET /api/progress — progress snapshot for pollers.
async fn api_progress(
    State(service): State<Arc<QueryService>>,
) -> Result<Json<ProgressReport>, ApiError> {
    Ok(Json(service.progress_report().await?))
}

/// GET /health — liveness probe.
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::QueryConfig;
    use std::net::SocketAddr;
    use tempfile::TempDir;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use vidgrep_store::Database;
    use vidgrep_types::{TextCandidate, format_mmss};

    async fn spawn_server(
        dir: &TempDir,
    ) -> (String, oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
        let service = QueryService::open(dir.path().join("vidgrep.db"), QueryConfig::default())
            .await
            .unwrap();
        let app = router(Arc::new(service));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address: SocketAddr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            server.await.unwrap();
        });
        (format!("http://{address}"), shutdown_tx, handle)
    }

    async fn get_json(url: &str) -> (reqwest::StatusCode, serde_json::Value) {
        let response = reqwest::get(url).await.unwrap();
        let status = response.status();
        let body = response.bytes().await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn endpoints_serve_search_listing_and_progress() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path().join("vidgrep.db")).await.unwrap();
        for (name, timestamp) in [("张三", 5.0), ("李四", 10.0)] {
            db.append_batch(
                &[TextCandidate::new(name, 0.9)],
                timestamp,
                &format_mmss(timestamp),
            )
            .await
            .unwrap();
        }
        db.reset_progress(240, 24.0).await.unwrap();
        drop(db);

        let (base, shutdown_tx, handle) = spawn_server(&dir).await;

        let (status, body) = get_json(&format!("{base}/health")).await;
        assert!(status.is_success());
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "vidgrep-server");

        let (status, body) = get_json(&format!("{base}/search?q=%E5%BC%A0")).await;
        assert!(status.is_success());
        assert_eq!(body["total_count"], 1);
        assert_eq!(body["records"][0]["name"], "张三");

        let (status, body) = get_json(&format!("{base}/search")).await;
        assert!(status.is_success());
        assert_eq!(body["total_count"], 0);

        let (status, body) = get_json(&format!("{base}/all?page=1")).await;
        assert!(status.is_success());
        assert_eq!(body["total_count"], 2);
        assert_eq!(body["page"], 1);

        let (status, body) = get_json(&format!("{base}/api/progress")).await;
        assert!(status.is_success());
        assert_eq!(body["status"], "running");
        assert_eq!(body["total_frames"], 240);

        let _ = shutdown_tx.send(());
        handle.await.unwrap();
    }
}
