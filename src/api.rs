//! HTTP service boundary.
//!
//! `POST /scrap` runs one scrape and answers with
//! `{"status": "success", "data": {...}}` or
//! `{"status": "error", "message": "..."}`. Only one scrape runs at a time
//! since all of them write the same table.

use crate::config::{CategoryQuota, CrawlConfig};
use crate::crawler::CrawlMode;
use crate::error::ArxivError;
use crate::pipeline::{run_scrape, ScrapeSummary};
use crate::urls::{AdvancedSearch, DEFAULT_SEARCH_ORDER, DEFAULT_SEARCH_SIZE};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

/// Shared server state
pub struct AppState {
    config: CrawlConfig,
    /// Held by the running scrape task until its results are merged
    job: Arc<Mutex<()>>,
    /// Cancelled on server shutdown; stops running scrapes
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: CrawlConfig) -> Self {
        Self {
            config,
            job: Arc::new(Mutex::new(())),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

/// Scrape request body
#[derive(Debug, Default, Deserialize)]
pub struct ScrapeRequest {
    /// Category code to article count; the built-in table when absent
    #[serde(default)]
    pub arxiv_fields: Option<BTreeMap<String, i64>>,
    /// Switches the run to advanced-search mode
    #[serde(default)]
    pub advanced: Option<AdvancedRequest>,
}

#[derive(Debug, Deserialize)]
pub struct AdvancedRequest {
    pub classification: String,
    #[serde(default)]
    pub from_date: Option<String>,
    #[serde(default)]
    pub to_date: Option<String>,
    #[serde(default = "default_search_size")]
    pub size: u32,
    #[serde(default = "default_search_order")]
    pub order: String,
}

fn default_search_size() -> u32 {
    DEFAULT_SEARCH_SIZE
}

fn default_search_order() -> String {
    DEFAULT_SEARCH_ORDER.to_string()
}

impl ScrapeRequest {
    /// Validate the request into a crawl mode.
    pub fn into_mode(self) -> Result<CrawlMode, ArxivError> {
        let quota = match self.arxiv_fields {
            Some(fields) => CategoryQuota::new(fields)?,
            None => CategoryQuota::default(),
        };

        match self.advanced {
            None => Ok(CrawlMode::Categories(quota)),
            Some(adv) => {
                let query = AdvancedSearch {
                    classification: adv.classification,
                    from_date: adv.from_date,
                    to_date: adv.to_date,
                    size: adv.size,
                    order: adv.order,
                };
                query.validate()?;
                Ok(CrawlMode::AdvancedSearch {
                    query,
                    fallback: quota,
                })
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct SuccessEnvelope<T> {
    status: &'static str,
    data: T,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    status: &'static str,
    message: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorEnvelope {
            status: "error",
            message: message.into(),
        }),
    )
        .into_response()
}

/// Build the service router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/scrap", post(scrape_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn root_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "Success",
        "message": "Api Is Online"
    }))
}

/// Health check endpoint
async fn health_handler() -> &'static str {
    "OK"
}

/// Scrape endpoint handler
///
/// The scrape runs in its own task and still merges its records when the
/// client disconnects before the response is ready.
async fn scrape_handler(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<ScrapeRequest>, JsonRejection>,
) -> Response {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(rejection) => {
            warn!(error = %rejection, "Malformed scrape request");
            return error_response(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };

    let mode = match req.into_mode() {
        Ok(mode) => mode,
        Err(e) => {
            warn!(error = %e, "Rejected scrape request");
            return error_response(StatusCode::BAD_REQUEST, e.to_string());
        }
    };

    let Ok(job) = Arc::clone(&state.job).try_lock_owned() else {
        warn!("Scrape requested while another one is running");
        return error_response(StatusCode::CONFLICT, "A scrape is already running");
    };

    info!(mode = mode_name(&mode), "Scrape request");
    let cancel = state.shutdown.child_token();
    let task_state = Arc::clone(&state);
    let task = tokio::spawn(async move {
        let _job = job;
        run_scrape(&task_state.config, &mode, &cancel).await
    });

    let result = match task.await {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "Scrape task panicked or was aborted");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Scrape task failed");
        }
    };

    match result {
        Ok(summary) => (
            StatusCode::OK,
            Json(SuccessEnvelope::<ScrapeSummary> {
                status: "success",
                data: summary,
            }),
        )
            .into_response(),
        Err(e) if e.is_config() => error_response(StatusCode::BAD_REQUEST, e.to_string()),
        Err(e) => {
            error!(error = %e, "Scrape failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

fn mode_name(mode: &CrawlMode) -> &'static str {
    match mode {
        CrawlMode::Categories(_) => "categories",
        CrawlMode::AdvancedSearch { .. } => "advanced",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults_to_builtin_table() {
        let mode = ScrapeRequest::default().into_mode().expect("valid request");
        match mode {
            CrawlMode::Categories(quota) => assert_eq!(quota, CategoryQuota::default()),
            other => panic!("unexpected mode {:?}", other),
        }
    }

    #[test]
    fn test_request_with_advanced_block() {
        let req: ScrapeRequest = serde_json::from_str(
            r#"{"arxiv_fields": {"cs": 30}, "advanced": {"classification": "computer_science", "from_date": "2024-01"}}"#,
        )
        .expect("valid json");
        match req.into_mode().expect("valid request") {
            CrawlMode::AdvancedSearch { query, fallback } => {
                assert_eq!(query.size, DEFAULT_SEARCH_SIZE);
                assert_eq!(query.from_date.as_deref(), Some("2024-01"));
                assert_eq!(fallback.get("cs"), Some(30));
            }
            other => panic!("unexpected mode {:?}", other),
        }
    }

    #[test]
    fn test_request_rejects_bad_values() {
        let req: ScrapeRequest =
            serde_json::from_str(r#"{"arxiv_fields": {"cs": -5}}"#).expect("valid json");
        assert!(req.into_mode().is_err());

        let req: ScrapeRequest = serde_json::from_str(
            r#"{"advanced": {"classification": "physics", "to_date": "2024-02-30"}}"#,
        )
        .expect("valid json");
        assert!(matches!(req.into_mode(), Err(ArxivError::InvalidDate { .. })));
    }

    use crate::config::DelayBounds;
    use axum::body::Body;
    use axum::extract::Path;
    use axum::http::Request;
    use axum::response::Html;
    use std::time::Duration;
    use tower::ServiceExt;

    /// Minimal stand-in for arxiv.org: two papers in every listing.
    async fn spawn_fake_arxiv() -> String {
        let app = Router::new()
            .route(
                "/list/{category}/pastweek",
                get(|| async {
                    Html(
                        r#"<dl>
                          <dt><a href="/abs/2401.00001" title="Abstract">arXiv:2401.00001</a></dt>
                          <dt><a href="/abs/2401.00002" title="Abstract">arXiv:2401.00002</a></dt>
                        </dl>"#,
                    )
                }),
            )
            .route(
                "/abs/{id}",
                get(|Path(id): Path<String>| async move {
                    Html(format!(
                        r#"<h1 class="title">Title: Paper {id}</h1>
                           <div class="authors">Authors: A. Author</div>
                           <div class="dateline">[Submitted on 1 Jan 2024]</div>
                           <blockquote class="abstract">Abstract: Text.</blockquote>"#
                    ))
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{}", addr)
    }

    fn test_state(base_url: &str, output_path: std::path::PathBuf) -> Arc<AppState> {
        Arc::new(AppState::new(CrawlConfig {
            base_url: base_url.to_string(),
            listing_delay: DelayBounds::none(),
            detail_delay: DelayBounds::none(),
            timeout_secs: 2,
            output_path,
            ..Default::default()
        }))
    }

    fn scrape_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/scrap")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn test_root_and_health() {
        let state = test_state("http://127.0.0.1:9", "unused.csv".into());

        let response = build_router(state.clone())
            .oneshot(Request::builder().uri("/").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "Success");
        assert_eq!(body["message"], "Api Is Online");

        let response = build_router(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_scrap_rejects_negative_count() {
        let dir = tempfile::tempdir().expect("tempdir");
        let output = dir.path().join("papers.csv");
        let state = test_state("http://127.0.0.1:9", output.clone());

        let response = build_router(state)
            .oneshot(scrape_request(r#"{"arxiv_fields": {"cs": -1}}"#))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["status"], "error");
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_scrap_conflicts_while_running() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = test_state("http://127.0.0.1:9", dir.path().join("papers.csv"));
        let _running = state.job.lock().await;

        let response = build_router(state.clone())
            .oneshot(scrape_request(r#"{"arxiv_fields": {"cs": 1}}"#))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_scrap_persists_results() {
        let base = spawn_fake_arxiv().await;
        let dir = tempfile::tempdir().expect("tempdir");
        let output = dir.path().join("nested").join("papers.csv");
        let state = test_state(&base, output.clone());

        let response = build_router(state)
            .oneshot(scrape_request(r#"{"arxiv_fields": {"cs": 3}}"#))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["status"], "success");
        assert_eq!(body["data"]["total_ids"], 2);
        assert_eq!(body["data"]["saved_rows"], 2);
        assert_eq!(body["data"]["report"]["listing"]["ok"], 1);

        let table = std::fs::read_to_string(&output).expect("table written");
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "id,title,authors,abstract,published_date,url,last_updated"
        );
        assert!(lines[1].starts_with("2401.00001,Paper 2401.00001,A. Author,Text.,Submitted on 1 Jan 2024,"));
    }

    #[tokio::test]
    async fn test_scrap_rejects_malformed_body_with_envelope() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = test_state("http://127.0.0.1:9", dir.path().join("papers.csv"));

        for body in [r#"{"arxiv_fields": {"cs": "ten"}}"#, "not json"] {
            let response = build_router(state.clone())
                .oneshot(scrape_request(body))
                .await
                .expect("response");
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let body = json_body(response).await;
            assert_eq!(body["status"], "error");
            assert!(body["message"].as_str().is_some_and(|m| !m.is_empty()));
        }
    }

    #[tokio::test]
    async fn test_scrap_survives_client_disconnect() {
        let base = spawn_fake_arxiv().await;
        let dir = tempfile::tempdir().expect("tempdir");
        let output = dir.path().join("papers.csv");
        let state = Arc::new(AppState::new(CrawlConfig {
            base_url: base,
            listing_delay: DelayBounds::none(),
            detail_delay: DelayBounds::new(0.4, 0.4),
            timeout_secs: 2,
            output_path: output.clone(),
            ..Default::default()
        }));

        // The client gives up long before both detail pages are fetched.
        let request = build_router(state.clone()).oneshot(scrape_request(r#"{"arxiv_fields": {"cs": 3}}"#));
        let gave_up = tokio::time::timeout(Duration::from_millis(200), request).await;
        assert!(gave_up.is_err());

        let mut finished = false;
        for _ in 0..100 {
            if output.exists() && state.job.try_lock().is_ok() {
                finished = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(finished, "scrape did not complete after the client left");

        let table = std::fs::read_to_string(&output).expect("table written");
        assert_eq!(table.lines().count(), 3);
    }
}
