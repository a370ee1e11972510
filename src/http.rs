use crate::orchestrator::Orchestrator;
use crate::runner::CommandRunner;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use std::sync::Arc;

pub struct HttpAppState<R: CommandRunner> {
    pub orchestrator: Arc<Orchestrator<R>>,
}

impl<R: CommandRunner> Clone for HttpAppState<R> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: Arc::clone(&self.orchestrator),
        }
    }
}

pub fn build_router<R: CommandRunner>(orchestrator: Arc<Orchestrator<R>>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler::<R>))
        .route("/api/state", get(state_handler::<R>))
        .with_state(HttpAppState { orchestrator })
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler<R: CommandRunner>(State(app): State<HttpAppState<R>>) -> Response {
    match app.orchestrator.scrape().await {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {err}"),
        )
            .into_response(),
    }
}

async fn state_handler<R: CommandRunner>(State(app): State<HttpAppState<R>>) -> impl IntoResponse {
    let guard = app.orchestrator.state().read().await;
    Json(guard.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::{df::DfSource, Source};
    use crate::context::ZoneContext;
    use crate::runner::fake::{Canned, FakeRunner};
    use crate::state::State as ExporterState;
    use axum::body::to_bytes;
    use axum::http::Request;
    use std::time::Duration;
    use tokio::sync::RwLock;
    use tower::ServiceExt;

    fn app(runner: FakeRunner) -> Router {
        let sources: Vec<Arc<dyn Source>> = vec![Arc::new(DfSource)];
        let state = Arc::new(RwLock::new(ExporterState::new(ZoneContext::Guest, 10)));
        let orchestrator = Orchestrator::new(Arc::new(runner), sources, state, Duration::from_secs(1))
            .expect("orchestrator");
        build_router(Arc::new(orchestrator))
    }

    async fn get_text(app: Router, uri: &str) -> (StatusCode, Option<String>, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, content_type, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let (status, _, body) = get_text(app(FakeRunner::default()), "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn metrics_runs_a_collection() {
        let runner = FakeRunner::default().with(
            "df",
            Canned::Stdout("Filesystem Size Used Avail Use% Mounted on\nnvme0 100G 40G 60G 40% /data\n".into()),
        );
        let (status, content_type, body) = get_text(app(runner), "/metrics").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("text/plain; version=0.0.4"));
        assert!(body.contains("smartos_df_used_bytes{device=\"nvme0\",mountpoint=\"/data\"} 40"));
        assert!(body.contains("smartos_exporter_collector_success{collector=\"df\"} 1"));
        assert!(body.contains("smartos_exporter_uptime_seconds"));
    }

    #[tokio::test]
    async fn metrics_still_served_when_collector_fails() {
        let runner = FakeRunner::default().with("df", Canned::Exit(2));
        let (status, _, body) = get_text(app(runner), "/metrics").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("smartos_exporter_collect_errors_total{collector=\"df\"} 1"));
        assert!(!body.contains("smartos_df_size_bytes{"));
    }

    #[tokio::test]
    async fn api_state_returns_json() {
        let runner = FakeRunner::default().with("df", Canned::Missing);
        let router = app(runner);
        get_text(router.clone(), "/metrics").await;

        let (status, _, body) = get_text(router, "/api/state").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["context"], "guest");
        assert_eq!(json["started_at_unix"], 10);
        assert_eq!(json["collectors"]["df"]["ok"], false);
        assert!(json["collectors"]["df"]["last_error"]
            .as_str()
            .unwrap()
            .contains("not found"));
    }
}
