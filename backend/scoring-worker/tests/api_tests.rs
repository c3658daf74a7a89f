use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use tower::ServiceExt;

use exam_scoring::{
    config::{Config, WorkerSettings},
    create_router,
    services::AppState,
    utils::retry::RetryPolicy,
};

fn test_config() -> Config {
    Config {
        mongo_uri: "mongodb://localhost:27017".into(),
        mongo_database: "exam_prep_test".into(),
        http_addr: "127.0.0.1:0".into(),
        otlp_endpoint: None,
        queue: None,
        scoring: WorkerSettings::scoring_defaults(),
        percentile: WorkerSettings::percentile_defaults(),
        retry: RetryPolicy::default(),
    }
}

async fn test_state() -> Arc<AppState> {
    let config = test_config();
    // The driver connects lazily; no server is needed for these routes
    let mongo_client = mongodb::Client::with_uri_str(&config.mongo_uri)
        .await
        .unwrap();
    Arc::new(AppState::new(config, mongo_client).await.unwrap())
}

#[tokio::test]
async fn test_without_queue_no_workers_are_started() {
    let state = test_state().await;
    assert!(state.queue.is_none());
    assert!(state.workers().is_empty());
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_job_metrics() {
    exam_scoring::metrics::JOBS_PROCESSED_TOTAL
        .with_label_values(&["test-scoring", "completed"])
        .inc();

    let app = create_router(test_state().await);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("scoring_jobs_processed_total"));
}

#[tokio::test]
async fn test_health_reports_workers_disabled_without_queue() {
    let app = create_router(test_state().await);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    // MongoDB may or may not be reachable here; the body shape is what matters
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(body["service"], "exam-scoring-worker");
    assert_eq!(body["workers"]["status"], "disabled");
    assert_eq!(body["dependencies"]["queue"]["status"], "disabled");
    let expected = if status == StatusCode::OK {
        "healthy"
    } else {
        "degraded"
    };
    assert_eq!(body["status"], expected);
}
