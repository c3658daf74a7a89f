use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};

use crate::metrics;
use crate::models::jobs::JobKind;
use crate::queue::JobSource;
use crate::services::AppState;

const MONGO_PING_TIMEOUT: Duration = Duration::from_secs(1);
const REDIS_PING_TIMEOUT: Duration = Duration::from_millis(500);

/// Result of checking one part of the service. `disabled` dependencies never degrade
/// the overall status.
struct Check {
    healthy: bool,
    report: Value,
}

impl Check {
    fn healthy(report: Value) -> Self {
        Self {
            healthy: true,
            report,
        }
    }

    fn unhealthy(error: impl std::fmt::Display) -> Self {
        Self {
            healthy: false,
            report: json!({ "status": "unhealthy", "error": error.to_string() }),
        }
    }

    fn disabled() -> Self {
        Self::healthy(json!({ "status": "disabled" }))
    }
}

/// Reports MongoDB, the job queue and the worker loops. Any unhealthy part
/// turns the response into a 503 so a stalled pipeline is visible to orchestrators.
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mongodb = check_mongodb(&state).await;
    let queue = check_queue(&state).await;
    let workers = check_workers(&state);

    let healthy = mongodb.healthy && queue.healthy && workers.healthy;
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(json!({
            "status": if healthy { "healthy" } else { "degraded" },
            "service": "exam-scoring-worker",
            "version": env!("CARGO_PKG_VERSION"),
            "dependencies": {
                "mongodb": mongodb.report,
                "queue": queue.report,
            },
            "workers": workers.report,
        })),
    )
}

async fn check_mongodb(state: &AppState) -> Check {
    let ping = state.mongo.run_command(mongodb::bson::doc! { "ping": 1 });
    match tokio::time::timeout(MONGO_PING_TIMEOUT, ping).await {
        Ok(Ok(_)) => Check::healthy(json!({ "status": "healthy" })),
        Ok(Err(e)) => Check::unhealthy(format!("MongoDB error: {}", e)),
        Err(_) => Check::unhealthy("MongoDB timeout after 1s"),
    }
}

async fn check_queue(state: &AppState) -> Check {
    let Some(queue) = &state.queue else {
        return Check::disabled();
    };

    match tokio::time::timeout(REDIS_PING_TIMEOUT, queue.ping()).await {
        Ok(Ok(())) => {
            let mut pending = serde_json::Map::new();
            for kind in JobKind::ALL {
                if let Ok(depth) = queue.depth(kind).await {
                    pending.insert(kind.as_str().to_string(), json!(depth));
                }
            }
            Check::healthy(json!({ "status": "healthy", "pending": pending }))
        }
        Ok(Err(e)) => Check::unhealthy(format!("Redis error: {}", e)),
        Err(_) => Check::unhealthy("Redis timeout after 500ms"),
    }
}

fn check_workers(state: &AppState) -> Check {
    if state.queue.is_none() {
        return Check::disabled();
    }
    Check {
        healthy: state.worker_states.all_running(),
        report: json!(state.worker_states.snapshot()),
    }
}

pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::render_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to render metrics: {}", e),
        ),
    }
}
