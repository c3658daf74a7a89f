use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    Encoder, Histogram, HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};

lazy_static! {
    // Job Metrics
    pub static ref JOBS_PROCESSED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "scoring_jobs_processed_total",
        "Total number of queue jobs processed, by outcome",
        &["queue", "outcome"]
    )
    .unwrap();

    pub static ref JOB_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "scoring_job_duration_seconds",
        "Queue job handling duration in seconds",
        &["queue"],
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    pub static ref JOBS_PUBLISHED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "scoring_jobs_published_total",
        "Total number of jobs pushed onto the queue",
        &["queue"]
    )
    .unwrap();

    // Grading Metrics
    pub static ref RESPONSES_GRADED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "responses_graded_total",
        "Total number of graded responses",
        &["question_type", "result"]
    )
    .unwrap();

    pub static ref ORPHANED_RESPONSES_TOTAL: IntCounter = register_int_counter!(
        "orphaned_responses_total",
        "Responses skipped because their question is not part of the test"
    )
    .unwrap();

    pub static ref PERCENTILE_POPULATION_SIZE: Histogram = register_histogram!(
        "percentile_population_size",
        "Number of submitted attempts ranked per percentile recompute",
        vec![1.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0, 10000.0, 50000.0]
    )
    .unwrap();

    // Database Metrics (MongoDB)
    pub static ref DB_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "db_operations_total",
        "Total number of database operations",
        &["operation", "collection", "status"]
    )
    .unwrap();

    pub static ref DB_OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "db_operation_duration_seconds",
        "Database operation duration in seconds",
        &["operation", "collection"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

/// Helper: track database operation with metrics
pub async fn track_db_operation<F, T, E>(operation: &str, collection: &str, future: F) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };

    DB_OPERATIONS_TOTAL
        .with_label_values(&[operation, collection, status])
        .inc();

    DB_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation, collection])
        .observe(duration);

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        let _ = JOBS_PROCESSED_TOTAL
            .with_label_values(&["test-scoring", "completed"])
            .get();
        let _ = ORPHANED_RESPONSES_TOTAL.get();
    }

    #[test]
    fn test_render_metrics() {
        RESPONSES_GRADED_TOTAL
            .with_label_values(&["numerical", "correct"])
            .inc();

        let output = render_metrics().unwrap();
        assert!(output.contains("responses_graded_total"));
    }

    #[tokio::test]
    async fn test_track_db_operation_counts_errors() {
        let before = DB_OPERATIONS_TOTAL
            .with_label_values(&["find", "metrics_test", "error"])
            .get();

        let result: Result<(), &str> =
            track_db_operation("find", "metrics_test", async { Err("boom") }).await;

        assert!(result.is_err());
        let after = DB_OPERATIONS_TOTAL
            .with_label_values(&["find", "metrics_test", "error"])
            .get();
        assert_eq!(after, before + 1);
    }
}
