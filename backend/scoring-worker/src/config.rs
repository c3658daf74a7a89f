use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::utils::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub mongo_uri: String,
    pub mongo_database: String,
    pub http_addr: String,
    pub otlp_endpoint: Option<String>,
    /// `None` disables the scoring and percentile workers.
    pub queue: Option<QueueConfig>,
    pub scoring: WorkerSettings,
    pub percentile: WorkerSettings,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub redis_uri: String,
    pub key_prefix: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSettings {
    pub concurrency: usize,
    pub max_jobs_per_second: u32,
    pub poll_interval: Duration,
}

impl WorkerSettings {
    pub fn scoring_defaults() -> Self {
        Self {
            concurrency: 10,
            max_jobs_per_second: 100,
            poll_interval: Duration::from_millis(500),
        }
    }

    pub fn percentile_defaults() -> Self {
        Self {
            concurrency: 5,
            max_jobs_per_second: 50,
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Reads `key` from the layered settings, falling back to the plain
/// environment variable `env_key`.
fn lookup(settings: &config::Config, key: &str, env_key: &str) -> Option<String> {
    settings
        .get_string(key)
        .ok()
        .or_else(|| env::var(env_key).ok())
        .filter(|value| !value.trim().is_empty())
}

fn parse_or<T: FromStr>(
    settings: &config::Config,
    key: &str,
    env_key: &str,
    default: T,
) -> Result<T, config::ConfigError> {
    match lookup(settings, key, env_key) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            config::ConfigError::Message(format!("invalid value for {}: {:?}", key, raw))
        }),
        None => Ok(default),
    }
}

fn worker_settings(
    settings: &config::Config,
    name: &str,
    defaults: WorkerSettings,
) -> Result<WorkerSettings, config::ConfigError> {
    let upper = name.to_uppercase();
    let concurrency = parse_or(
        settings,
        &format!("{}.concurrency", name),
        &format!("{}_CONCURRENCY", upper),
        defaults.concurrency,
    )?;
    let max_jobs_per_second = parse_or(
        settings,
        &format!("{}.max_jobs_per_second", name),
        &format!("{}_MAX_JOBS_PER_SECOND", upper),
        defaults.max_jobs_per_second,
    )?;
    let poll_interval_ms = parse_or(
        settings,
        &format!("{}.poll_interval_ms", name),
        &format!("{}_POLL_INTERVAL_MS", upper),
        defaults.poll_interval.as_millis() as u64,
    )?;

    if concurrency == 0 {
        return Err(config::ConfigError::Message(format!(
            "{}.concurrency must be at least 1",
            name
        )));
    }

    Ok(WorkerSettings {
        concurrency,
        max_jobs_per_second,
        poll_interval: Duration::from_millis(poll_interval_ms),
    })
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Root .env first, then the local one
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/*.toml + APP__ overrides
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let mongo_uri = lookup(&settings, "database.mongo_uri", "MONGO_URI")
            .unwrap_or_else(|| "mongodb://localhost:27017".to_string());

        let mongo_database = lookup(&settings, "database.mongo_database", "MONGO_DATABASE")
            .unwrap_or_else(|| "exam_prep".to_string());

        let http_addr = lookup(&settings, "http.addr", "HTTP_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8082".to_string());

        let otlp_endpoint = lookup(&settings, "telemetry.otlp_endpoint", "OTEL_EXPORTER_OTLP_ENDPOINT");

        let queue = lookup(&settings, "redis.uri", "REDIS_URI").map(|redis_uri| QueueConfig {
            redis_uri,
            key_prefix: lookup(&settings, "queue.prefix", "QUEUE_PREFIX")
                .unwrap_or_else(|| "exam-jobs".to_string()),
        });

        let scoring = worker_settings(&settings, "scoring", WorkerSettings::scoring_defaults())?;
        let percentile =
            worker_settings(&settings, "percentile", WorkerSettings::percentile_defaults())?;

        let retry_defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: parse_or(
                &settings,
                "retry.max_attempts",
                "JOB_MAX_ATTEMPTS",
                retry_defaults.max_attempts,
            )?,
            base_backoff: Duration::from_millis(parse_or(
                &settings,
                "retry.base_backoff_ms",
                "JOB_BASE_BACKOFF_MS",
                retry_defaults.base_backoff.as_millis() as u64,
            )?),
            max_backoff: Duration::from_millis(parse_or(
                &settings,
                "retry.max_backoff_ms",
                "JOB_MAX_BACKOFF_MS",
                retry_defaults.max_backoff.as_millis() as u64,
            )?),
            jitter_max: retry_defaults.jitter_max,
        };

        Ok(Config {
            mongo_uri,
            mongo_database,
            http_addr,
            otlp_endpoint,
            queue,
            scoring,
            percentile,
            retry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: [&str; 6] = [
        "REDIS_URI",
        "QUEUE_PREFIX",
        "SCORING_CONCURRENCY",
        "PERCENTILE_MAX_JOBS_PER_SECOND",
        "JOB_MAX_ATTEMPTS",
        "MONGO_DATABASE",
    ];

    fn clear_env() {
        for key in KEYS {
            env::remove_var(key);
        }
        env::set_var("SKIP_ROOT_ENV", "1");
    }

    #[test]
    #[serial]
    fn queue_is_disabled_without_redis_uri() {
        clear_env();
        let config = Config::load().unwrap();

        assert!(config.queue.is_none());
        assert_eq!(config.scoring, WorkerSettings::scoring_defaults());
        assert_eq!(config.percentile, WorkerSettings::percentile_defaults());
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    #[serial]
    fn env_overrides_worker_settings() {
        clear_env();
        env::set_var("REDIS_URI", "redis://127.0.0.1:6379/0");
        env::set_var("SCORING_CONCURRENCY", "4");
        env::set_var("PERCENTILE_MAX_JOBS_PER_SECOND", "7");
        env::set_var("JOB_MAX_ATTEMPTS", "8");

        let config = Config::load().unwrap();
        clear_env();

        let queue = config.queue.unwrap();
        assert_eq!(queue.redis_uri, "redis://127.0.0.1:6379/0");
        assert_eq!(queue.key_prefix, "exam-jobs");
        assert_eq!(config.scoring.concurrency, 4);
        assert_eq!(config.percentile.max_jobs_per_second, 7);
        assert_eq!(config.retry.max_attempts, 8);
    }

    #[test]
    #[serial]
    fn invalid_number_is_an_error() {
        clear_env();
        env::set_var("SCORING_CONCURRENCY", "many");

        let result = Config::load();
        clear_env();

        assert!(result.is_err());
    }
}
