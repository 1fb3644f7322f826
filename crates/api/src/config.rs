use std::time::Duration;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// How long to wait for background tasks on shutdown (default: `10`).
    pub shutdown_timeout_secs: u64,
    /// PostgreSQL URL. Batches are kept in memory when unset.
    pub database_url: Option<String>,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                 |
    /// |-------------------------|-------------------------|
    /// | `HOST`                  | `0.0.0.0`               |
    /// | `PORT`                  | `3000`                  |
    /// | `CORS_ORIGINS`          | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`                    |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `10`                    |
    /// | `DATABASE_URL`          | unset                   |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|s| !s.trim().is_empty());

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            database_url,
        }
    }
}

/// Which render backends to register at startup.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Fixed delay of the preview backend.
    pub simulated_delay: Duration,
    /// Share of preview jobs that fail, `0.0..=1.0`.
    pub simulated_failure_rate: f64,
    /// Render farm endpoint. The farm backend is only registered when set.
    pub render_farm_url: Option<String>,
    pub render_farm_api_key: Option<String>,
    pub render_poll_interval: Duration,
    /// Backend used for jobs without an `engine` dimension.
    pub default_backend: Option<String>,
}

impl RenderConfig {
    /// | Env Var                   | Default |
    /// |---------------------------|---------|
    /// | `SIMULATED_DELAY_MS`      | `1500`  |
    /// | `SIMULATED_FAILURE_RATE`  | `0.0`   |
    /// | `RENDER_FARM_URL`         | unset   |
    /// | `RENDER_FARM_API_KEY`     | unset   |
    /// | `RENDER_POLL_INTERVAL_MS` | `2000`  |
    /// | `DEFAULT_RENDER_BACKEND`  | unset   |
    pub fn from_env() -> Self {
        let simulated_delay_ms: u64 = std::env::var("SIMULATED_DELAY_MS")
            .unwrap_or_else(|_| "1500".into())
            .parse()
            .expect("SIMULATED_DELAY_MS must be a valid u64");

        let simulated_failure_rate = parse_failure_rate(
            &std::env::var("SIMULATED_FAILURE_RATE").unwrap_or_else(|_| "0.0".into()),
        );

        let render_poll_interval_ms: u64 = std::env::var("RENDER_POLL_INTERVAL_MS")
            .unwrap_or_else(|_| "2000".into())
            .parse()
            .expect("RENDER_POLL_INTERVAL_MS must be a valid u64");

        let optional = |key: &str| std::env::var(key).ok().filter(|s| !s.trim().is_empty());

        Self {
            simulated_delay: Duration::from_millis(simulated_delay_ms),
            simulated_failure_rate,
            render_farm_url: optional("RENDER_FARM_URL"),
            render_farm_api_key: optional("RENDER_FARM_API_KEY"),
            render_poll_interval: Duration::from_millis(render_poll_interval_ms),
            default_backend: optional("DEFAULT_RENDER_BACKEND"),
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            simulated_delay: Duration::from_millis(1500),
            simulated_failure_rate: 0.0,
            render_farm_url: None,
            render_farm_api_key: None,
            render_poll_interval: Duration::from_secs(2),
            default_backend: None,
        }
    }
}

/// Parse a failure probability, clamped to `0.0..=1.0`. NaN and infinities
/// are configuration errors.
fn parse_failure_rate(raw: &str) -> f64 {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|rate| rate.is_finite())
        .expect("SIMULATED_FAILURE_RATE must be a finite number")
        .clamp(0.0, 1.0)
}
