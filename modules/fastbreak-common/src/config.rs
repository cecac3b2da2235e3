use std::env;

/// Application configuration loaded from environment variables.
/// CLI flags may override scope and stage selection on top of this.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres
    pub database_url: String,

    // Chunking
    pub chunk_size: usize,
    /// Chunks of the same stage executed concurrently. 1 = sequential.
    pub chunk_workers: usize,

    // Fetch client defaults (per-source overrides are applied in wiring)
    pub fetch_max_attempts: u32,
    pub fetch_backoff_base_ms: u64,
    pub fetch_min_interval_ms: u64,
    pub fetch_concurrency: usize,
    pub fetch_call_budget: u32,
    pub fetch_cooldown_secs: u64,

    /// Re-select entities whose flag is `partial` on later runs.
    pub reattempt_partial: bool,

    /// Seconds before an abandoned run lease expires.
    pub lease_ttl_secs: i64,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            chunk_size: env_or("CHUNK_SIZE", 100),
            chunk_workers: env_or("CHUNK_WORKERS", 1),
            fetch_max_attempts: env_or("FETCH_MAX_ATTEMPTS", 3),
            fetch_backoff_base_ms: env_or("FETCH_BACKOFF_BASE_MS", 300),
            fetch_min_interval_ms: env_or("FETCH_MIN_INTERVAL_MS", 600),
            fetch_concurrency: env_or("FETCH_CONCURRENCY", 4),
            fetch_call_budget: env_or("FETCH_CALL_BUDGET", 5_000),
            fetch_cooldown_secs: env_or("FETCH_COOLDOWN_SECS", 30),
            reattempt_partial: env_or("REATTEMPT_PARTIAL", 1u8) != 0,
            lease_ttl_secs: env_or("LEASE_TTL_SECS", 3_600),
        }
    }

    /// Log the non-secret parts of the configuration.
    pub fn log_summary(&self) {
        tracing::info!(
            chunk_size = self.chunk_size,
            chunk_workers = self.chunk_workers,
            fetch_max_attempts = self.fetch_max_attempts,
            fetch_call_budget = self.fetch_call_budget,
            reattempt_partial = self.reattempt_partial,
            "Config loaded"
        );
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(v) => v
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a valid number, got {v:?}")),
        Err(_) => default,
    }
}
