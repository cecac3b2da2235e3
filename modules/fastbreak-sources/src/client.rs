//! Shared HTTP client with the throttling the upstream feeds require:
//! bounded concurrency, a minimum inter-request interval, exponential
//! backoff with jitter on transient failures, a hard per-run call budget,
//! and a cooldown window after an explicit 429.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::FetchError;

/// Throttle and retry parameters for one source.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub min_interval: Duration,
    pub concurrency: usize,
    pub call_budget: u32,
    pub cooldown: Duration,
}

impl FetchSettings {
    pub fn from_config(cfg: &fastbreak_common::Config) -> Self {
        Self {
            max_attempts: cfg.fetch_max_attempts,
            backoff_base: Duration::from_millis(cfg.fetch_backoff_base_ms),
            min_interval: Duration::from_millis(cfg.fetch_min_interval_ms),
            concurrency: cfg.fetch_concurrency,
            call_budget: cfg.fetch_call_budget,
            cooldown: Duration::from_secs(cfg.fetch_cooldown_secs),
        }
    }
}

/// What to do with a response, by status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Success,
    /// 429: pause the whole source before the next request.
    Cooldown,
    /// 408 or 5xx: retry this request with backoff.
    Retry,
    /// Other 4xx: hard rejection, do not retry.
    Reject,
}

fn classify(status: u16) -> Disposition {
    match status {
        200..=299 => Disposition::Success,
        429 => Disposition::Cooldown,
        408 => Disposition::Retry,
        500..=599 => Disposition::Retry,
        _ => Disposition::Reject,
    }
}

struct Throttle {
    semaphore: Semaphore,
    /// Earliest instant the next request may start.
    next_allowed: Mutex<Instant>,
    calls_used: AtomicU32,
}

pub struct RateLimitedClient {
    http: reqwest::Client,
    source: String,
    settings: FetchSettings,
    throttle: Arc<Throttle>,
}

impl RateLimitedClient {
    pub fn new(source: impl Into<String>, settings: FetchSettings) -> Self {
        let throttle = Arc::new(Throttle {
            semaphore: Semaphore::new(settings.concurrency.max(1)),
            next_allowed: Mutex::new(Instant::now()),
            calls_used: AtomicU32::new(0),
        });
        Self {
            http: reqwest::Client::new(),
            source: source.into(),
            settings,
            throttle,
        }
    }

    pub fn source_name(&self) -> &str {
        &self.source
    }

    /// GET a URL and parse the body as JSON, retrying transient failures.
    pub async fn get_json(&self, url: &str) -> Result<serde_json::Value, FetchError> {
        let mut last_message = String::new();

        for attempt in 1..=self.settings.max_attempts {
            self.charge_budget()?;

            // Permit closes over the whole request so concurrency covers the
            // in-flight time, not just the pacing wait.
            let _permit = self
                .throttle
                .semaphore
                .acquire()
                .await
                .map_err(|_| FetchError::Transient {
                    source_id: self.source.clone(),
                    attempts: attempt,
                    message: "throttle closed".to_string(),
                })?;
            self.pace().await;

            match self.http.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    match classify(status) {
                        Disposition::Success => {
                            return resp.json().await.map_err(|e| FetchError::Rejected {
                                source_id: self.source.clone(),
                                status,
                                message: format!("unparseable body: {e}"),
                            });
                        }
                        Disposition::Cooldown => {
                            let pause = retry_after(&resp).unwrap_or(self.settings.cooldown);
                            warn!(source = %self.source, pause_secs = pause.as_secs(), "Rate limited, cooling down");
                            self.defer(pause).await;
                            last_message = format!("status {status}");
                        }
                        Disposition::Retry => {
                            last_message = format!("status {status}");
                            debug!(source = %self.source, status, attempt, "Transient response, will retry");
                        }
                        Disposition::Reject => {
                            let message = resp.text().await.unwrap_or_default();
                            return Err(FetchError::Rejected {
                                source_id: self.source.clone(),
                                status,
                                message,
                            });
                        }
                    }
                }
                Err(e) => {
                    last_message = e.to_string();
                    debug!(source = %self.source, attempt, error = %e, "Request error, will retry");
                }
            }

            if attempt < self.settings.max_attempts {
                tokio::time::sleep(self.backoff(attempt)).await;
            }
        }

        Err(FetchError::Transient {
            source_id: self.source.clone(),
            attempts: self.settings.max_attempts,
            message: last_message,
        })
    }

    /// Count one call against the budget; fail once it is spent.
    fn charge_budget(&self) -> Result<(), FetchError> {
        let used = self.throttle.calls_used.fetch_add(1, Ordering::Relaxed);
        if used >= self.settings.call_budget {
            return Err(FetchError::BudgetExhausted {
                source_id: self.source.clone(),
                budget: self.settings.call_budget,
            });
        }
        Ok(())
    }

    /// Wait until the inter-request interval (and any active cooldown) has
    /// passed, then claim the next slot.
    async fn pace(&self) {
        let start = {
            let mut next = self.throttle.next_allowed.lock().await;
            let start = (*next).max(Instant::now());
            *next = start + self.settings.min_interval;
            start
        };
        tokio::time::sleep_until(start).await;
    }

    /// Push the next allowed request out by `pause` (429 cooldown).
    async fn defer(&self, pause: Duration) {
        let mut next = self.throttle.next_allowed.lock().await;
        let target = Instant::now() + pause;
        if target > *next {
            *next = target;
        }
    }

    /// Exponential backoff with jitter: base * 2^(attempt-1) plus up to half
    /// the base again.
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.settings.backoff_base;
        let exp = base.saturating_mul(1u32 << (attempt - 1).min(8));
        let jitter_ms = rand::rng().random_range(0..=base.as_millis().max(1) as u64 / 2);
        exp + Duration::from_millis(jitter_ms)
    }
}

fn retry_after(resp: &reqwest::Response) -> Option<Duration> {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
