//! Shared request pacer with 429/5xx backoff and Retry-After support.
//!
//! One `Pacer` is shared by every call a provider instance makes, the change
//! stream included. It provides:
//! - A minimum spacing between outbound requests (the current "sleep")
//! - Exponential growth of that spacing on transient failures, decay on success
//! - Retry-After header parsing (seconds format)
//! - `call()`, which retries an operation a bounded number of times

use reqwest::Response;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use super::ProviderError;

/// Configuration for pacing and retry behavior
#[derive(Debug, Clone)]
pub struct HttpRetryConfig {
    /// Retries granted to a single upload chunk (default: 1)
    pub max_retries: u32,
    /// Minimum spacing between requests in milliseconds (default: 10)
    pub base_delay_ms: u64,
    /// Maximum spacing cap in milliseconds (default: 2000)
    pub max_delay_ms: u64,
    /// Growth factor applied on failure, divisor applied on success (default: 2.0)
    pub backoff_multiplier: f64,
}

impl Default for HttpRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            base_delay_ms: 10,
            max_delay_ms: 2_000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Determine if a status code is retryable
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Parse Retry-After header value
pub fn parse_retry_after(response: &Response) -> Option<Duration> {
    let value = response.headers().get("retry-after")?.to_str().ok()?;

    if let Ok(secs) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(secs.min(300))); // Cap at 5 minutes
    }

    // HTTP-date format is not parsed; numeric seconds covers what the API sends.
    None
}

/// Calculate delay for a given retry attempt with jitter
pub fn calculate_delay(attempt: u32, config: &HttpRetryConfig) -> Duration {
    let base = config.base_delay_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let capped = base.min(config.max_delay_ms as f64);
    // 10-30% jitter so reconnecting clients spread out
    let jitter = capped * (0.1 + rand::random::<f64>() * 0.2);
    Duration::from_millis((capped + jitter) as u64)
}

#[derive(Debug)]
struct PacerState {
    /// Earliest instant the next request may start
    next_slot: Instant,
    /// Current spacing between requests
    sleep: Duration,
    /// Consecutive failures since the last success
    failures: u32,
}

/// Rate limiter and backoff primitive shared across all request types
#[derive(Debug)]
pub struct Pacer {
    config: HttpRetryConfig,
    state: Mutex<PacerState>,
}

impl Default for Pacer {
    fn default() -> Self {
        Self::new(HttpRetryConfig::default())
    }
}

impl Pacer {
    pub fn new(config: HttpRetryConfig) -> Self {
        let sleep = Duration::from_millis(config.base_delay_ms);
        Self {
            config,
            state: Mutex::new(PacerState {
                next_slot: Instant::now(),
                sleep,
                failures: 0,
            }),
        }
    }

    pub fn config(&self) -> &HttpRetryConfig {
        &self.config
    }

    fn min_sleep(&self) -> Duration {
        Duration::from_millis(self.config.base_delay_ms)
    }

    fn max_sleep(&self) -> Duration {
        Duration::from_millis(self.config.max_delay_ms)
    }

    /// Current spacing between requests (grows while the remote is failing)
    pub fn current_sleep(&self) -> Duration {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).sleep
    }

    /// Consecutive failures recorded since the last success
    pub fn failures(&self) -> u32 {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).failures
    }

    /// Wait for a request slot. Slots are handed out in call order, spaced by
    /// the current sleep.
    pub async fn acquire(&self) {
        let wait_until = {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            let now = Instant::now();
            let slot = state.next_slot.max(now);
            state.next_slot = slot + state.sleep;
            slot
        };
        tokio::time::sleep_until(wait_until).await;
    }

    /// Record a success: the spacing decays back towards the minimum
    pub fn succeeded(&self) {
        let min = self.min_sleep();
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.failures = 0;
        if state.sleep > min {
            let decayed = state.sleep.as_secs_f64() / self.config.backoff_multiplier.max(1.0);
            state.sleep = Duration::from_secs_f64(decayed).max(min);
        }
    }

    /// Record a transient failure: one backoff step, or the server's Retry-After
    pub fn failed(&self, retry_after: Option<Duration>) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.failures = state.failures.saturating_add(1);
        let stepped = calculate_delay(state.failures, &self.config).min(self.max_sleep());
        state.sleep = retry_after.unwrap_or(stepped).max(self.min_sleep());
        // The failed call already consumed its slot, push the next one out
        state.next_slot = Instant::now() + state.sleep;
    }

    /// Run `op` under the pacer, retrying transient failures up to `max_retries` times.
    ///
    /// Permanent errors are returned immediately without a retry.
    pub async fn call<T, F, Fut>(&self, max_retries: u32, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 0u32;
        loop {
            self.acquire().await;
            match op().await {
                Ok(value) => {
                    self.succeeded();
                    return Ok(value);
                }
                Err(e) if e.is_recoverable() => {
                    self.failed(e.retry_after());
                    if attempt >= max_retries {
                        return Err(e);
                    }
                    attempt += 1;
                    tracing::debug!(
                        "Transient failure: {}. Retry {}/{} after {:?}",
                        e, attempt, max_retries, self.current_sleep()
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn remote(status: u16) -> ProviderError {
        ProviderError::Remote { status, body: String::new(), retry_after: None }
    }

    #[test]
    fn test_is_retryable_status() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(500));
        assert!(is_retryable_status(502));
        assert!(is_retryable_status(503));
        assert!(is_retryable_status(504));
        assert!(!is_retryable_status(200));
        assert!(!is_retryable_status(400));
        assert!(!is_retryable_status(401));
        assert!(!is_retryable_status(404));
    }

    #[test]
    fn test_calculate_delay_bounded() {
        let config = HttpRetryConfig::default();
        for attempt in 0..10 {
            let delay = calculate_delay(attempt, &config);
            assert!(delay.as_millis() <= (config.max_delay_ms as u128 * 2)); // With jitter
        }
    }

    #[test]
    fn test_failure_grows_and_success_decays() {
        let pacer = Pacer::default();
        let min = Duration::from_millis(pacer.config().base_delay_ms);
        assert_eq!(pacer.current_sleep(), min);

        pacer.failed(None);
        let grown = pacer.current_sleep();
        assert!(grown > min);
        assert_eq!(pacer.failures(), 1);

        for _ in 0..20 {
            pacer.succeeded();
        }
        assert_eq!(pacer.current_sleep(), min);
        assert_eq!(pacer.failures(), 0);
    }

    #[test]
    fn test_retry_after_overrides_backoff() {
        let pacer = Pacer::default();
        pacer.failed(Some(Duration::from_millis(750)));
        assert_eq!(pacer.current_sleep(), Duration::from_millis(750));
    }

    #[tokio::test]
    async fn test_call_retries_transient_once() {
        let pacer = Pacer::default();
        let attempts = AtomicU32::new(0);
        let result = pacer.call(1, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(remote(503))
                } else {
                    Ok("done")
                }
            }
        }).await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_call_gives_up_after_retry_budget() {
        let pacer = Pacer::default();
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = pacer.call(1, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async move { Err(remote(502)) }
        }).await;
        assert_eq!(result.unwrap_err().status(), Some(502));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_call_does_not_retry_permanent() {
        let pacer = Pacer::default();
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = pacer.call(3, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async move { Err(remote(400)) }
        }).await;
        assert_eq!(result.unwrap_err().status(), Some(400));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
