//! Retry and readiness polling with exponential backoff

use serde::Deserialize;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::error::Error;
use crate::error::Result;

/// Serde helpers for Duration as milliseconds
mod duration_millis {
    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serialize;
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

/// Retry strategy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    #[serde(with = "duration_millis", rename = "base_delay_ms")]
    pub base_delay: Duration,
    /// Upper bound on any single delay
    #[serde(with = "duration_millis", rename = "max_delay_ms")]
    pub max_delay: Duration,
    /// Backoff multiplier (exponential backoff)
    pub backoff_multiplier: f64,
    /// Jitter factor to avoid thundering herd
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    /// A short policy for request retries
    pub fn requests(max_retries: u32) -> Self {
        Self {
            max_attempts: max_retries + 1,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            ..Default::default()
        }
    }
}

/// Outcome of one readiness probe
#[derive(Debug, Clone, PartialEq)]
pub enum Probe<T> {
    /// The awaited condition holds
    Ready(T),
    /// Not there yet; the string describes the observed state
    Pending(String),
}

/// Retry executor with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create a new retry executor
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// The active configuration
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute an operation, retrying errors for which [`Error::is_retryable`] holds
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        let mut delay = self.config.base_delay;

        loop {
            attempt += 1;

            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        info!("Operation succeeded after {} attempts", attempt);
                    }
                    return Ok(result);
                }
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => {
                    if attempt >= self.config.max_attempts {
                        error!("Operation failed after {} attempts: {}", attempt, err);
                        return Err(err);
                    }

                    warn!(
                        "Operation failed on attempt {}, retrying in {:?}: {}",
                        attempt, delay, err
                    );
                    tokio::time::sleep(self.jittered(delay)).await;
                    delay = self.next_delay(delay);
                }
            }
        }
    }

    /// Poll `probe` until it reports [`Probe::Ready`]
    ///
    /// Retryable probe errors count as pending. Gives up with
    /// [`Error::NotReady`] after `max_attempts` probes.
    pub async fn poll_until<F, Fut, T>(&self, what: &str, mut probe: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Probe<T>>>,
    {
        let mut attempt = 0;
        let mut delay = self.config.base_delay;
        let mut last_state = String::from("unknown");

        while attempt < self.config.max_attempts {
            attempt += 1;

            match probe().await {
                Ok(Probe::Ready(value)) => {
                    debug!("{} ready after {} probes", what, attempt);
                    return Ok(value);
                }
                Ok(Probe::Pending(state)) => last_state = state,
                Err(err) if err.is_retryable() => last_state = err.to_string(),
                Err(err) => return Err(err),
            }

            if attempt < self.config.max_attempts {
                debug!("{} still {}, next probe in {:?}", what, last_state, delay);
                tokio::time::sleep(self.jittered(delay)).await;
                delay = self.next_delay(delay);
            }
        }

        Err(Error::NotReady(format!(
            "{} not ready after {} probes (last state: {})",
            what, attempt, last_state
        )))
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        std::cmp::min(
            Duration::from_millis(
                (delay.as_millis() as f64 * self.config.backoff_multiplier) as u64,
            ),
            self.config.max_delay,
        )
    }

    fn jittered(&self, delay: Duration) -> Duration {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::Hash;
        use std::hash::Hasher;
        let mut hasher = DefaultHasher::new();
        std::time::SystemTime::now().hash(&mut hasher);
        let hash = hasher.finish();
        let jitter = ((hash % 1000) as f64 / 1000.0 - 0.5) * 2.0 * self.config.jitter_factor;
        Duration::from_millis((delay.as_millis() as f64 * (1.0 + jitter)) as u64)
    }
}
