/// Retry policy for transient data-source failures.
///
/// Exponential backoff: `initial_backoff * multiplier^attempt`, capped at
/// `max_backoff`. Only errors that report themselves as transient are
/// retried; validation and permanent remote errors surface immediately.

use std::time::Duration;

use crate::config::RetryConfig;
use crate::logging::{self, DataSource};
use crate::model::{WeatherError, WeatherResult};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    /// Cap for exponential growth.
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            backoff_multiplier: config.backoff_multiplier,
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Sleep before retry number `attempt` (0-based).
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let millis = self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    pub fn should_retry(&self, error: &WeatherError, attempt: u32) -> bool {
        error.is_transient() && attempt < self.max_retries
    }

    /// Run `operation`, sleeping between transient failures.
    pub fn run<T, F>(
        &self,
        source: DataSource,
        station_id: Option<&str>,
        label: &str,
        operation: F,
    ) -> WeatherResult<T>
    where
        F: FnMut() -> WeatherResult<T>,
    {
        self.run_with_sleep(source, station_id, label, operation, std::thread::sleep)
    }

    /// `run` with an injectable sleep, so tests do not wait.
    pub fn run_with_sleep<T, F, S>(
        &self,
        source: DataSource,
        station_id: Option<&str>,
        label: &str,
        mut operation: F,
        mut sleep: S,
    ) -> WeatherResult<T>
    where
        F: FnMut() -> WeatherResult<T>,
        S: FnMut(Duration),
    {
        let mut attempt = 0;
        loop {
            match operation() {
                Ok(value) => return Ok(value),
                Err(err) if self.should_retry(&err, attempt) => {
                    let backoff = self.backoff_for_attempt(attempt);
                    logging::warn(
                        source,
                        station_id,
                        &format!(
                            "{} failed (attempt {}/{}), retrying in {} ms: {}",
                            label,
                            attempt + 1,
                            self.max_retries + 1,
                            backoff.as_millis(),
                            err
                        ),
                    );
                    sleep(backoff);
                    attempt += 1;
                }
                Err(err) => {
                    logging::log_failure(source, station_id, label, &err);
                    return Err(err);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn transient() -> WeatherError {
        WeatherError::DataSourceUnavailable {
            data_source: DataSource::BigQuery,
            context: "station=USW00023183".to_string(),
            detail: "HTTP 503".to_string(),
            transient: true,
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1_000),
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn test_default_matches_config_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.initial_backoff, Duration::from_millis(500));
        assert_eq!(policy.max_backoff, Duration::from_millis(8_000));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = policy(10);
        assert_eq!(policy.backoff_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_for_attempt(3), Duration::from_millis(800));
        assert_eq!(policy.backoff_for_attempt(4), Duration::from_millis(1_000));
        assert_eq!(policy.backoff_for_attempt(30), Duration::from_millis(1_000));
    }

    #[test]
    fn test_transient_failure_then_success() {
        let calls = Cell::new(0);
        let mut slept = Vec::new();
        let result = policy(3).run_with_sleep(
            DataSource::BigQuery,
            Some("USW00023183"),
            "observations",
            || {
                calls.set(calls.get() + 1);
                if calls.get() < 3 { Err(transient()) } else { Ok(42) }
            },
            |d| slept.push(d),
        );
        assert_eq!(result, Ok(42));
        assert_eq!(calls.get(), 3);
        assert_eq!(slept, vec![Duration::from_millis(100), Duration::from_millis(200)]);
    }

    #[test]
    fn test_gives_up_after_max_retries() {
        let calls = Cell::new(0);
        let result: WeatherResult<()> = policy(2).run_with_sleep(
            DataSource::BigQuery,
            None,
            "observations",
            || {
                calls.set(calls.get() + 1);
                Err(transient())
            },
            |_| {},
        );
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_permanent_failure_is_not_retried() {
        let calls = Cell::new(0);
        let result: WeatherResult<()> = policy(5).run_with_sleep(
            DataSource::Mirror,
            None,
            "observations",
            || {
                calls.set(calls.get() + 1);
                Err(WeatherError::MalformedResponse("bad row".into()))
            },
            |_| panic!("must not sleep"),
        );
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_no_retry_makes_one_attempt() {
        let calls = Cell::new(0);
        let _ = RetryPolicy::no_retry().run_with_sleep(
            DataSource::BigQuery,
            None,
            "observations",
            || -> WeatherResult<()> {
                calls.set(calls.get() + 1);
                Err(transient())
            },
            |_| {},
        );
        assert_eq!(calls.get(), 1);
    }
}
