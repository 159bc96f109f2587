//! Bounded retries around a store

use super::{DeletePredicate, FetchRequest, IndexSink, MeasurementSource};
use crate::config::StoreSettings;
use crate::error::IndexError;
use crate::types::{IndexRow, MeasurementRow};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Attempt budget for transient storage errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&StoreSettings::default())
    }
}

impl From<&StoreSettings> for RetryPolicy {
    fn from(settings: &StoreSettings) -> Self {
        Self {
            max_attempts: settings.maximum_query_retries.max(1),
            delay: Duration::try_from_secs_f64(settings.query_retry_delay_seconds)
                .unwrap_or(Duration::ZERO),
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds, fails permanently, or the budget runs out
    pub fn run<T, F>(&self, operation: &str, mut op: F) -> Result<T, IndexError>
    where
        F: FnMut() -> Result<T, IndexError>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < attempts => {
                    tracing::error!(
                        "{operation} failed (attempt {attempt}/{attempts}): {e}"
                    );
                    std::thread::sleep(self.delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Store wrapper retrying transient fetch and write failures
#[derive(Debug, Clone)]
pub struct RetryingStore<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S> RetryingStore<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: MeasurementSource> MeasurementSource for RetryingStore<S> {
    fn fetch(&self, request: &FetchRequest) -> Result<Vec<MeasurementRow>, IndexError> {
        self.policy.run("fetch", || self.inner.fetch(request))
    }

    fn earliest_time(&self) -> Result<Option<DateTime<Utc>>, IndexError> {
        self.policy.run("earliest time query", || self.inner.earliest_time())
    }
}

impl<S: IndexSink> IndexSink for RetryingStore<S> {
    fn write_index_rows(&mut self, rows: &[IndexRow], fingerprint: &str) -> Result<(), IndexError> {
        let inner = &mut self.inner;
        self.policy
            .run("index write", || inner.write_index_rows(rows, fingerprint))
    }

    fn delete_rows(&mut self, predicate: &DeletePredicate) -> Result<usize, IndexError> {
        let inner = &mut self.inner;
        self.policy.run("delete", || inner.delete_rows(predicate))
    }

    fn latest_index_time(&self, fingerprint: &str) -> Result<Option<DateTime<Utc>>, IndexError> {
        self.policy
            .run("latest index query", || self.inner.latest_index_time(fingerprint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Window;
    use std::cell::Cell;

    /// Source failing a fixed number of times before answering
    struct FlakySource {
        failures_left: Cell<u32>,
        calls: Cell<u32>,
        permanent: bool,
    }

    impl FlakySource {
        fn new(failures: u32) -> Self {
            Self {
                failures_left: Cell::new(failures),
                calls: Cell::new(0),
                permanent: false,
            }
        }
    }

    impl MeasurementSource for FlakySource {
        fn fetch(&self, _request: &FetchRequest) -> Result<Vec<MeasurementRow>, IndexError> {
            self.calls.set(self.calls.get() + 1);
            if self.permanent {
                return Err(IndexError::ParseError("corrupt response".to_string()));
            }
            if self.failures_left.get() > 0 {
                self.failures_left.set(self.failures_left.get() - 1);
                return Err(IndexError::Fetch("connection reset".to_string()));
            }
            Ok(Vec::new())
        }

        fn earliest_time(&self) -> Result<Option<DateTime<Utc>>, IndexError> {
            Ok(None)
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: Duration::ZERO,
        }
    }

    fn request() -> FetchRequest {
        let now = Utc::now();
        FetchRequest::new(Window::new(now - chrono::Duration::hours(1), now))
    }

    #[test]
    fn test_retries_transient_errors() {
        let store = RetryingStore::new(FlakySource::new(2), policy(3));
        assert!(store.fetch(&request()).is_ok());
        assert_eq!(store.inner().calls.get(), 3);
    }

    #[test]
    fn test_exhausted_retries_propagate() {
        let store = RetryingStore::new(FlakySource::new(5), policy(3));
        let err = store.fetch(&request()).unwrap_err();
        assert!(matches!(err, IndexError::Fetch(_)));
        assert_eq!(store.inner().calls.get(), 3);
    }

    #[test]
    fn test_permanent_errors_are_not_retried() {
        let mut source = FlakySource::new(0);
        source.permanent = true;
        let store = RetryingStore::new(source, policy(3));
        assert!(store.fetch(&request()).is_err());
        assert_eq!(store.inner().calls.get(), 1);
    }

    #[test]
    fn test_policy_from_settings() {
        let settings = StoreSettings {
            maximum_query_retries: 0,
            query_retry_delay_seconds: 0.5,
        };
        let policy = RetryPolicy::from(&settings);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.delay, Duration::from_millis(500));
    }
}
