//! Retry-on-error with a fixed delay between tries.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::short_type_name;

const DEFAULT_MAX_TRIES: u32 = 5;
const DEFAULT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RetryError {
    #[error("max_tries must be greater than 0, got {0}")]
    InvalidMaxTries(u32),
}

/// How often to try and how long to wait in between.
///
/// The operation receives the zero-based index of the current try. The
/// error of the last try is returned untouched once all tries are used up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    max_tries: u32,
    delay: Duration,
    suppress_logger: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_tries: DEFAULT_MAX_TRIES,
            delay: DEFAULT_DELAY,
            suppress_logger: false,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_tries: u32) -> Result<Self, RetryError> {
        if max_tries == 0 {
            return Err(RetryError::InvalidMaxTries(max_tries));
        }
        Ok(Self {
            max_tries,
            ..Self::default()
        })
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Do not log a warning before each retry.
    pub fn suppress_logger(mut self, suppress_logger: bool) -> Self {
        self.suppress_logger = suppress_logger;
        self
    }

    pub fn max_tries(&self) -> u32 {
        self.max_tries
    }

    /// Runs `op` until it succeeds or `max_tries` is reached, blocking the
    /// thread during the delay.
    pub fn run<T, E, F>(&self, name: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
        E: Display,
    {
        let mut current_try = 0;
        loop {
            match op(current_try) {
                Ok(value) => return Ok(value),
                Err(err) if current_try + 1 >= self.max_tries => return Err(err),
                Err(err) => {
                    self.report(name, current_try, &err);
                    std::thread::sleep(self.delay);
                }
            }
            current_try += 1;
        }
    }

    /// Async variant of [`RetryPolicy::run`]; waits with `tokio::time::sleep`.
    pub async fn run_async<T, E, F, Fut>(&self, name: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut current_try = 0;
        loop {
            match op(current_try).await {
                Ok(value) => return Ok(value),
                Err(err) if current_try + 1 >= self.max_tries => return Err(err),
                Err(err) => {
                    self.report(name, current_try, &err);
                    tokio::time::sleep(self.delay).await;
                }
            }
            current_try += 1;
        }
    }

    /// Binds this policy to `op`, so it can be called repeatedly.
    pub fn wrap<F>(self, name: impl Into<String>, op: F) -> Retrying<F> {
        Retrying {
            name: name.into(),
            policy: self,
            op,
        }
    }

    fn report<E: Display>(&self, name: &str, current_try: u32, err: &E) {
        if self.suppress_logger {
            return;
        }
        tracing::warn!("Function '{name}' failed with error:");
        tracing::warn!("  {}: {err}", short_type_name::<E>());
        tracing::warn!("  Retry {} of {}...", current_try + 2, self.max_tries);
    }
}

/// An operation bound to a [`RetryPolicy`]. Returned by [`RetryPolicy::wrap`].
#[derive(Debug)]
pub struct Retrying<F> {
    name: String,
    policy: RetryPolicy,
    op: F,
}

impl<F> Retrying<F> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call<T, E>(&mut self) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
        E: Display,
    {
        self.policy.run(&self.name, &mut self.op)
    }
}

/// Shorthand for `policy.run(name, op)`.
pub fn retry<T, E, F>(name: &str, policy: RetryPolicy, op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Result<T, E>,
    E: Display,
{
    policy.run(name, op)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Instant;
    use tracing_test::traced_test;

    #[derive(Debug, Error, PartialEq, Eq)]
    enum Flaky {
        #[error("error")]
        Value,
        #[error("second error")]
        Runtime,
    }

    fn quick(max_tries: u32) -> RetryPolicy {
        RetryPolicy::new(max_tries)
            .unwrap()
            .delay(Duration::from_millis(10))
    }

    #[test]
    fn success_on_first_try() {
        let mut calls = 0;
        let result = quick(5).run("first", |_| {
            calls += 1;
            Ok::<_, Flaky>(42)
        });

        assert_eq!(result, Ok(42));
        assert_eq!(calls, 1);
    }

    #[test]
    #[traced_test]
    fn success_on_second_try_logs_the_retry() {
        let mut calls = 0;
        let result = quick(5).run("mock_func", |_| {
            calls += 1;
            if calls < 2 { Err(Flaky::Value) } else { Ok(42) }
        });

        assert_eq!(result, Ok(42));
        assert_eq!(calls, 2);
        assert!(logs_contain("Function 'mock_func' failed with error:"));
        assert!(logs_contain("  Flaky: error"));
        assert!(logs_contain("  Retry 2 of 5..."));
    }

    #[test]
    fn exhausts_all_tries_and_returns_the_last_error() {
        let mut calls = 0;
        let result = quick(3).run("always", |current_try| {
            calls += 1;
            Err::<(), _>(if current_try == 2 { Flaky::Runtime } else { Flaky::Value })
        });

        assert_eq!(result, Err(Flaky::Runtime));
        assert_eq!(calls, 3);
    }

    #[test]
    fn waits_between_tries() {
        let policy = RetryPolicy::default().delay(Duration::from_millis(100));
        let start = Instant::now();

        let result = policy.run("slow", |current_try| {
            if current_try == 0 { Err(Flaky::Value) } else { Ok(42) }
        });

        assert_eq!(result, Ok(42));
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn current_try_counts_from_zero() {
        let mut tries = Vec::new();
        let result = quick(3).run("track", |current_try| {
            tries.push(current_try);
            if tries.len() < 3 { Err(Flaky::Value) } else { Ok(()) }
        });

        assert_eq!(result, Ok(()));
        assert_eq!(tries, vec![0, 1, 2]);
    }

    #[test]
    #[traced_test]
    fn suppressed_logger_stays_quiet() {
        let result = quick(2)
            .suppress_logger(true)
            .run("quiet", |current_try| {
                if current_try == 0 { Err(Flaky::Value) } else { Ok(42) }
            });

        assert_eq!(result, Ok(42));
        assert!(!logs_contain("failed with error"));
    }

    #[test]
    fn zero_tries_are_rejected() {
        assert_eq!(RetryPolicy::new(0), Err(RetryError::InvalidMaxTries(0)));
        assert_eq!(
            RetryError::InvalidMaxTries(0).to_string(),
            "max_tries must be greater than 0, got 0"
        );
        assert_eq!(RetryPolicy::default().max_tries(), 5);
    }

    #[test]
    fn wrapped_operation_keeps_its_name_and_can_be_called_again() {
        let mut calls = 0;
        let mut wrapped = quick(2).wrap("my_function", |_| {
            calls += 1;
            if calls % 2 == 1 { Err(Flaky::Value) } else { Ok(calls) }
        });

        assert_eq!(wrapped.name(), "my_function");
        assert_eq!(wrapped.call(), Ok(2));
        assert_eq!(wrapped.call(), Ok(4));
    }

    #[test]
    fn free_function_uses_the_policy() {
        let mut calls = 0;
        let result = retry("unit", quick(2), |_| {
            calls += 1;
            if calls < 2 { Err(Flaky::Value) } else { Ok(()) }
        });

        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn async_variant_retries() {
        let mut tries = Vec::new();
        let result = quick(3)
            .run_async("async", |current_try| {
                tries.push(current_try);
                async move {
                    if current_try < 2 { Err(Flaky::Value) } else { Ok("done") }
                }
            })
            .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(tries, vec![0, 1, 2]);
    }
}
