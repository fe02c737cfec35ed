//! Convergence waiting
//!
//! Polls an observed-state function on a fixed interval until the value
//! satisfies a target predicate or the timeout runs out. The timeout is a
//! wall-clock deadline: a slow observation is cut off at it. With a prompt
//! observer the number of observations is `max(1, timeout / poll_interval)`.

use crate::error::{HarnessError, ObserveError};
use crate::types::Observation;
use chrono::{DateTime, Utc};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Target predicate plus timing budget
pub struct ConvergenceCheck<T> {
    target: String,
    predicate: Box<dyn Fn(&T) -> bool + Send + Sync>,
    timeout: Duration,
    poll_interval: Duration,
    not_before: Option<DateTime<Utc>>,
}

impl<T> ConvergenceCheck<T> {
    /// Wait for an arbitrary predicate, described by `target` in errors
    pub fn matching<P>(
        target: impl Into<String>,
        predicate: P,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Self
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self {
            target: target.into(),
            predicate: Box::new(predicate),
            timeout,
            poll_interval,
            not_before: None,
        }
    }

    /// Wait for the observed value to equal `expected`
    pub fn equals(expected: T, timeout: Duration, poll_interval: Duration) -> Self
    where
        T: PartialEq + fmt::Display + Send + Sync + 'static,
    {
        let target = format!("== {expected}");
        Self::matching(target, move |v: &T| *v == expected, timeout, poll_interval)
    }

    /// Reject observations sampled before `ts` (e.g. before the mutation was issued)
    #[must_use]
    pub fn with_not_before(mut self, ts: DateTime<Utc>) -> Self {
        self.not_before = Some(ts);
        self
    }

    /// Human-readable target
    #[inline]
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Total budget
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Spacing between observations
    #[inline]
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Number of observations the budget allows
    #[must_use]
    pub fn max_polls(&self) -> u32 {
        if self.poll_interval.is_zero() {
            return 1;
        }
        let polls = self.timeout.as_nanos() / self.poll_interval.as_nanos();
        u32::try_from(polls).unwrap_or(u32::MAX).max(1)
    }

    /// Whether `observation` counts as converged
    pub fn is_satisfied_by(&self, observation: &Observation<T>) -> bool {
        if self.is_stale(observation) {
            return false;
        }
        (self.predicate)(&observation.value)
    }

    fn is_stale(&self, observation: &Observation<T>) -> bool {
        self.not_before
            .is_some_and(|not_before| observation.observed_at < not_before)
    }
}

impl<T> fmt::Debug for ConvergenceCheck<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConvergenceCheck")
            .field("target", &self.target)
            .field("timeout", &self.timeout)
            .field("poll_interval", &self.poll_interval)
            .field("not_before", &self.not_before)
            .finish_non_exhaustive()
    }
}

/// Successful wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Convergence<T> {
    /// First value that satisfied the target
    pub value: T,
    /// Observations performed, including the successful one
    pub polls: u32,
    /// Time spent waiting
    pub elapsed: Duration,
}

/// Fixed-interval poller
pub struct ConvergenceWaiter;

impl ConvergenceWaiter {
    /// Poll `observe` until `check` is satisfied.
    ///
    /// Transient observer errors count as "not yet converged". The whole
    /// wait, slow observations included, ends at `timeout` after the start.
    ///
    /// # Errors
    /// - `HarnessError::Observation` on a permanent observer error
    /// - `HarnessError::ConvergenceTimeout` once the deadline passes or the
    ///   poll budget is spent
    pub async fn poll<T, F, Fut>(
        check: &ConvergenceCheck<T>,
        mut observe: F,
    ) -> Result<Convergence<T>, HarnessError>
    where
        T: fmt::Debug,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Observation<T>, ObserveError>>,
    {
        let started = Instant::now();
        let deadline = started + check.timeout;
        let max_polls = check.max_polls();
        let mut polls = 0;
        let mut last_observed: Option<String> = None;

        tracing::debug!(goal = %check.target, max_polls, "waiting for convergence");

        while polls < max_polls {
            polls += 1;
            let Ok(outcome) = tokio::time::timeout_at(deadline, observe()).await else {
                tracing::debug!(goal = %check.target, poll = polls, "observation cut off by deadline");
                break;
            };

            match outcome {
                Ok(observation) => {
                    if check.is_satisfied_by(&observation) {
                        let elapsed = started.elapsed();
                        tracing::info!(goal = %check.target, polls, ?elapsed, "converged");
                        return Ok(Convergence {
                            value: observation.value,
                            polls,
                            elapsed,
                        });
                    }
                    if check.is_stale(&observation) {
                        tracing::debug!(goal = %check.target, poll = polls, "ignoring stale observation");
                    }
                    last_observed = Some(format!("{:?}", observation.value));
                }
                Err(e) if e.is_transient() => {
                    tracing::debug!(goal = %check.target, poll = polls, error = %e, "observation not available yet");
                }
                Err(e) => {
                    tracing::error!(goal = %check.target, poll = polls, error = %e, "observer failed permanently");
                    return Err(HarnessError::Observation {
                        target: check.target.clone(),
                        source: e,
                    });
                }
            }

            if polls == max_polls {
                break;
            }
            let next = Instant::now() + check.poll_interval;
            if next >= deadline {
                break;
            }
            tokio::time::sleep_until(next).await;
        }

        let elapsed = started.elapsed();
        tracing::warn!(goal = %check.target, polls, ?elapsed, "convergence timed out");
        Err(HarnessError::ConvergenceTimeout {
            target: check.target.clone(),
            last_observed,
            polls,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        })
    }
}
