//! Background connectivity verification
//!
//! A verifier runs a probe on an interval in its own tokio task for the
//! duration of a phase. The task owns its session and hands every result
//! back through the join handle, so results are only read after the task
//! has fully terminated.
//!
//! # Lifecycle
//!
//! ```text
//! start() ──► [probe, tick, probe, tick, ...] ──► stop() ──► cancel ─► join ─► evaluate
//! ```
//!
//! Cancellation is checked before every attempt, the first one included, so
//! no probe starts once `stop()` has been called. A probe that is already in
//! flight always completes and is accounted for. Callers that need at least
//! one attempt wait for [`VerifierHandle::first_attempt`] before proceeding.

use crate::error::{HarnessError, ProbeFailureReport};
use crate::probe::{ConnectivityProbe, ProbeResult};
use crate::types::{SessionId, Transport};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// State owned by one background task
struct VerificationSession {
    id: SessionId,
    transport: Transport,
    interval: Duration,
    cancel: watch::Receiver<bool>,
    first_attempt: Option<oneshot::Sender<()>>,
    results: Vec<ProbeResult>,
}

impl VerificationSession {
    async fn run(self, probe: Arc<dyn ConnectivityProbe>) -> Vec<ProbeResult> {
        let Self {
            id,
            transport,
            interval,
            mut cancel,
            mut first_attempt,
            mut results,
        } = self;

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            if *cancel.borrow() {
                break;
            }
            if let Some(started) = first_attempt.take() {
                let _ = started.send(());
            }

            let result = probe.attempt(transport).await;
            if !result.success {
                tracing::warn!(
                    session = %id,
                    %transport,
                    error = result.error.as_deref().unwrap_or("unknown"),
                    "background probe failed"
                );
            }
            results.push(result);

            // A dropped sender counts as cancellation too.
            let cancelled = tokio::select! {
                biased;
                _ = cancel.changed() => true,
                _ = ticker.tick() => false,
            };
            if cancelled {
                break;
            }
        }

        tracing::debug!(session = %id, attempts = results.len(), "verification session ended");
        results
    }
}

/// Starts background verification sessions
pub struct BackgroundVerifier;

impl BackgroundVerifier {
    /// Launch a task probing `transport` every `interval`.
    ///
    /// The first probe runs as soon as the task is scheduled. Must be called
    /// from within a tokio runtime.
    #[must_use = "dropping the handle aborts verification without evaluating it"]
    pub fn start(
        probe: Arc<dyn ConnectivityProbe>,
        transport: Transport,
        interval: Duration,
    ) -> VerifierHandle {
        let id = SessionId::new();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (started_tx, started_rx) = oneshot::channel();
        let session = VerificationSession {
            id,
            transport,
            interval,
            cancel: cancel_rx,
            first_attempt: Some(started_tx),
            results: Vec::new(),
        };

        tracing::info!(session = %id, %transport, ?interval, "starting background verification");
        let task = tokio::spawn(session.run(probe));

        VerifierHandle {
            id,
            transport,
            started: Instant::now(),
            cancel: cancel_tx,
            first_attempt: Some(started_rx),
            task: Some(task),
        }
    }
}

/// What a clean session observed
#[derive(Debug, Clone)]
pub struct VerificationSummary {
    /// Session identifier
    pub session: SessionId,
    /// Transport verified
    pub transport: Transport,
    /// Probes attempted
    pub attempts: usize,
    /// Time between start and stop
    pub duration: Duration,
}

/// Handle to a running verification session.
///
/// `stop` consumes the handle, so a session can be stopped exactly once.
/// Dropping a handle without stopping it cancels and aborts the task.
#[derive(Debug)]
pub struct VerifierHandle {
    id: SessionId,
    transport: Transport,
    started: Instant,
    cancel: watch::Sender<bool>,
    first_attempt: Option<oneshot::Receiver<()>>,
    task: Option<JoinHandle<Vec<ProbeResult>>>,
}

impl VerifierHandle {
    /// Session identifier
    #[inline]
    #[must_use]
    pub fn session(&self) -> SessionId {
        self.id
    }

    /// Transport being verified
    #[inline]
    #[must_use]
    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Wait until the session has started its first probe.
    ///
    /// Returns immediately on later calls, or if the task ended before
    /// probing at all.
    pub async fn first_attempt(&mut self) {
        if let Some(started) = self.first_attempt.take() {
            let _ = started.await;
        }
    }

    /// Cancel, wait for the task to finish, and evaluate every result.
    ///
    /// # Errors
    /// - `HarnessError::ProbeFailures` listing every failed attempt
    /// - `HarnessError::VerifierCrashed` if the task panicked
    pub async fn stop(mut self) -> Result<VerificationSummary, HarnessError> {
        let _ = self.cancel.send(true);
        let duration = self.started.elapsed();

        let Some(task) = self.task.take() else {
            return Err(HarnessError::VerifierCrashed(format!(
                "session {} has no task",
                self.id
            )));
        };

        let results = task
            .await
            .map_err(|e| HarnessError::VerifierCrashed(format!("session {}: {e}", self.id)))?;

        let attempts = results.len();
        let failures: Vec<ProbeResult> = results.into_iter().filter(|r| !r.success).collect();

        tracing::info!(
            session = %self.id,
            transport = %self.transport,
            attempts,
            failures = failures.len(),
            "stopped background verification"
        );

        if failures.is_empty() {
            Ok(VerificationSummary {
                session: self.id,
                transport: self.transport,
                attempts,
                duration,
            })
        } else {
            Err(HarnessError::ProbeFailures(ProbeFailureReport {
                session: self.id,
                transport: self.transport,
                attempts,
                failures,
            }))
        }
    }
}

impl Drop for VerifierHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = self.cancel.send(true);
            task.abort();
            tracing::error!(session = %self.id, "verifier dropped without stop(); results discarded");
        }
    }
}

/// Run `work` while verifying `transport` in the background.
///
/// `work` starts once the first probe is under way. The verifier is stopped
/// after `work` completes whatever its outcome.
/// Returns the work output alongside the verification outcome.
pub async fn with_background_verification<F, T>(
    probe: Arc<dyn ConnectivityProbe>,
    transport: Transport,
    interval: Duration,
    work: F,
) -> (T, Result<VerificationSummary, HarnessError>)
where
    F: Future<Output = T>,
{
    let mut handle = BackgroundVerifier::start(probe, transport, interval);
    handle.first_attempt().await;
    let output = work.await;
    let verification = handle.stop().await;
    (output, verification)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Probe whose outcome can be flipped and whose attempts are counted
    struct SwitchProbe {
        healthy: AtomicBool,
        attempts: AtomicUsize,
        in_flight: AtomicUsize,
        latency: Duration,
    }

    impl SwitchProbe {
        fn new(healthy: bool, latency: Duration) -> Arc<Self> {
            Arc::new(Self {
                healthy: AtomicBool::new(healthy),
                attempts: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                latency,
            })
        }
    }

    #[async_trait::async_trait]
    impl ConnectivityProbe for SwitchProbe {
        async fn attempt(&self, transport: Transport) -> ProbeResult {
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            self.attempts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.latency).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.healthy.load(Ordering::SeqCst) {
                ProbeResult::ok(transport)
            } else {
                ProbeResult::failed(transport, "connection refused")
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_phase_stops_clean() {
        let probe = SwitchProbe::new(true, Duration::ZERO);
        let handle = BackgroundVerifier::start(probe.clone(), Transport::Plaintext, Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(3500)).await;
        let summary = handle.stop().await.unwrap();

        assert_eq!(summary.attempts, 4);
        assert_eq!(summary.transport, Transport::Plaintext);
    }

    #[tokio::test(start_paused = true)]
    async fn outage_is_reported_with_every_failure() {
        let probe = SwitchProbe::new(false, Duration::ZERO);
        let handle = BackgroundVerifier::start(probe.clone(), Transport::Tls, Duration::from_secs(1));

        tokio::time::sleep(Duration::from_secs(3)).await;
        let err = handle.stop().await.unwrap_err();

        match err {
            HarnessError::ProbeFailures(report) => {
                assert!(report.failures.len() >= 3);
                assert_eq!(report.failures.len(), report.attempts);
                assert_eq!(report.transport, Transport::Tls);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_probe_is_accounted_for() {
        let probe = SwitchProbe::new(true, Duration::from_millis(800));
        let handle = BackgroundVerifier::start(probe.clone(), Transport::Plaintext, Duration::from_secs(1));

        // Stop while the second probe is mid-flight.
        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(probe.in_flight.load(Ordering::SeqCst), 1);
        let summary = handle.stop().await.unwrap();

        assert_eq!(probe.in_flight.load(Ordering::SeqCst), 0);
        assert_eq!(summary.attempts, probe.attempts.load(Ordering::SeqCst));
        assert_eq!(summary.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn no_probe_starts_after_stop() {
        let probe = SwitchProbe::new(true, Duration::ZERO);
        let handle = BackgroundVerifier::start(probe.clone(), Transport::Plaintext, Duration::from_millis(100));

        tokio::time::sleep(Duration::from_millis(250)).await;
        let summary = handle.stop().await.unwrap();
        let seen = probe.attempts.load(Ordering::SeqCst);
        assert_eq!(summary.attempts, seen);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(probe.attempts.load(Ordering::SeqCst), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_first_tick_starts_no_probe() {
        let probe = SwitchProbe::new(false, Duration::ZERO);
        let handle = BackgroundVerifier::start(probe.clone(), Transport::Plaintext, Duration::from_secs(10));

        let summary = handle.stop().await.unwrap();
        assert_eq!(summary.attempts, 0);
        assert_eq!(probe.attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn first_attempt_guarantees_one_probe() {
        let probe = SwitchProbe::new(false, Duration::from_millis(50));
        let mut handle = BackgroundVerifier::start(probe.clone(), Transport::Tls, Duration::from_secs(10));

        handle.first_attempt().await;
        handle.first_attempt().await;
        let err = handle.stop().await.unwrap_err();

        assert!(matches!(err, HarnessError::ProbeFailures(ref r) if r.attempts == 1));
        assert_eq!(probe.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_seen_between_attempts_stops_the_loop() {
        let probe = SwitchProbe::new(true, Duration::from_millis(300));
        let mut handle = BackgroundVerifier::start(probe.clone(), Transport::Plaintext, Duration::from_millis(100));
        handle.first_attempt().await;

        // The first probe is still in flight when cancellation is sent.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let summary = handle.stop().await.unwrap();

        assert_eq!(summary.attempts, 1);
        assert_eq!(probe.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_handle_aborts_task() {
        let probe = SwitchProbe::new(true, Duration::ZERO);
        let handle = BackgroundVerifier::start(probe.clone(), Transport::Plaintext, Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(150)).await;
        drop(handle);

        let seen = probe.attempts.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(probe.attempts.load(Ordering::SeqCst), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn scoped_helper_always_stops() {
        let probe = SwitchProbe::new(true, Duration::ZERO);
        let switch = probe.clone();

        let (output, verification) = with_background_verification(
            probe.clone(),
            Transport::Plaintext,
            Duration::from_secs(1),
            async move {
                tokio::time::sleep(Duration::from_millis(2500)).await;
                switch.healthy.store(false, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(1)).await;
                Err::<(), _>("mutation failed")
            },
        )
        .await;

        assert!(output.is_err());
        let err = verification.unwrap_err();
        assert!(matches!(err, HarnessError::ProbeFailures(ref r) if r.failures.len() == 1));
    }
}
