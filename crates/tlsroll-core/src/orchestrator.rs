//! Staged transition orchestrator
//!
//! Sequences the phases of a scenario. Within a phase:
//!
//! 1. Start the background verifier (if any) and let its first probe begin
//! 2. Validate and apply the mutation
//! 3. Wait for the rollout to report ready
//! 4. Wait for the observed mode to converge
//! 5. Stop the verifier, always, even after a failure in 2-4
//! 6. Check post-conditions in order, up to the first violation, and only
//!    if nothing failed so far
//!
//! Setup failures abort the run before any phase. A failed phase causes
//! the remaining phases to be recorded as skipped unless the configuration
//! asks to continue.

use crate::collaborators::Collaborators;
use crate::config::HarnessConfig;
use crate::convergence::{ConvergenceCheck, ConvergenceWaiter};
use crate::error::HarnessError;
use crate::phase::{PhaseAssertion, Scenario, TransitionPhase};
use crate::report::{PhaseFailure, PhaseOutcome, PhaseStatus, RunReport};
use crate::state_machine::ModeLadder;
use crate::types::{Mode, Observation, ResourceRef};
use crate::verifier::BackgroundVerifier;
use chrono::Utc;
use tokio::time::Instant;

/// Runs scenarios against one resource
#[derive(Debug)]
pub struct StagedTransitionOrchestrator {
    config: HarnessConfig,
    resource: ResourceRef,
    collaborators: Collaborators,
}

impl StagedTransitionOrchestrator {
    /// Create an orchestrator
    #[must_use]
    pub fn new(config: HarnessConfig, resource: ResourceRef, collaborators: Collaborators) -> Self {
        Self {
            config,
            resource,
            collaborators,
        }
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Provision, then execute every phase in declared order.
    pub async fn run(&self, scenario: &Scenario) -> RunReport {
        let mut report = RunReport::new(&scenario.name);
        tracing::info!(
            scenario = %scenario.name,
            resource = %self.resource,
            phases = scenario.phases.len(),
            "starting scenario"
        );

        if let Err(err) = self.provision().await {
            tracing::error!(error = %err, "setup failed; no phase will run");
            report.setup_failure = Some(PhaseFailure::from(&err));
            return report;
        }

        let mut mode = scenario.initial_mode;
        let mut first_failure: Option<String> = None;

        for phase in &scenario.phases {
            if let Some(after) = &first_failure {
                if !self.config.continue_after_failure {
                    tracing::warn!(phase = %phase.name, after = %after, "skipping phase");
                    report.phases.push(PhaseOutcome::skipped(&phase.name, after));
                    continue;
                }
            }

            let outcome = self.run_phase(phase, &scenario.ladder, &mut mode).await;
            if !outcome.passed() && first_failure.is_none() {
                first_failure = Some(phase.name.clone());
            }
            report.phases.push(outcome);
        }

        tracing::info!(scenario = %scenario.name, passed = report.passed(), "scenario finished");
        report
    }

    async fn provision(&self) -> Result<(), HarnessError> {
        self.collaborators
            .provisioner
            .provision(&self.resource)
            .await
            .map_err(HarnessError::Setup)
    }

    /// Execute one phase. `mode` tracks the last requested mode.
    pub async fn run_phase(
        &self,
        phase: &TransitionPhase,
        ladder: &ModeLadder,
        mode: &mut Mode,
    ) -> PhaseOutcome {
        let started_at = Utc::now();
        let clock = Instant::now();
        tracing::info!(phase = %phase.name, "starting phase");

        let mut verifier = phase.background.map(|transport| {
            BackgroundVerifier::start(
                self.collaborators.probe.clone(),
                transport,
                self.config.background_interval(),
            )
        });
        if let Some(handle) = verifier.as_mut() {
            handle.first_attempt().await;
        }

        let mut errors = Vec::new();
        if let Err(err) = self.apply_and_converge(phase, ladder, mode).await {
            tracing::error!(phase = %phase.name, error = %err, "phase step failed");
            errors.push(err);
        }

        let mut probe_attempts = 0;
        if let Some(handle) = verifier {
            match handle.stop().await {
                Ok(summary) => probe_attempts = summary.attempts,
                Err(err) => {
                    if let HarnessError::ProbeFailures(report) = &err {
                        probe_attempts = report.attempts;
                    }
                    tracing::error!(phase = %phase.name, error = %err, "availability violated");
                    errors.push(err);
                }
            }
        }

        if errors.is_empty() {
            for assertion in &phase.assertions {
                if let Err(err) = self.check(assertion).await {
                    tracing::error!(phase = %phase.name, %assertion, error = %err, "post-condition failed");
                    errors.push(err);
                    break;
                }
            }
        }

        let status = if errors.is_empty() {
            PhaseStatus::Passed
        } else {
            PhaseStatus::Failed
        };
        let duration_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::info!(phase = %phase.name, ?status, duration_ms, "phase finished");

        PhaseOutcome {
            name: phase.name.clone(),
            status,
            failures: errors.iter().map(PhaseFailure::from).collect(),
            probe_attempts,
            started_at: Some(started_at),
            duration_ms,
        }
    }

    async fn apply_and_converge(
        &self,
        phase: &TransitionPhase,
        ladder: &ModeLadder,
        mode: &mut Mode,
    ) -> Result<(), HarnessError> {
        let mut issued_at = None;

        if let Some(target) = phase.mutation {
            ladder.validate_transition(*mode, target)?;
            issued_at = Some(Utc::now());
            self.collaborators
                .mutator
                .set_mode(&self.resource, target)
                .await
                .map_err(|source| HarnessError::Mutation {
                    mode: target,
                    source,
                })?;
            tracing::info!(from = %mode, to = %target, "mode change requested");
            *mode = target;
        }

        if phase.await_ready {
            self.await_ready().await?;
        }

        if let Some(target) = phase.convergence {
            let mut check =
                ConvergenceCheck::equals(target.mode, target.timeout, self.config.poll_interval());
            if let Some(ts) = issued_at {
                check = check.with_not_before(ts);
            }
            ConvergenceWaiter::poll(&check, || {
                self.collaborators.state.current_mode(&self.resource)
            })
            .await?;
        }

        Ok(())
    }

    async fn await_ready(&self) -> Result<(), HarnessError> {
        let check = ConvergenceCheck::matching(
            "ready",
            |ready: &bool| *ready,
            self.config.readiness_timeout(),
            self.config.readiness_poll_interval(),
        );
        let readiness = &self.collaborators.readiness;
        let resource = &self.resource;

        ConvergenceWaiter::poll(&check, || async move {
            readiness.is_ready(resource).await.map(Observation::now)
        })
        .await
        .map(|_| ())
        .map_err(|err| match err {
            HarnessError::ConvergenceTimeout {
                polls, elapsed_ms, ..
            } => HarnessError::ReadinessTimeout {
                resource: resource.to_string(),
                polls,
                elapsed_ms,
            },
            HarnessError::Observation { source, .. } => HarnessError::Readiness {
                resource: resource.to_string(),
                source,
            },
            other => other,
        })
    }

    async fn check(&self, assertion: &PhaseAssertion) -> Result<(), HarnessError> {
        match *assertion {
            PhaseAssertion::ConnectivitySucceeds(transport) => {
                let result = self.collaborators.probe.attempt(transport).await;
                if result.success {
                    Ok(())
                } else {
                    Err(HarnessError::Assertion(format!(
                        "expected {transport} connectivity to succeed, attempt at {} failed: {}",
                        result.timestamp.to_rfc3339(),
                        result.error.as_deref().unwrap_or("unknown error")
                    )))
                }
            }
            PhaseAssertion::ConnectivityFails(transport) => {
                let result = self.collaborators.probe.attempt(transport).await;
                if result.success {
                    Err(HarnessError::Assertion(format!(
                        "expected {transport} connectivity to fail, attempt at {} succeeded",
                        result.timestamp.to_rfc3339()
                    )))
                } else {
                    Ok(())
                }
            }
            PhaseAssertion::InternalAuthConfigured {
                replicas,
                transport,
            } => self
                .collaborators
                .auth
                .verify_internal_auth(replicas, transport)
                .await
                .map_err(|e| {
                    HarnessError::Assertion(format!(
                        "internal auth on {replicas} replicas over {transport}: {e:#}"
                    ))
                }),
        }
    }
}
