//! Error types for tlsroll
//!
//! Provides the failure taxonomy reported per phase:
//! - Accumulated probe failures from a background verifier
//! - Convergence and readiness timeouts
//! - Setup (provisioning) failures
//! - Synchronous assertion violations
//! - Collaborator faults (mutator, observers) kept apart from the above

use crate::probe::ProbeResult;
use crate::types::{Mode, SessionId, Transport};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Main harness error type
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// A background verifier recorded at least one failed probe
    #[error("{0}")]
    ProbeFailures(ProbeFailureReport),

    /// Observed state never satisfied the target
    #[error(
        "convergence timeout: target {target} not reached after {polls} polls ({elapsed_ms}ms), last observed: {}",
        .last_observed.as_deref().unwrap_or("nothing")
    )]
    ConvergenceTimeout {
        /// Human-readable target
        target: String,
        /// Last successfully observed state, if any
        last_observed: Option<String>,
        /// Observations performed
        polls: u32,
        /// Wall-clock spent waiting
        elapsed_ms: u64,
    },

    /// Rollout of a mutation never reported ready
    #[error("readiness timeout: {resource} not ready after {polls} polls ({elapsed_ms}ms)")]
    ReadinessTimeout {
        /// Resource being rolled out
        resource: String,
        /// Observations performed
        polls: u32,
        /// Wall-clock spent waiting
        elapsed_ms: u64,
    },

    /// Readiness observer failed permanently
    #[error("readiness check for {resource} failed: {source}")]
    Readiness {
        /// Resource being rolled out
        resource: String,
        /// Underlying observer error
        source: ObserveError,
    },

    /// State observer failed permanently while converging
    #[error("observing {target} failed: {source}")]
    Observation {
        /// Target being waited for
        target: String,
        /// Underlying observer error
        source: ObserveError,
    },

    /// Prerequisite provisioning failed; no phase runs
    #[error("setup failed: {0:#}")]
    Setup(#[source] anyhow::Error),

    /// Requested mutation failed
    #[error("setting mode {mode} failed: {source:#}")]
    Mutation {
        /// Requested mode
        mode: Mode,
        /// Collaborator error
        #[source]
        source: anyhow::Error,
    },

    /// Mode transition skips a rung of the ladder
    #[error("illegal mode transition {from} -> {to}")]
    IllegalTransition {
        /// Current mode
        from: Mode,
        /// Requested mode
        to: Mode,
    },

    /// Synchronous post-condition did not hold
    #[error("assertion violated: {0}")]
    Assertion(String),

    /// Background verification task terminated abnormally
    #[error("verifier task crashed: {0}")]
    VerifierCrashed(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl HarnessError {
    /// Report classification for this error
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::ProbeFailures(_) | Self::VerifierCrashed(_) => FailureKind::ProbeFailure,
            Self::ConvergenceTimeout { .. } => FailureKind::ConvergenceTimeout,
            Self::ReadinessTimeout { .. } => FailureKind::ReadinessTimeout,
            Self::Readiness { .. } | Self::Observation { .. } => FailureKind::ObservationFailure,
            Self::Setup(_) | Self::Config(_) => FailureKind::SetupFailure,
            Self::Mutation { .. } | Self::IllegalTransition { .. } => FailureKind::MutationFailure,
            Self::Assertion(_) => FailureKind::AssertionViolation,
        }
    }

    /// Whether the whole run must stop
    #[inline]
    #[must_use]
    pub fn is_fatal_to_run(&self) -> bool {
        self.kind() == FailureKind::SetupFailure
    }
}

/// Failure classification carried in reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Connectivity attempt failed under an expected-to-succeed transport
    ProbeFailure,
    /// Observed state never reached the target
    ConvergenceTimeout,
    /// Rollout never became ready
    ReadinessTimeout,
    /// Provisioning failed before any phase
    SetupFailure,
    /// Synchronous post-condition failed
    AssertionViolation,
    /// Mode change was rejected or the mutator failed
    MutationFailure,
    /// A readiness or state observer failed permanently
    ObservationFailure,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ProbeFailure => "probe_failure",
            Self::ConvergenceTimeout => "convergence_timeout",
            Self::ReadinessTimeout => "readiness_timeout",
            Self::SetupFailure => "setup_failure",
            Self::AssertionViolation => "assertion_violation",
            Self::MutationFailure => "mutation_failure",
            Self::ObservationFailure => "observation_failure",
        };
        f.write_str(s)
    }
}

/// Error returned by readiness and state observers.
///
/// The observer decides whether a failure is worth retrying.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ObserveError {
    /// Retry on the next poll
    #[error("transient: {0}")]
    Transient(String),
    /// Abort the wait
    #[error("permanent: {0}")]
    Permanent(String),
}

impl ObserveError {
    /// Check if the error should be retried
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Every failed probe of one verification session
#[derive(Debug, Clone)]
pub struct ProbeFailureReport {
    /// Session that recorded the failures
    pub session: SessionId,
    /// Transport that was expected to stay available
    pub transport: Transport,
    /// Total probes attempted
    pub attempts: usize,
    /// Failed probes, in attempt order
    pub failures: Vec<ProbeResult>,
}

impl fmt::Display for ProbeFailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} {} probes failed (session {})",
            self.failures.len(),
            self.attempts,
            self.transport,
            self.session
        )?;
        for failure in &self.failures {
            write!(
                f,
                "\n  - [{}] {}",
                failure.timestamp.to_rfc3339(),
                failure.error.as_deref().unwrap_or("unknown error")
            )?;
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A field has an unusable value
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Offending field
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// Config file could not be read
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// Config file could not be parsed
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config could not be rendered
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}
