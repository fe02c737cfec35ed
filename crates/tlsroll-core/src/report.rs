//! Run reports
//!
//! Each phase is reported independently with every failure it produced.
//! A run passes only if setup succeeded and every phase passed.

use crate::error::{FailureKind, HarnessError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// One recorded failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseFailure {
    /// Classification
    pub kind: FailureKind,
    /// Full detail, including timestamps and last observed state
    pub message: String,
}

impl From<&HarnessError> for PhaseFailure {
    fn from(err: &HarnessError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Phase status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    /// All steps and post-conditions held
    Passed,
    /// At least one failure was recorded
    Failed,
    /// Not run because an earlier phase failed
    Skipped {
        /// Phase whose failure caused the skip
        after: String,
    },
}

/// Outcome of one phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseOutcome {
    /// Phase name
    pub name: String,
    /// Status
    pub status: PhaseStatus,
    /// Every failure, in the order encountered
    pub failures: Vec<PhaseFailure>,
    /// Background probes performed during the phase
    pub probe_attempts: usize,
    /// When the phase started
    pub started_at: Option<DateTime<Utc>>,
    /// Time spent in the phase
    pub duration_ms: u64,
}

impl PhaseOutcome {
    /// Outcome for a phase that never ran
    #[must_use]
    pub fn skipped(name: impl Into<String>, after: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: PhaseStatus::Skipped {
                after: after.into(),
            },
            failures: Vec::new(),
            probe_attempts: 0,
            started_at: None,
            duration_ms: 0,
        }
    }

    /// Whether the phase passed
    #[inline]
    #[must_use]
    pub fn passed(&self) -> bool {
        self.status == PhaseStatus::Passed
    }
}

/// Report for a whole scenario
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Scenario name
    pub scenario: String,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// Provisioning failure; when set no phase ran
    pub setup_failure: Option<PhaseFailure>,
    /// Per-phase outcomes in execution order
    pub phases: Vec<PhaseOutcome>,
}

impl RunReport {
    /// Empty report for `scenario`
    #[must_use]
    pub fn new(scenario: impl Into<String>) -> Self {
        Self {
            scenario: scenario.into(),
            started_at: Utc::now(),
            setup_failure: None,
            phases: Vec::new(),
        }
    }

    /// Check if the run passed all criteria
    #[must_use]
    pub fn passed(&self) -> bool {
        self.setup_failure.is_none() && self.phases.iter().all(PhaseOutcome::passed)
    }

    /// Look up a phase by name
    #[must_use]
    pub fn phase(&self, name: &str) -> Option<&PhaseOutcome> {
        self.phases.iter().find(|p| p.name == name)
    }

    /// Every failure across setup and phases
    pub fn failures(&self) -> impl Iterator<Item = &PhaseFailure> {
        self.setup_failure
            .iter()
            .chain(self.phases.iter().flat_map(|p| p.failures.iter()))
    }

    /// Render as pretty JSON
    ///
    /// # Errors
    /// Serialization failure
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Generate text report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();

        let _ = writeln!(report, "=== {} ===", self.scenario);
        let _ = writeln!(report, "Started: {}", self.started_at.to_rfc3339());

        if let Some(setup) = &self.setup_failure {
            let _ = writeln!(report, "Setup: FAILED ({}) {}", setup.kind, setup.message);
        }

        for phase in &self.phases {
            let status = match &phase.status {
                PhaseStatus::Passed => "PASSED".to_string(),
                PhaseStatus::Failed => "FAILED".to_string(),
                PhaseStatus::Skipped { after } => format!("SKIPPED (after {after})"),
            };
            let _ = writeln!(
                report,
                "[{status}] {} ({}ms, {} background probes)",
                phase.name, phase.duration_ms, phase.probe_attempts
            );
            for failure in &phase.failures {
                let _ = writeln!(report, "    {}: {}", failure.kind, failure.message);
            }
        }

        let _ = writeln!(
            report,
            "Result: {}",
            if self.passed() { "PASSED" } else { "FAILED" }
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn passed(name: &str) -> PhaseOutcome {
        PhaseOutcome {
            name: name.into(),
            status: PhaseStatus::Passed,
            failures: Vec::new(),
            probe_attempts: 3,
            started_at: None,
            duration_ms: 10,
        }
    }

    #[test]
    fn empty_report_passes() {
        assert!(RunReport::new("noop").passed());
    }

    #[test]
    fn setup_failure_fails_run() {
        let mut report = RunReport::new("tls-upgrade");
        report.setup_failure = Some(PhaseFailure::from(&HarnessError::Setup(anyhow::anyhow!(
            "certificate secret missing"
        ))));
        assert!(!report.passed());
        assert_eq!(report.failures().count(), 1);
        assert!(report.generate_text().contains("Setup: FAILED (setup_failure)"));
    }

    #[test]
    fn skipped_phase_fails_run_and_is_rendered() {
        let mut report = RunReport::new("tls-upgrade");
        report.phases.push(passed("baseline"));
        report.phases.push(PhaseOutcome::skipped("require", "enable-optional"));

        assert!(!report.passed());
        let text = report.generate_text();
        assert!(text.contains("[PASSED] baseline (10ms, 3 background probes)"));
        assert!(text.contains("[SKIPPED (after enable-optional)] require"));
        assert!(text.ends_with("Result: FAILED\n"));
    }

    #[test]
    fn json_round_trip_preserves_phases() {
        let mut report = RunReport::new("tls-upgrade");
        report.phases.push(passed("baseline"));
        report.phases.push(PhaseOutcome {
            status: PhaseStatus::Failed,
            failures: vec![PhaseFailure {
                kind: FailureKind::AssertionViolation,
                message: "plaintext connectivity fails".into(),
            }],
            ..passed("verify-exclusive")
        });

        let json = report.to_json().unwrap();
        assert!(json.contains("\"assertion_violation\""));
        let back: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }
}
