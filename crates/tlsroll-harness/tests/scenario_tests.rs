use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tlsroll_core::{
    FailureKind, HarnessConfig, Mode, PhaseAssertion, PhaseStatus, ResourceRef, RunReport,
    Scenario, StagedTransitionOrchestrator, TransitionPhase, Transport,
};
use tlsroll_harness::{run_simulation, Fault, SimulatedCluster, SimulatorSettings};

fn fast_config() -> HarnessConfig {
    HarnessConfig::default()
        .with_background_interval(Duration::from_millis(500))
        .with_poll_interval(Duration::from_millis(500))
}

fn statuses(report: &RunReport) -> Vec<(String, PhaseStatus)> {
    report
        .phases
        .iter()
        .map(|p| (p.name.clone(), p.status.clone()))
        .collect()
}

fn skipped_after(after: &str) -> PhaseStatus {
    PhaseStatus::Skipped {
        after: after.to_string(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_clean_upgrade_passes() {
    let report = run_simulation(&fast_config(), SimulatorSettings::default()).await;

    assert!(report.passed(), "{}", report.generate_text());
    assert_eq!(
        statuses(&report),
        vec![
            ("baseline".to_string(), PhaseStatus::Passed),
            ("enable-optional".to_string(), PhaseStatus::Passed),
            ("verify-dual".to_string(), PhaseStatus::Passed),
            ("require".to_string(), PhaseStatus::Passed),
            ("verify-exclusive".to_string(), PhaseStatus::Passed),
        ]
    );

    // Each rollout restarts three replicas for 2s apiece.
    assert!(report.phase("enable-optional").unwrap().probe_attempts >= 6);
    assert!(report.phase("require").unwrap().probe_attempts >= 6);
}

#[tokio::test(start_paused = true)]
async fn test_plaintext_gap_is_caught_by_background_verifier() {
    let settings = SimulatorSettings::default().with_fault(Fault::PlaintextGap);
    let report = run_simulation(&fast_config(), settings).await;

    let enable = report.phase("enable-optional").unwrap();
    assert_eq!(enable.status, PhaseStatus::Failed);
    assert_eq!(enable.failures.len(), 1);
    assert_eq!(enable.failures[0].kind, FailureKind::ProbeFailure);
    assert!(enable.failures[0].message.contains("plaintext listener closed"));

    assert_eq!(report.phase("verify-dual").unwrap().status, skipped_after("enable-optional"));
    assert_eq!(report.phase("require").unwrap().status, skipped_after("enable-optional"));
}

#[tokio::test(start_paused = true)]
async fn test_stuck_rollout_times_out_readiness() {
    let settings = SimulatorSettings::default().with_fault(Fault::StuckRollout);
    let report = run_simulation(&fast_config(), settings).await;

    let enable = report.phase("enable-optional").unwrap();
    assert_eq!(enable.failures.len(), 1);
    assert_eq!(enable.failures[0].kind, FailureKind::ReadinessTimeout);
    assert!(enable.failures[0]
        .message
        .contains("tlsroll/replica-set not ready after 600 polls"));

    let skipped = report
        .phases
        .iter()
        .filter(|p| matches!(p.status, PhaseStatus::Skipped { .. }))
        .count();
    assert_eq!(skipped, 3);
}

#[tokio::test(start_paused = true)]
async fn test_setup_failure_runs_no_phase() {
    let settings = SimulatorSettings::default().with_fault(Fault::SetupFailure);
    let report = run_simulation(&fast_config(), settings).await;

    assert!(!report.passed());
    assert!(report.phases.is_empty());
    let setup = report.setup_failure.as_ref().unwrap();
    assert_eq!(setup.kind, FailureKind::SetupFailure);
    assert!(setup
        .message
        .contains("creating TLS certificate for tlsroll/replica-set"));
}

#[tokio::test(start_paused = true)]
async fn test_missing_keyfile_fails_dual_mode_verification() {
    let settings = SimulatorSettings::default().with_fault(Fault::NoKeyfile);
    let report = run_simulation(&fast_config(), settings).await;

    let dual = report.phase("verify-dual").unwrap();
    assert_eq!(dual.status, PhaseStatus::Failed);
    assert_eq!(dual.failures[0].kind, FailureKind::AssertionViolation);
    assert!(dual.failures[0].message.contains("keyfile"));
    assert_eq!(report.phase("verify-exclusive").unwrap().status, skipped_after("verify-dual"));
}

#[tokio::test(start_paused = true)]
async fn test_continue_after_failure_runs_every_phase() {
    let config = fast_config().with_continue_after_failure(true);
    let settings = SimulatorSettings::default().with_fault(Fault::NoKeyfile);
    let report = run_simulation(&config, settings).await;

    let failed: Vec<&str> = report
        .phases
        .iter()
        .filter(|p| !p.passed())
        .map(|p| p.name.as_str())
        .collect();
    assert_eq!(failed, vec!["verify-dual"]);
    assert_eq!(report.phases.len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_plaintext_background_during_required_rollout_fails() {
    let config = fast_config()
        .with_background_interval(Duration::from_millis(100))
        .with_poll_interval(Duration::from_secs(1));
    let cluster = Arc::new(SimulatedCluster::new(
        SimulatorSettings::default().starting_in(Mode::Optional),
    ));
    let orchestrator = StagedTransitionOrchestrator::new(
        config,
        ResourceRef::new("tlsroll", "replica-set"),
        cluster.collaborators(),
    );

    // Verifying the wrong transport: plaintext cannot survive `required`.
    let scenario = Scenario::new("misconfigured", Mode::Optional).phase(
        TransitionPhase::new("require")
            .verifying(Transport::Plaintext)
            .requesting(Mode::Required)
            .converging_to(Mode::Required, Duration::from_secs(120)),
    );
    let report = orchestrator.run(&scenario).await;

    let require = report.phase("require").unwrap();
    assert_eq!(require.status, PhaseStatus::Failed);
    assert_eq!(require.failures[0].kind, FailureKind::ProbeFailure);
    assert_eq!(cluster.replica_modes(), vec![Mode::Required; 3]);
}

/// Reads `failed` and `attempted` from "N of M <transport> probes failed ..."
fn probe_counts(message: &str) -> (usize, usize) {
    let words: Vec<&str> = message.split_whitespace().collect();
    assert_eq!(words[1], "of", "unexpected message: {message}");
    (words[0].parse().unwrap(), words[2].parse().unwrap())
}

#[tokio::test(start_paused = true)]
async fn test_tls_is_unavailable_until_optional_rollout_converges() {
    let config = fast_config().with_continue_after_failure(true);
    let cluster = Arc::new(SimulatedCluster::new(SimulatorSettings::default()));
    let orchestrator = StagedTransitionOrchestrator::new(
        config,
        ResourceRef::new("tlsroll", "replica-set"),
        cluster.collaborators(),
    );

    let scenario = Scenario::new("tls-availability", Mode::None)
        .phase(
            TransitionPhase::new("before")
                .asserting(PhaseAssertion::ConnectivitySucceeds(Transport::Plaintext))
                .asserting(PhaseAssertion::ConnectivityFails(Transport::Tls)),
        )
        .phase(
            TransitionPhase::new("enable-optional")
                .verifying(Transport::Tls)
                .requesting(Mode::Optional)
                .awaiting_ready()
                .converging_to(Mode::Optional, Duration::from_secs(60)),
        )
        .phase(
            TransitionPhase::new("after")
                .asserting(PhaseAssertion::ConnectivitySucceeds(Transport::Tls))
                .asserting(PhaseAssertion::ConnectivitySucceeds(Transport::Plaintext)),
        );
    let report = orchestrator.run(&scenario).await;

    assert_eq!(report.phase("before").unwrap().status, PhaseStatus::Passed);

    // TLS was verified across the change: refused at first, then served.
    let enable = report.phase("enable-optional").unwrap();
    assert_eq!(enable.status, PhaseStatus::Failed);
    assert_eq!(enable.failures.len(), 1);
    assert_eq!(enable.failures[0].kind, FailureKind::ProbeFailure);
    assert!(enable.failures[0].message.contains("tls rejected by every replica"));
    let (failed, attempted) = probe_counts(&enable.failures[0].message);
    assert!(failed >= 1);
    assert!(failed < attempted, "TLS never became available: {failed} of {attempted}");
    assert_eq!(attempted, enable.probe_attempts);

    assert_eq!(report.phase("after").unwrap().status, PhaseStatus::Passed);
    assert_eq!(cluster.replica_modes(), vec![Mode::Optional; 3]);
}

#[tokio::test(start_paused = true)]
async fn test_json_report_is_complete() {
    let report = run_simulation(&fast_config(), SimulatorSettings::default()).await;
    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();

    assert_eq!(json["scenario"], "tls-upgrade");
    assert_eq!(json["phases"].as_array().unwrap().len(), 5);
    assert_eq!(json["phases"][1]["status"], "passed");
}
