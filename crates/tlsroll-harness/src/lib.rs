//! tlsroll harness - simulated replica set and scenario runner

#![warn(unreachable_pub)]

pub mod simulator;

pub use simulator::{Fault, SimulatedCluster, SimulatorSettings, UnknownFault};

use std::sync::Arc;
use tlsroll_core::{HarnessConfig, ResourceRef, RunReport, Scenario, StagedTransitionOrchestrator};

/// Resource name used for simulated runs
pub const SIMULATED_RESOURCE: (&str, &str) = ("tlsroll", "replica-set");

/// Run the TLS upgrade scenario against a fresh simulated cluster.
pub async fn run_simulation(config: &HarnessConfig, settings: SimulatorSettings) -> RunReport {
    let cluster = Arc::new(SimulatedCluster::new(settings));
    let (namespace, name) = SIMULATED_RESOURCE;
    let orchestrator = StagedTransitionOrchestrator::new(
        config.clone(),
        ResourceRef::new(namespace, name),
        cluster.collaborators(),
    );
    orchestrator.run(&Scenario::tls_upgrade(config)).await
}
