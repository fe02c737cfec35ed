//! tlsroll core - availability verification for staged transport-security rollouts
//!
//! Walks a clustered resource through a mode ladder
//! (`none -> optional -> required`) one phase at a time and proves:
//! - The transport that must survive a change stays reachable throughout it
//! - The observed state actually converges to the requested mode
//! - Post-conditions hold once the phase settles
//!
//! # Example
//!
//! ```rust,ignore
//! use tlsroll_core::prelude::*;
//!
//! # async fn example(collaborators: Collaborators) {
//! let config = HarnessConfig::default();
//! let orchestrator = StagedTransitionOrchestrator::new(
//!     config.clone(),
//!     ResourceRef::new("db", "replica-set"),
//!     collaborators,
//! );
//!
//! let report = orchestrator.run(&Scenario::tls_upgrade(&config)).await;
//! println!("{}", report.generate_text());
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod collaborators;
pub mod config;
pub mod convergence;
pub mod error;
pub mod orchestrator;
pub mod phase;
pub mod probe;
pub mod report;
pub mod state_machine;
pub mod telemetry;
pub mod types;
pub mod verifier;

// Re-exports for convenience
pub use collaborators::{
    AuthVerifier, Collaborators, ReadinessObserver, ResourceMutator, ResourceProvisioner,
    StateObserver,
};
pub use config::HarnessConfig;
pub use convergence::{Convergence, ConvergenceCheck, ConvergenceWaiter};
pub use error::{ConfigError, FailureKind, HarnessError, ObserveError, ProbeFailureReport};
pub use orchestrator::StagedTransitionOrchestrator;
pub use phase::{ConvergenceTarget, PhaseAssertion, Scenario, TransitionPhase};
pub use probe::{ConnectivityProbe, Handshake, ProbeResult, TcpProbe, TlsClient};
pub use report::{PhaseFailure, PhaseOutcome, PhaseStatus, RunReport};
pub use state_machine::ModeLadder;
pub use types::{Mode, Observation, ResourceRef, SessionId, Transport};
pub use verifier::{
    with_background_verification, BackgroundVerifier, VerificationSummary, VerifierHandle,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving a rollout
    pub use crate::{
        Collaborators, ConnectivityProbe, HarnessConfig, HarnessError, Mode, PhaseAssertion,
        ResourceRef, RunReport, Scenario, StagedTransitionOrchestrator, TransitionPhase,
        Transport,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
