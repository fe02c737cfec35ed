//! Phase descriptors and scenarios
//!
//! A scenario is a static, ordered list of phases. Each phase optionally
//! runs background verification around a mutation, waits for readiness and
//! convergence, then checks synchronous post-conditions.

use crate::config::HarnessConfig;
use crate::state_machine::ModeLadder;
use crate::types::{Mode, Transport};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Synchronous post-condition checked at the end of a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseAssertion {
    /// A single probe over the transport must succeed
    ConnectivitySucceeds(Transport),
    /// A single probe over the transport must fail
    ConnectivityFails(Transport),
    /// Internal replica authentication must be configured
    InternalAuthConfigured {
        /// Replicas expected to authenticate
        replicas: usize,
        /// Transport the check runs over
        transport: Transport,
    },
}

impl fmt::Display for PhaseAssertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectivitySucceeds(t) => write!(f, "{t} connectivity succeeds"),
            Self::ConnectivityFails(t) => write!(f, "{t} connectivity fails"),
            Self::InternalAuthConfigured { replicas, transport } => {
                write!(f, "internal auth configured on {replicas} replicas over {transport}")
            }
        }
    }
}

/// Convergence target of a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvergenceTarget {
    /// Mode the observed state must reach
    pub mode: Mode,
    /// Budget for reaching it
    pub timeout: Duration,
}

/// One ordered step of a migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionPhase {
    /// Phase name used in reports
    pub name: String,
    /// Transport verified in the background for the whole phase
    pub background: Option<Transport>,
    /// Mode requested from the mutator
    pub mutation: Option<Mode>,
    /// Wait for the rollout to report ready
    pub await_ready: bool,
    /// Observed state to wait for
    pub convergence: Option<ConvergenceTarget>,
    /// Post-conditions
    pub assertions: Vec<PhaseAssertion>,
}

impl TransitionPhase {
    /// Empty phase
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            background: None,
            mutation: None,
            await_ready: false,
            convergence: None,
            assertions: Vec::new(),
        }
    }

    /// Verify `transport` in the background
    #[must_use]
    pub fn verifying(mut self, transport: Transport) -> Self {
        self.background = Some(transport);
        self
    }

    /// Request `mode`
    #[must_use]
    pub fn requesting(mut self, mode: Mode) -> Self {
        self.mutation = Some(mode);
        self
    }

    /// Wait for rollout readiness
    #[must_use]
    pub fn awaiting_ready(mut self) -> Self {
        self.await_ready = true;
        self
    }

    /// Wait for the observed mode to reach `mode`
    #[must_use]
    pub fn converging_to(mut self, mode: Mode, timeout: Duration) -> Self {
        self.convergence = Some(ConvergenceTarget { mode, timeout });
        self
    }

    /// Add a post-condition
    #[must_use]
    pub fn asserting(mut self, assertion: PhaseAssertion) -> Self {
        self.assertions.push(assertion);
        self
    }
}

/// A named migration: ladder, starting mode and phases
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name
    pub name: String,
    /// Mode the resource starts in
    pub initial_mode: Mode,
    /// Legal transitions
    pub ladder: ModeLadder,
    /// Phases in execution order
    pub phases: Vec<TransitionPhase>,
}

impl Scenario {
    /// Scenario with the canonical ladder
    #[must_use]
    pub fn new(name: impl Into<String>, initial_mode: Mode) -> Self {
        Self {
            name: name.into(),
            initial_mode,
            ladder: ModeLadder::default(),
            phases: Vec::new(),
        }
    }

    /// Replace the ladder
    #[must_use]
    pub fn with_ladder(mut self, ladder: ModeLadder) -> Self {
        self.ladder = ladder;
        self
    }

    /// Append a phase
    #[must_use]
    pub fn phase(mut self, phase: TransitionPhase) -> Self {
        self.phases.push(phase);
        self
    }

    /// Two-step TLS enablement: plaintext -> optional -> required.
    #[must_use]
    pub fn tls_upgrade(config: &HarnessConfig) -> Self {
        use PhaseAssertion::{ConnectivityFails, ConnectivitySucceeds, InternalAuthConfigured};
        use Transport::{Plaintext, Tls};

        Self::new("tls-upgrade", Mode::None)
            .phase(
                TransitionPhase::new("baseline")
                    .awaiting_ready()
                    .asserting(ConnectivitySucceeds(Plaintext))
                    .asserting(ConnectivityFails(Tls)),
            )
            .phase(
                TransitionPhase::new("enable-optional")
                    .verifying(Plaintext)
                    .requesting(Mode::Optional)
                    .awaiting_ready()
                    .converging_to(Mode::Optional, config.convergence_timeout(Mode::Optional)),
            )
            .phase(
                TransitionPhase::new("verify-dual")
                    .asserting(ConnectivitySucceeds(Plaintext))
                    .asserting(ConnectivitySucceeds(Tls))
                    .asserting(InternalAuthConfigured {
                        replicas: config.replicas,
                        transport: Tls,
                    }),
            )
            .phase(
                TransitionPhase::new("require")
                    .verifying(Tls)
                    .requesting(Mode::Required)
                    .converging_to(Mode::Required, config.convergence_timeout(Mode::Required)),
            )
            .phase(
                TransitionPhase::new("verify-exclusive")
                    .asserting(ConnectivitySucceeds(Tls))
                    .asserting(ConnectivityFails(Plaintext)),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls_upgrade_phases_in_order() {
        let scenario = Scenario::tls_upgrade(&HarnessConfig::default());
        let names: Vec<&str> = scenario.phases.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            ["baseline", "enable-optional", "verify-dual", "require", "verify-exclusive"]
        );
    }

    #[test]
    fn mutating_phases_verify_the_transport_that_must_survive() {
        let scenario = Scenario::tls_upgrade(&HarnessConfig::default());
        let enable = &scenario.phases[1];
        assert_eq!(enable.background, Some(Transport::Plaintext));
        assert_eq!(enable.mutation, Some(Mode::Optional));

        let require = &scenario.phases[3];
        assert_eq!(require.background, Some(Transport::Tls));
        assert_eq!(require.mutation, Some(Mode::Required));
        assert_eq!(
            require.convergence.map(|c| c.timeout),
            Some(Duration::from_secs(120))
        );
    }

    #[test]
    fn baseline_requires_tls_to_be_unavailable() {
        let scenario = Scenario::tls_upgrade(&HarnessConfig::default());
        assert_eq!(
            scenario.phases[0].assertions,
            vec![
                PhaseAssertion::ConnectivitySucceeds(Transport::Plaintext),
                PhaseAssertion::ConnectivityFails(Transport::Tls),
            ]
        );
    }

    #[test]
    fn verification_phases_have_no_background_verifier() {
        let scenario = Scenario::tls_upgrade(&HarnessConfig::default());
        for name in ["verify-dual", "verify-exclusive"] {
            let phase = scenario.phases.iter().find(|p| p.name == name).unwrap();
            assert!(phase.background.is_none());
            assert!(phase.mutation.is_none());
        }
    }

    #[test]
    fn assertion_display_is_readable() {
        let a = PhaseAssertion::InternalAuthConfigured {
            replicas: 3,
            transport: Transport::Tls,
        };
        assert_eq!(a.to_string(), "internal auth configured on 3 replicas over tls");
    }
}
