//! Simulated replica set
//!
//! An in-memory stand-in for a clustered database resource that implements
//! every collaborator contract of the orchestrator.
//!
//! Key behaviours:
//! - Mode changes roll out by restarting one replica at a time, highest
//!   ordinal first, so the set stays reachable throughout
//! - The state observer queries replica 0 and is transiently unavailable
//!   while that replica restarts
//! - Faults can be injected to exercise each failure class

use anyhow::{anyhow, bail, Context as _};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tlsroll_core::{
    AuthVerifier, Collaborators, ConnectivityProbe, Mode, ObserveError, Observation, ProbeResult,
    ReadinessObserver, ResourceMutator, ResourceProvisioner, ResourceRef, StateObserver, Transport,
};
use tokio::task::JoinHandle;

/// Injectable misbehaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Fault {
    /// Plaintext is dropped on every replica while the first replica
    /// restarts towards `optional`
    PlaintextGap,
    /// Replica 0 never comes back from its restart
    StuckRollout,
    /// Internal authentication keyfile is missing
    NoKeyfile,
    /// Provisioning of credentials or certificates fails
    SetupFailure,
}

impl Fault {
    /// Every fault
    pub const ALL: [Fault; 4] = [
        Fault::PlaintextGap,
        Fault::StuckRollout,
        Fault::NoKeyfile,
        Fault::SetupFailure,
    ];

    /// Command-line name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PlaintextGap => "plaintext-gap",
            Self::StuckRollout => "stuck-rollout",
            Self::NoKeyfile => "no-keyfile",
            Self::SetupFailure => "setup-failure",
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognised fault name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown fault `{0}` (expected plaintext-gap, stuck-rollout, no-keyfile or setup-failure)")]
pub struct UnknownFault(pub String);

impl FromStr for Fault {
    type Err = UnknownFault;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|fault| fault.as_str() == s)
            .ok_or_else(|| UnknownFault(s.to_string()))
    }
}

/// Simulator settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatorSettings {
    /// Replica count
    pub replicas: usize,
    /// Time one replica takes to restart
    pub restart: Duration,
    /// Mode every replica starts in
    pub initial_mode: Mode,
    /// Injected faults
    pub faults: Vec<Fault>,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            replicas: 3,
            restart: Duration::from_secs(2),
            initial_mode: Mode::None,
            faults: Vec::new(),
        }
    }
}

impl SimulatorSettings {
    /// With replica count
    #[must_use]
    pub fn with_replicas(mut self, replicas: usize) -> Self {
        self.replicas = replicas;
        self
    }

    /// With per-replica restart time
    #[must_use]
    pub fn with_restart(mut self, restart: Duration) -> Self {
        self.restart = restart;
        self
    }

    /// With starting mode
    #[must_use]
    pub fn starting_in(mut self, mode: Mode) -> Self {
        self.initial_mode = mode;
        self
    }

    /// With an injected fault
    #[must_use]
    pub fn with_fault(mut self, fault: Fault) -> Self {
        if !self.faults.contains(&fault) {
            self.faults.push(fault);
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Replica {
    mode: Mode,
    restarting: bool,
}

/// Secrets created by provisioning
#[derive(Debug, Clone)]
struct Provisioned {
    credentials: String,
    certificate: String,
}

#[derive(Debug)]
struct ClusterState {
    requested: Mode,
    replicas: Vec<Replica>,
    plaintext_blocked: bool,
    provisioned: Option<Provisioned>,
    rollout: Option<JoinHandle<()>>,
}

/// In-memory replica set
#[derive(Debug)]
pub struct SimulatedCluster {
    settings: SimulatorSettings,
    state: Arc<Mutex<ClusterState>>,
}

impl SimulatedCluster {
    /// Create an unprovisioned cluster
    #[must_use]
    pub fn new(settings: SimulatorSettings) -> Self {
        let replica = Replica {
            mode: settings.initial_mode,
            restarting: false,
        };
        let state = ClusterState {
            requested: settings.initial_mode,
            replicas: vec![replica; settings.replicas],
            plaintext_blocked: false,
            provisioned: None,
            rollout: None,
        };
        Self {
            settings,
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Active settings
    #[inline]
    #[must_use]
    pub fn settings(&self) -> &SimulatorSettings {
        &self.settings
    }

    /// Whether `fault` is injected
    #[must_use]
    pub fn has_fault(&self, fault: Fault) -> bool {
        self.settings.faults.contains(&fault)
    }

    /// Mode of each replica, by ordinal
    #[must_use]
    pub fn replica_modes(&self) -> Vec<Mode> {
        self.state.lock().replicas.iter().map(|r| r.mode).collect()
    }

    /// Replicas currently restarting
    #[must_use]
    pub fn restarting(&self) -> usize {
        self.state.lock().replicas.iter().filter(|r| r.restarting).count()
    }

    /// Whether provisioning has completed
    #[must_use]
    pub fn is_provisioned(&self) -> bool {
        self.state.lock().provisioned.is_some()
    }

    /// Names of the secrets created by provisioning
    #[must_use]
    pub fn secrets(&self) -> Option<(String, String)> {
        self.state
            .lock()
            .provisioned
            .as_ref()
            .map(|p| (p.credentials.clone(), p.certificate.clone()))
    }

    /// Bundle this cluster as every collaborator
    #[must_use]
    pub fn collaborators(self: &Arc<Self>) -> Collaborators {
        Collaborators {
            mutator: self.clone(),
            readiness: self.clone(),
            state: self.clone(),
            auth: self.clone(),
            provisioner: self.clone(),
            probe: self.clone(),
        }
    }

    fn roll_out(&self, target: Mode) -> JoinHandle<()> {
        let state = Arc::clone(&self.state);
        let restart = self.settings.restart;
        let gap = self.has_fault(Fault::PlaintextGap) && target == Mode::Optional;
        let stuck = self.has_fault(Fault::StuckRollout);

        tokio::spawn(async move {
            let count = state.lock().replicas.len();

            for (step, ordinal) in (0..count).rev().enumerate() {
                {
                    let mut s = state.lock();
                    s.replicas[ordinal].restarting = true;
                    if gap && step == 0 {
                        s.plaintext_blocked = true;
                    }
                }
                tracing::debug!(ordinal, %target, "replica restarting");

                if stuck && ordinal == 0 {
                    tracing::warn!(ordinal, "replica never finishes restarting");
                    return;
                }

                tokio::time::sleep(restart).await;

                let mut s = state.lock();
                s.replicas[ordinal] = Replica {
                    mode: target,
                    restarting: false,
                };
                if gap && step == 0 {
                    s.plaintext_blocked = false;
                }
            }

            tracing::info!(%target, "rollout complete");
        })
    }
}

impl Drop for SimulatedCluster {
    fn drop(&mut self) {
        if let Some(rollout) = self.state.lock().rollout.take() {
            rollout.abort();
        }
    }
}

#[async_trait]
impl ResourceProvisioner for SimulatedCluster {
    async fn provision(&self, resource: &ResourceRef) -> anyhow::Result<()> {
        if self.has_fault(Fault::SetupFailure) {
            return Err(anyhow!("certificate issuer is not ready"))
                .with_context(|| format!("creating TLS certificate for {resource}"));
        }

        let mut state = self.state.lock();
        if state.provisioned.is_none() {
            let provisioned = Provisioned {
                credentials: format!("{}-admin-password", resource.name),
                certificate: format!("{}-cert", resource.name),
            };
            tracing::info!(
                %resource,
                credentials = %provisioned.credentials,
                certificate = %provisioned.certificate,
                "provisioned"
            );
            state.provisioned = Some(provisioned);
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceMutator for SimulatedCluster {
    async fn set_mode(&self, resource: &ResourceRef, mode: Mode) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        if state.provisioned.is_none() {
            bail!("{resource} has not been provisioned");
        }

        // A newer request supersedes an unfinished rollout.
        if let Some(previous) = state.rollout.take() {
            previous.abort();
        }
        for replica in &mut state.replicas {
            replica.restarting = false;
        }
        state.plaintext_blocked = false;

        state.requested = mode;
        state.rollout = Some(self.roll_out(mode));
        tracing::info!(%resource, %mode, "mode change accepted");
        Ok(())
    }
}

#[async_trait]
impl ReadinessObserver for SimulatedCluster {
    async fn is_ready(&self, resource: &ResourceRef) -> Result<bool, ObserveError> {
        let state = self.state.lock();
        if state.provisioned.is_none() {
            return Err(ObserveError::Permanent(format!("{resource} does not exist")));
        }
        let requested = state.requested;
        Ok(state
            .replicas
            .iter()
            .all(|r| !r.restarting && r.mode == requested))
    }
}

#[async_trait]
impl StateObserver for SimulatedCluster {
    async fn current_mode(&self, resource: &ResourceRef) -> Result<Observation<Mode>, ObserveError> {
        let state = self.state.lock();
        if state.provisioned.is_none() {
            return Err(ObserveError::Permanent(format!("{resource} does not exist")));
        }
        if state.replicas.first().is_some_and(|r| r.restarting) {
            return Err(ObserveError::Transient("replica 0 is restarting".into()));
        }
        let mode = state
            .replicas
            .iter()
            .map(|r| r.mode)
            .min()
            .unwrap_or(state.requested);
        Ok(Observation::now(mode))
    }
}

#[async_trait]
impl AuthVerifier for SimulatedCluster {
    async fn verify_internal_auth(&self, replicas: usize, transport: Transport) -> anyhow::Result<()> {
        if self.has_fault(Fault::NoKeyfile) {
            bail!("no internal authentication keyfile is configured");
        }

        let state = self.state.lock();
        if state.provisioned.is_none() {
            bail!("cluster has not been provisioned");
        }
        let members = state.replicas.len();
        if members != replicas {
            bail!("expected {replicas} members, found {members}");
        }
        if let Some(ordinal) = state
            .replicas
            .iter()
            .position(|r| r.restarting || !r.mode.allows(transport))
        {
            bail!("member {ordinal} cannot authenticate over {transport}");
        }
        Ok(())
    }
}

#[async_trait]
impl ConnectivityProbe for SimulatedCluster {
    async fn attempt(&self, transport: Transport) -> ProbeResult {
        let state = self.state.lock();
        if state.provisioned.is_none() {
            return ProbeResult::failed(transport, "connection refused: no such service");
        }
        if transport == Transport::Plaintext && state.plaintext_blocked {
            return ProbeResult::failed(transport, "connection reset: plaintext listener closed");
        }

        let mut up = state.replicas.iter().filter(|r| !r.restarting).peekable();
        if up.peek().is_none() {
            return ProbeResult::failed(transport, "no replica is accepting connections");
        }
        if up.any(|r| r.mode.allows(transport)) {
            ProbeResult::ok(transport)
        } else {
            ProbeResult::failed(transport, format!("{transport} rejected by every replica"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource() -> ResourceRef {
        ResourceRef::new("sim", "mdb")
    }

    async fn provisioned(settings: SimulatorSettings) -> Arc<SimulatedCluster> {
        let cluster = Arc::new(SimulatedCluster::new(settings));
        cluster.provision(&resource()).await.unwrap();
        cluster
    }

    #[test]
    fn fault_names_round_trip() {
        for fault in Fault::ALL {
            assert_eq!(fault.as_str().parse::<Fault>().unwrap(), fault);
        }
        assert!("meteor-strike".parse::<Fault>().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn unprovisioned_cluster_rejects_mutation() {
        let cluster = SimulatedCluster::new(SimulatorSettings::default());
        let err = cluster.set_mode(&resource(), Mode::Optional).await.unwrap_err();
        assert!(err.to_string().contains("has not been provisioned"));
        assert!(!cluster.attempt(Transport::Plaintext).await.success);
    }

    #[tokio::test(start_paused = true)]
    async fn provisioning_creates_credentials_and_certificate() {
        let cluster = provisioned(SimulatorSettings::default()).await;
        let (credentials, certificate) = cluster.secrets().unwrap();
        assert_eq!(credentials, "mdb-admin-password");
        assert_eq!(certificate, "mdb-cert");
    }

    #[tokio::test(start_paused = true)]
    async fn rollout_restarts_one_replica_at_a_time() {
        let cluster = provisioned(SimulatorSettings::default()).await;
        cluster.set_mode(&resource(), Mode::Optional).await.unwrap();

        let mut modes_seen = Vec::new();
        for _ in 0..14 {
            tokio::time::sleep(Duration::from_millis(500)).await;
            assert!(cluster.restarting() <= 1);
            assert!(cluster.attempt(Transport::Plaintext).await.success);
            modes_seen.push(cluster.replica_modes());
        }

        assert!(modes_seen.contains(&vec![Mode::None, Mode::None, Mode::Optional]));
        assert!(modes_seen.contains(&vec![Mode::None, Mode::Optional, Mode::Optional]));
        assert_eq!(cluster.replica_modes(), vec![Mode::Optional; 3]);
        assert!(cluster.is_ready(&resource()).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn state_is_unavailable_while_replica_zero_restarts() {
        let cluster = provisioned(SimulatorSettings::default()).await;
        cluster.set_mode(&resource(), Mode::Optional).await.unwrap();

        // Replicas 2 and 1 restart during the first 4s.
        tokio::time::sleep(Duration::from_millis(4500)).await;
        let err = cluster.current_mode(&resource()).await.unwrap_err();
        assert!(err.is_transient());
        assert!(!cluster.is_ready(&resource()).await.unwrap());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(cluster.current_mode(&resource()).await.unwrap().value, Mode::Optional);
    }

    #[tokio::test(start_paused = true)]
    async fn required_mode_rejects_plaintext() {
        let cluster = provisioned(SimulatorSettings::default().starting_in(Mode::Required)).await;
        assert!(cluster.attempt(Transport::Tls).await.success);
        let result = cluster.attempt(Transport::Plaintext).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("plaintext rejected by every replica"));
    }

    #[tokio::test(start_paused = true)]
    async fn plaintext_gap_drops_plaintext_during_first_restart() {
        let cluster =
            provisioned(SimulatorSettings::default().with_fault(Fault::PlaintextGap)).await;
        cluster.set_mode(&resource(), Mode::Optional).await.unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!cluster.attempt(Transport::Plaintext).await.success);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(cluster.attempt(Transport::Plaintext).await.success);
    }

    #[tokio::test(start_paused = true)]
    async fn internal_auth_requires_every_member_on_transport() {
        let cluster = provisioned(SimulatorSettings::default()).await;
        let err = cluster.verify_internal_auth(3, Transport::Tls).await.unwrap_err();
        assert!(err.to_string().contains("member 0 cannot authenticate over tls"));

        let err = cluster.verify_internal_auth(5, Transport::Plaintext).await.unwrap_err();
        assert!(err.to_string().contains("expected 5 members, found 3"));

        assert!(cluster.verify_internal_auth(3, Transport::Plaintext).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn setup_failure_has_context() {
        let cluster = SimulatedCluster::new(SimulatorSettings::default().with_fault(Fault::SetupFailure));
        let err = cluster.provision(&resource()).await.unwrap_err();
        assert_eq!(
            format!("{err:#}"),
            "creating TLS certificate for sim/mdb: certificate issuer is not ready"
        );
        assert!(!cluster.is_provisioned());
    }
}
