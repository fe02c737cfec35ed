//! External collaborator contracts
//!
//! Provisioning, mutation and observation of the clustered resource are
//! implemented outside this crate. The orchestrator only sees these traits.

use crate::error::ObserveError;
use crate::probe::ConnectivityProbe;
use crate::types::{Mode, Observation, ResourceRef, Transport};
use async_trait::async_trait;
use std::sync::Arc;

/// Requests a target security posture. May return before the rollout finishes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceMutator: Send + Sync {
    /// Request `mode` on `resource`
    async fn set_mode(&self, resource: &ResourceRef, mode: Mode) -> anyhow::Result<()>;
}

/// Reports whether a prior mutation has physically rolled out.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReadinessObserver: Send + Sync {
    /// `true` once every replica runs the requested configuration
    async fn is_ready(&self, resource: &ResourceRef) -> Result<bool, ObserveError>;
}

/// Source of the mode the cluster currently enforces.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StateObserver: Send + Sync {
    /// Current mode, stamped with when it was read
    async fn current_mode(&self, resource: &ResourceRef) -> Result<Observation<Mode>, ObserveError>;
}

/// Checks internal cluster authentication between replicas.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthVerifier: Send + Sync {
    /// Succeed if `replicas` members authenticate to each other over `transport`
    async fn verify_internal_auth(&self, replicas: usize, transport: Transport) -> anyhow::Result<()>;
}

/// Creates prerequisite material before the first phase.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceProvisioner: Send + Sync {
    /// Provision credentials and transport-security material for `resource`
    async fn provision(&self, resource: &ResourceRef) -> anyhow::Result<()>;
}

/// Everything the orchestrator calls out to
#[derive(Clone)]
pub struct Collaborators {
    /// Issues mode changes
    pub mutator: Arc<dyn ResourceMutator>,
    /// Rollout readiness
    pub readiness: Arc<dyn ReadinessObserver>,
    /// Enforced mode
    pub state: Arc<dyn StateObserver>,
    /// Internal authentication check
    pub auth: Arc<dyn AuthVerifier>,
    /// Prerequisite material
    pub provisioner: Arc<dyn ResourceProvisioner>,
    /// Connectivity
    pub probe: Arc<dyn ConnectivityProbe>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
