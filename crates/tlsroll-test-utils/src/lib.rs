//! Testing utilities for the tlsroll workspace
//!
//! Scripted collaborators and proptest strategies.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use proptest::prelude::*;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tlsroll_core::{
    AuthVerifier, Collaborators, ConnectivityProbe, Mode, ObserveError, Observation, ProbeResult,
    ReadinessObserver, ResourceMutator, ResourceProvisioner, ResourceRef, StateObserver, Transport,
};

/// Probe whose health per transport is toggled by the test
#[derive(Debug)]
pub struct ScriptedProbe {
    plaintext: AtomicBool,
    tls: AtomicBool,
    attempts: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new(plaintext: bool, tls: bool) -> Self {
        Self {
            plaintext: AtomicBool::new(plaintext),
            tls: AtomicBool::new(tls),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn healthy() -> Self {
        Self::new(true, true)
    }

    pub fn set_healthy(&self, transport: Transport, healthy: bool) {
        self.flag(transport).store(healthy, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn flag(&self, transport: Transport) -> &AtomicBool {
        match transport {
            Transport::Plaintext => &self.plaintext,
            Transport::Tls => &self.tls,
        }
    }
}

#[async_trait]
impl ConnectivityProbe for ScriptedProbe {
    async fn attempt(&self, transport: Transport) -> ProbeResult {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.flag(transport).load(Ordering::SeqCst) {
            ProbeResult::ok(transport)
        } else {
            ProbeResult::failed(transport, "connection refused")
        }
    }
}

/// State observer that replays a script, then repeats its last entry
#[derive(Debug, Default)]
pub struct ScriptedStateObserver {
    script: Mutex<VecDeque<Result<Mode, ObserveError>>>,
    last: Mutex<Option<Result<Mode, ObserveError>>>,
    calls: AtomicUsize,
}

impl ScriptedStateObserver {
    pub fn new(script: impl IntoIterator<Item = Result<Mode, ObserveError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn modes(modes: impl IntoIterator<Item = Mode>) -> Self {
        Self::new(modes.into_iter().map(Ok))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next(&self) -> Result<Mode, ObserveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut last = self.last.lock();
        if let Some(entry) = self.script.lock().pop_front() {
            *last = Some(entry);
        }
        last.clone()
            .unwrap_or_else(|| Err(ObserveError::Transient("nothing scripted".into())))
    }
}

#[async_trait]
impl StateObserver for ScriptedStateObserver {
    async fn current_mode(&self, _resource: &ResourceRef) -> Result<Observation<Mode>, ObserveError> {
        self.next().map(Observation::now)
    }
}

/// Mutator that records each request
#[derive(Debug, Default)]
pub struct RecordingMutator {
    requested: Mutex<Vec<Mode>>,
}

impl RecordingMutator {
    pub fn requested(&self) -> Vec<Mode> {
        self.requested.lock().clone()
    }
}

#[async_trait]
impl ResourceMutator for RecordingMutator {
    async fn set_mode(&self, _resource: &ResourceRef, mode: Mode) -> anyhow::Result<()> {
        self.requested.lock().push(mode);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StaticReadiness(pub bool);

#[async_trait]
impl ReadinessObserver for StaticReadiness {
    async fn is_ready(&self, _resource: &ResourceRef) -> Result<bool, ObserveError> {
        Ok(self.0)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OkAuth;

#[async_trait]
impl AuthVerifier for OkAuth {
    async fn verify_internal_auth(&self, _replicas: usize, _transport: Transport) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Provisioner that succeeds, or fails with the given message
#[derive(Debug, Clone, Default)]
pub struct StaticProvisioner(pub Option<String>);

#[async_trait]
impl ResourceProvisioner for StaticProvisioner {
    async fn provision(&self, _resource: &ResourceRef) -> anyhow::Result<()> {
        match &self.0 {
            Some(reason) => Err(anyhow::anyhow!("{reason}")),
            None => Ok(()),
        }
    }
}

/// Collaborators that are ready, authenticated and provisioned
pub fn collaborators(
    probe: Arc<dyn ConnectivityProbe>,
    state: Arc<dyn StateObserver>,
    mutator: Arc<dyn ResourceMutator>,
) -> Collaborators {
    Collaborators {
        mutator,
        readiness: Arc::new(StaticReadiness(true)),
        state,
        auth: Arc::new(OkAuth),
        provisioner: Arc::new(StaticProvisioner::default()),
        probe,
    }
}

pub fn test_resource() -> ResourceRef {
    ResourceRef::new("tlsroll-test", "mdb")
}

pub fn arb_mode() -> impl Strategy<Value = Mode> {
    prop_oneof![Just(Mode::None), Just(Mode::Optional), Just(Mode::Required)]
}

pub fn arb_transport() -> impl Strategy<Value = Transport> {
    prop_oneof![Just(Transport::Plaintext), Just(Transport::Tls)]
}
