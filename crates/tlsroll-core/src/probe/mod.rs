//! Connectivity probes
//!
//! A probe is a single-shot capability: attempt one connection under a
//! transport and report whether a verified round-trip happened. Failures
//! are values, never panics or `Err`s, so callers can accumulate them.

mod tcp;
mod tls;

pub use tcp::{Handshake, TcpProbe};
pub use tls::TlsClient;

use crate::types::Transport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome of one connection attempt. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// Transport that was attempted
    pub transport: Transport,
    /// Whether a verified round-trip completed
    pub success: bool,
    /// Failure detail
    pub error: Option<String>,
    /// When the attempt started
    pub timestamp: DateTime<Utc>,
    /// Time spent on the attempt
    pub latency_ms: u64,
}

impl ProbeResult {
    /// Successful attempt started now
    #[must_use]
    pub fn ok(transport: Transport) -> Self {
        Self {
            transport,
            success: true,
            error: None,
            timestamp: Utc::now(),
            latency_ms: 0,
        }
    }

    /// Failed attempt started now
    #[must_use]
    pub fn failed(transport: Transport, error: impl Into<String>) -> Self {
        Self::failed_at(transport, error, Utc::now())
    }

    /// Failed attempt with an explicit start time
    #[must_use]
    pub fn failed_at(transport: Transport, error: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            transport,
            success: false,
            error: Some(error.into()),
            timestamp,
            latency_ms: 0,
        }
    }

    /// Attach measured latency
    #[inline]
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

/// Attempt a connection under a transport.
///
/// Implementations open a fresh connection per call and bound each attempt
/// with their own timeout, so a hung peer never stalls the caller.
#[async_trait::async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Perform one attempt
    async fn attempt(&self, transport: Transport) -> ProbeResult;
}

/// Default per-attempt timeout
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
