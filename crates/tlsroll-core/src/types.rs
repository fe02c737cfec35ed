//! Core types for tlsroll
//!
//! Defines the vocabulary shared by every component:
//! - Cluster-side transport-security modes and probe-side transports
//! - Resource references handed to external collaborators
//! - Session identifiers and timestamped observations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Transport-security posture enforced by the cluster.
///
/// Ordered by migration sequence: `None < Optional < Required`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Plaintext only
    None,
    /// Plaintext and TLS both accepted
    Optional,
    /// TLS only
    Required,
}

impl Mode {
    /// Whether a cluster in this mode accepts connections over `transport`.
    #[inline]
    #[must_use]
    pub fn allows(self, transport: Transport) -> bool {
        match (self, transport) {
            (Self::None, Transport::Plaintext) | (Self::Required, Transport::Tls) => true,
            (Self::Optional, _) => true,
            (Self::None, Transport::Tls) | (Self::Required, Transport::Plaintext) => false,
        }
    }

    /// Lowercase wire name
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Optional => "optional",
            Self::Required => "required",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "disabled" => Ok(Self::None),
            "optional" | "prefer" | "prefertls" | "preferssl" => Ok(Self::Optional),
            "required" | "require" | "requiretls" | "requiressl" => Ok(Self::Required),
            other => Err(format!("unknown mode: {other}")),
        }
    }
}

/// How a single probe connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Unencrypted connection
    Plaintext,
    /// TLS-secured connection
    Tls,
}

impl Transport {
    /// Both transports, plaintext first
    pub const ALL: [Transport; 2] = [Transport::Plaintext, Transport::Tls];
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plaintext => f.write_str("plaintext"),
            Self::Tls => f.write_str("tls"),
        }
    }
}

impl FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plaintext" | "plain" | "tcp" => Ok(Self::Plaintext),
            "tls" | "ssl" => Ok(Self::Tls),
            other => Err(format!("unknown transport: {other}")),
        }
    }
}

/// Reference to the clustered resource under migration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    /// Namespace the resource lives in
    pub namespace: String,
    /// Resource name
    pub name: String,
}

impl ResourceRef {
    /// Create a new resource reference
    #[inline]
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Unique verification session identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Ulid);

impl SessionId {
    /// Generate new session ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A value read from an external observer, stamped with when it was read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation<T> {
    /// The observed value
    pub value: T,
    /// Wall-clock time the value was sampled
    pub observed_at: DateTime<Utc>,
}

impl<T> Observation<T> {
    /// Observation sampled now
    #[inline]
    #[must_use]
    pub fn now(value: T) -> Self {
        Self {
            value,
            observed_at: Utc::now(),
        }
    }

    /// Observation with an explicit timestamp
    #[inline]
    #[must_use]
    pub fn at(value: T, observed_at: DateTime<Utc>) -> Self {
        Self { value, observed_at }
    }
}
