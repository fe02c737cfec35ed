//! TCP connectivity probe
//!
//! Dials a fresh connection per attempt to the endpoint registered for the
//! requested transport and performs one request/reply exchange. TLS attempts
//! complete a TLS handshake first, so one address can be probed both ways.
//! The service protocol is opaque here: the exchange is a configurable byte
//! handshake.

use super::tls::TlsClient;
use super::{ConnectivityProbe, ProbeResult, DEFAULT_PROBE_TIMEOUT};
use crate::types::Transport;
use chrono::Utc;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;

/// Minimal round-trip performed on each connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Bytes written after connecting
    pub request: Vec<u8>,
    /// Reply must start with these bytes
    pub expect_prefix: Vec<u8>,
}

impl Handshake {
    /// Create a handshake
    #[must_use]
    pub fn new(request: impl Into<Vec<u8>>, expect_prefix: impl Into<Vec<u8>>) -> Self {
        Self {
            request: request.into(),
            expect_prefix: expect_prefix.into(),
        }
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new(b"ping\n".to_vec(), b"pong".to_vec())
    }
}

/// Probe that dials per-transport TCP endpoints
#[derive(Debug, Clone)]
pub struct TcpProbe {
    endpoints: HashMap<Transport, SocketAddr>,
    tls: Option<TlsClient>,
    handshake: Handshake,
    timeout: Duration,
}

impl TcpProbe {
    /// Probe with no endpoints and the default timeout
    #[must_use]
    pub fn new() -> Self {
        Self {
            endpoints: HashMap::new(),
            tls: None,
            handshake: Handshake::default(),
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Register the address dialed for `transport`
    #[must_use]
    pub fn with_endpoint(mut self, transport: Transport, addr: SocketAddr) -> Self {
        self.endpoints.insert(transport, addr);
        self
    }

    /// Register `addr` for both transports
    #[must_use]
    pub fn with_address(self, addr: SocketAddr) -> Self {
        self.with_endpoint(Transport::Plaintext, addr)
            .with_endpoint(Transport::Tls, addr)
    }

    /// Client used to secure `Transport::Tls` attempts
    #[must_use]
    pub fn with_tls(mut self, client: TlsClient) -> Self {
        self.tls = Some(client);
        self
    }

    /// Replace the round-trip exchange
    #[must_use]
    pub fn with_handshake(mut self, handshake: Handshake) -> Self {
        self.handshake = handshake;
        self
    }

    /// Per-attempt timeout covering connect and exchange
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn round_trip(&self, addr: SocketAddr, tls: Option<&TlsClient>) -> Result<(), String> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| format!("connect {addr}: {e}"))?;

        match tls {
            None => self.exchange(stream, addr).await,
            Some(client) => {
                let stream = client
                    .connect(stream)
                    .await
                    .map_err(|e| format!("tls handshake with {addr}: {e}"))?;
                self.exchange(stream, addr).await
            }
        }
    }

    async fn exchange<S>(&self, mut stream: S, addr: SocketAddr) -> Result<(), String>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if !self.handshake.request.is_empty() {
            stream
                .write_all(&self.handshake.request)
                .await
                .map_err(|e| format!("write to {addr}: {e}"))?;
        }

        let mut reply = vec![0u8; self.handshake.expect_prefix.len()];
        stream
            .read_exact(&mut reply)
            .await
            .map_err(|e| format!("read from {addr}: {e}"))?;

        if reply != self.handshake.expect_prefix {
            return Err(format!(
                "unexpected reply from {addr}: {:?}",
                String::from_utf8_lossy(&reply)
            ));
        }
        Ok(())
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ConnectivityProbe for TcpProbe {
    async fn attempt(&self, transport: Transport) -> ProbeResult {
        let started_at = Utc::now();
        let clock = Instant::now();

        let Some(addr) = self.endpoints.get(&transport).copied() else {
            return ProbeResult::failed_at(
                transport,
                format!("no endpoint registered for {transport}"),
                started_at,
            );
        };

        let tls = match transport {
            Transport::Plaintext => None,
            Transport::Tls => {
                let Some(client) = self.tls.as_ref() else {
                    return ProbeResult::failed_at(
                        transport,
                        format!("no TLS client configured for {addr}"),
                        started_at,
                    );
                };
                Some(client)
            }
        };

        let outcome = match tokio::time::timeout(self.timeout, self.round_trip(addr, tls)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(format!(
                "{transport} attempt to {addr} timed out after {}ms",
                self.timeout.as_millis()
            )),
        };

        let result = match outcome {
            Ok(()) => ProbeResult {
                transport,
                success: true,
                error: None,
                timestamp: started_at,
                latency_ms: 0,
            },
            Err(detail) => {
                tracing::debug!(%transport, %addr, %detail, "probe failed");
                ProbeResult::failed_at(transport, detail, started_at)
            }
        };
        result.with_latency(clock.elapsed())
    }
}
