//! TLS client used by the TCP probe for `Transport::Tls` attempts

use crate::error::ConfigError;
use std::fmt;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName};
use tokio_rustls::rustls::{self, ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

/// Trust roots and the server name a TLS attempt verifies against
#[derive(Clone)]
pub struct TlsClient {
    connector: TlsConnector,
    server_name: ServerName<'static>,
}

impl TlsClient {
    /// Trust exactly `roots` and expect the peer to present `server_name`.
    ///
    /// # Errors
    /// `ConfigError::InvalidValue` for an empty or malformed root set or an
    /// invalid server name
    pub fn new(
        roots: impl IntoIterator<Item = CertificateDer<'static>>,
        server_name: &str,
    ) -> Result<Self, ConfigError> {
        let mut store = RootCertStore::empty();
        for cert in roots {
            store.add(cert).map_err(|e| ConfigError::InvalidValue {
                field: "tls_ca",
                reason: e.to_string(),
            })?;
        }
        if store.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "tls_ca",
                reason: "no trust roots".into(),
            });
        }

        let server_name =
            ServerName::try_from(server_name.to_owned()).map_err(|e| ConfigError::InvalidValue {
                field: "tls_server_name",
                reason: e.to_string(),
            })?;

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| ConfigError::InvalidValue {
                field: "tls_protocol_versions",
                reason: e.to_string(),
            })?
            .with_root_certificates(store)
            .with_no_client_auth();

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
            server_name,
        })
    }

    /// Load trust roots from a PEM bundle
    ///
    /// # Errors
    /// I/O failure, malformed PEM, or any error from [`TlsClient::new`]
    pub fn from_pem_file(path: impl AsRef<Path>, server_name: &str) -> Result<Self, ConfigError> {
        let mut reader = BufReader::new(std::fs::File::open(path)?);
        let roots = rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()?;
        Self::new(roots, server_name)
    }

    /// Name verified against the peer certificate
    #[must_use]
    pub fn server_name(&self) -> &ServerName<'static> {
        &self.server_name
    }

    pub(crate) async fn connect(&self, tcp: TcpStream) -> std::io::Result<TlsStream<TcpStream>> {
        self.connector.connect(self.server_name.clone(), tcp).await
    }
}

impl fmt::Debug for TlsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsClient")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn self_signed(name: &str) -> rcgen::CertifiedKey {
        rcgen::generate_simple_self_signed(vec![name.to_string()]).unwrap()
    }

    #[test]
    fn loads_roots_from_pem_file() {
        let certified = self_signed("localhost");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(certified.cert.pem().as_bytes()).unwrap();

        let client = TlsClient::from_pem_file(file.path(), "localhost").unwrap();
        assert!(format!("{client:?}").contains("localhost"));
    }

    #[test]
    fn empty_bundle_is_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = TlsClient::from_pem_file(file.path(), "localhost").unwrap_err();
        assert!(err.to_string().contains("no trust roots"));
    }

    #[test]
    fn invalid_server_name_is_rejected() {
        let certified = self_signed("localhost");
        let err = TlsClient::new([certified.cert.der().clone()], "not a hostname").unwrap_err();
        assert!(err.to_string().contains("tls_server_name"));
    }
}
