//! # TLS Stream Wrapper
//!
//! Server-side TLS for gateway listeners, with optional mutual TLS.
//! Certificates and keys are read from PEM files; private keys must be PKCS#8.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use rustls::{Certificate, PrivateKey, RootCertStore, ServerConfig};
use rustls_pemfile::{certs, pkcs8_private_keys};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, instrument};

use crate::error::{ProtocolError, Result};
use crate::transport::secure::{BoxedStream, StreamWrapper};

/// Paths for the server certificate chain, key and optional client CA
#[derive(Debug, Clone)]
pub struct TlsServerConfig {
    cert_path: PathBuf,
    key_path: PathBuf,
    /// Client CA bundle; when set, clients must present a certificate
    client_ca_path: Option<PathBuf>,
}

impl TlsServerConfig {
    pub fn new<P: AsRef<Path>>(cert_path: P, key_path: P) -> Self {
        Self {
            cert_path: cert_path.as_ref().to_path_buf(),
            key_path: key_path.as_ref().to_path_buf(),
            client_ca_path: None,
        }
    }

    /// Require client certificates signed by the CA in `client_ca_path`
    pub fn with_client_auth<P: AsRef<Path>>(mut self, client_ca_path: P) -> Self {
        self.client_ca_path = Some(client_ca_path.as_ref().to_path_buf());
        self
    }

    /// Build a rustls server configuration (TLS 1.2+, safe cipher suites)
    pub fn load_server_config(&self) -> Result<ServerConfig> {
        let cert_chain = load_certs(&self.cert_path)?;

        let key_file = File::open(&self.key_path)
            .map_err(|e| ProtocolError::TlsError(format!("Failed to open key file: {e}")))?;
        let mut keys = pkcs8_private_keys(&mut BufReader::new(key_file))
            .map_err(|_| ProtocolError::TlsError("Failed to parse private key".into()))?;
        if keys.is_empty() {
            return Err(ProtocolError::TlsError("No private keys found".into()));
        }
        let private_key = PrivateKey(keys.swap_remove(0));

        let builder = ServerConfig::builder().with_safe_defaults();
        let config = match &self.client_ca_path {
            Some(client_ca_path) => {
                let mut roots = RootCertStore::empty();
                for cert in load_certs(client_ca_path)? {
                    roots.add(&cert).map_err(|e| {
                        ProtocolError::TlsError(format!("Failed to add client CA cert: {e}"))
                    })?;
                }
                debug!("mTLS enabled with client certificate verification required");
                builder
                    .with_client_cert_verifier(Arc::new(
                        rustls::server::AllowAnyAuthenticatedClient::new(roots),
                    ))
                    .with_single_cert(cert_chain, private_key)
            }
            None => builder
                .with_no_client_auth()
                .with_single_cert(cert_chain, private_key),
        };

        config.map_err(|e| ProtocolError::TlsError(format!("TLS error: {e}")))
    }
}

fn load_certs(path: &Path) -> Result<Vec<Certificate>> {
    let file = File::open(path).map_err(|e| {
        ProtocolError::TlsError(format!("Failed to open {}: {e}", path.display()))
    })?;
    let chain = certs(&mut BufReader::new(file))
        .map_err(|_| ProtocolError::TlsError("Failed to parse certificate".into()))?;
    if chain.is_empty() {
        return Err(ProtocolError::TlsError(format!(
            "No certificates in {}",
            path.display()
        )));
    }
    Ok(chain.into_iter().map(Certificate).collect())
}

/// Accepts TLS on every wrapped stream
#[derive(Clone)]
pub struct TlsStreamWrapper {
    acceptor: TlsAcceptor,
}

impl TlsStreamWrapper {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self {
            acceptor: TlsAcceptor::from(config),
        }
    }

    pub fn from_config(config: &TlsServerConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(config.load_server_config()?)))
    }
}

#[async_trait]
impl StreamWrapper for TlsStreamWrapper {
    fn name(&self) -> &'static str {
        "tls"
    }

    #[instrument(skip_all)]
    async fn wrap(&self, stream: BoxedStream) -> Result<BoxedStream> {
        let tls = self
            .acceptor
            .accept(stream)
            .await
            .map_err(|e| ProtocolError::TlsError(format!("TLS handshake failed: {e}")))?;
        Ok(Box::new(tls))
    }
}
