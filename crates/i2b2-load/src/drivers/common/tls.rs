//! Transport security for target connections.
//!
//! `target.ssl_mode` resolves to one [`SslMode`] for either driver.
//! PostgreSQL gets a rustls connector with `webpki-roots` trust anchors;
//! SQL Server maps the mode onto tiberius encryption levels.

use std::fmt;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{aws_lc_rs, CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::warn;

use crate::config::{DatabaseType, TargetConfig};
use crate::error::{LoadError, Result};

/// How a target connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SslMode {
    /// Plain TCP.
    Disable,
    /// Encrypted, server certificate not checked.
    Require,
    /// Encrypted, certificate chain and hostname checked.
    /// Accepted as `verify-ca` or `verify-full` (PostgreSQL only).
    Verify,
}

impl SslMode {
    /// Resolve `target.ssl_mode` for the configured driver.
    pub fn for_target(target: &TargetConfig) -> Result<Self> {
        let mode = match target.ssl_mode.trim().to_lowercase().as_str() {
            "" | "disable" => SslMode::Disable,
            "require" => SslMode::Require,
            "verify-ca" | "verify-full" if target.r#type == DatabaseType::Postgres => {
                SslMode::Verify
            }
            _ => {
                let valid = match target.r#type {
                    DatabaseType::Postgres => "disable, require, verify-ca, verify-full",
                    DatabaseType::Mssql => "disable, require",
                };
                return Err(LoadError::Config(format!(
                    "Invalid ssl_mode '{}' for {}. Valid values: {}",
                    target.ssl_mode, target.r#type, valid
                )));
            }
        };
        Ok(mode)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Require => "require",
            SslMode::Verify => "verify-full",
        }
    }
}

impl fmt::Display for SslMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connector for the PostgreSQL pool manager, `None` for plain TCP.
pub fn pg_connector(mode: SslMode) -> Result<Option<MakeRustlsConnect>> {
    let provider = Arc::new(aws_lc_rs::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| LoadError::Config(format!("TLS setup failed: {}", e)))?;

    let config = match mode {
        SslMode::Disable => return Ok(None),
        SslMode::Require => {
            warn!("ssl_mode=require: traffic is encrypted but the server certificate is not verified");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(EncryptOnly::new(&provider)))
                .with_no_client_auth()
        }
        SslMode::Verify => {
            let mut roots = RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            builder.with_root_certificates(roots).with_no_client_auth()
        }
    };

    Ok(Some(MakeRustlsConnect::new(config)))
}

/// Accepts any server certificate but still checks the handshake
/// signatures against it.
#[derive(Debug)]
struct EncryptOnly {
    algorithms: WebPkiSupportedAlgorithms,
}

impl EncryptOnly {
    fn new(provider: &CryptoProvider) -> Self {
        Self {
            algorithms: provider.signature_verification_algorithms,
        }
    }
}

impl ServerCertVerifier for EncryptOnly {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
