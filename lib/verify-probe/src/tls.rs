//! Client TLS settings for HTTPS and TLS-over-TCP probes

use std::io::BufReader;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pemfile::{certs, read_all};
use tracing::debug;
use verify_core::{HarnessError, Result};

/// PEM-encoded client certificate and key presented for mutual TLS
#[derive(Clone, Debug, PartialEq)]
pub struct ClientIdentity {
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

impl ClientIdentity {
    pub fn new(cert_pem: impl Into<Vec<u8>>, key_pem: impl Into<Vec<u8>>) -> Self {
        Self {
            cert_pem: cert_pem.into(),
            key_pem: key_pem.into(),
        }
    }
}

/// TLS configuration used by probes when connecting to a router
#[derive(Clone, Debug, PartialEq)]
pub struct TlsClientConfig {
    /// PEM-encoded CA bundle trusted for the server certificate
    pub ca_cert_pem: Option<Vec<u8>>,
    /// Optional client certificate
    pub identity: Option<ClientIdentity>,
    /// Whether to verify the server certificate
    pub verify_server_cert: bool,
}

impl TlsClientConfig {
    /// Verify the server against `ca_pem`
    pub fn trusting(ca_pem: impl Into<Vec<u8>>) -> Self {
        Self {
            ca_cert_pem: Some(ca_pem.into()),
            identity: None,
            verify_server_cert: true,
        }
    }

    /// Accept any server certificate
    pub fn insecure() -> Self {
        Self {
            ca_cert_pem: None,
            identity: None,
            verify_server_cert: false,
        }
    }

    pub fn with_identity(mut self, identity: ClientIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Build the rustls client configuration
    pub fn to_rustls(&self) -> Result<ClientConfig> {
        let builder =
            ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
                .with_safe_default_protocol_versions()
                .map_err(|e| HarnessError::Tls(format!("Failed to select TLS versions: {}", e)))?;

        let builder = if self.verify_server_cert {
            let ca_pem = self.ca_cert_pem.as_deref().ok_or_else(|| {
                HarnessError::Tls("Server verification requires a CA certificate".to_string())
            })?;
            let ca_certs = load_certificates(ca_pem)?;
            if ca_certs.is_empty() {
                return Err(HarnessError::Tls("No CA certificates found in PEM data".to_string()));
            }

            let mut root_store = RootCertStore::empty();
            for cert in ca_certs {
                root_store.add(cert).map_err(|e| {
                    HarnessError::Tls(format!("Failed to add CA certificate to root store: {}", e))
                })?;
            }
            debug!("Trusting {} CA certificate(s)", root_store.len());
            builder.with_root_certificates(root_store)
        } else {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(InsecureServerCertVerifier))
        };

        match &self.identity {
            Some(identity) => {
                let client_certs = load_certificates(&identity.cert_pem)?;
                if client_certs.is_empty() {
                    return Err(HarnessError::Tls(
                        "No client certificates found in PEM data".to_string(),
                    ));
                }
                let key = load_private_key(&identity.key_pem)?;
                builder
                    .with_client_auth_cert(client_certs, key)
                    .map_err(|e| HarnessError::Tls(format!("Failed to set client certificate: {}", e)))
            }
            None => Ok(builder.with_no_client_auth()),
        }
    }
}

/// Load certificates from PEM-encoded data
pub fn load_certificates(pem_data: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(pem_data);
    certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| HarnessError::Tls(format!("Failed to parse certificates: {}", e)))
}

/// Load the first private key from PEM-encoded data
pub fn load_private_key(pem_data: &[u8]) -> Result<PrivateKeyDer<'static>> {
    let mut reader = BufReader::new(pem_data);
    let items: Vec<_> = read_all(&mut reader)
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| HarnessError::Tls(format!("Failed to parse private key: {}", e)))?;

    items
        .into_iter()
        .find_map(|item| match item {
            rustls_pemfile::Item::Pkcs8Key(k) => Some(PrivateKeyDer::Pkcs8(k)),
            rustls_pemfile::Item::Pkcs1Key(k) => Some(PrivateKeyDer::Pkcs1(k)),
            rustls_pemfile::Item::Sec1Key(k) => Some(PrivateKeyDer::Sec1(k)),
            _ => None,
        })
        .ok_or_else(|| HarnessError::Tls("No private key found in PEM data".to_string()))
}

/// Accepts any server certificate
#[derive(Debug)]
struct InsecureServerCertVerifier;

impl ServerCertVerifier for InsecureServerCertVerifier {
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
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}
