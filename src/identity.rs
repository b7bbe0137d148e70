//! Relay TLS identity
//!
//! The relay terminates TLS from the control tool with a self-signed
//! certificate that is generated fresh on every server start. Nothing is
//! written to disk, so the control tool has to trust the new certificate each
//! session.

use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose, SanType,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use sha2::{Digest, Sha256};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use thiserror::Error;
use time::{Duration, OffsetDateTime};

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Failed to generate certificate: {0}")]
    CertGeneration(String),

    #[error("Invalid certificate: {0}")]
    InvalidCert(String),
}

/// Certificate and private key presented by the relay listener.
pub struct RootIdentity {
    cert_der: CertificateDer<'static>,
    cert_pem: String,
    key: KeyPair,
}

impl RootIdentity {
    /// Generate a new self-signed certificate and key pair
    pub fn generate() -> Result<Self, IdentityError> {
        let mut params = CertificateParams::new(vec!["localhost".to_string()])
            .map_err(|e| IdentityError::CertGeneration(e.to_string()))?;

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "Mimic Relay");
        dn.push(DnType::OrganizationName, "Mimic Relay");
        params.distinguished_name = dn;

        params.subject_alt_names.push(SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        params.subject_alt_names.push(SanType::IpAddress(IpAddr::V6(Ipv6Addr::LOCALHOST)));

        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

        params.not_before = OffsetDateTime::now_utc() - Duration::days(1);
        params.not_after = OffsetDateTime::now_utc() + Duration::days(365);

        let key = KeyPair::generate().map_err(|e| IdentityError::CertGeneration(e.to_string()))?;

        let cert = params
            .self_signed(&key)
            .map_err(|e| IdentityError::CertGeneration(e.to_string()))?;

        tracing::debug!("Generated relay certificate");

        Ok(Self {
            cert_der: cert.der().clone(),
            cert_pem: cert.pem(),
            key,
        })
    }

    pub fn certificate_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn private_key_pem(&self) -> String {
        self.key.serialize_pem()
    }

    /// SHA-256 of the certificate DER, colon separated, for operators to compare.
    pub fn sha256_fingerprint(&self) -> String {
        Sha256::digest(self.cert_der.as_ref())
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(":")
    }

    /// Build the rustls ServerConfig used by the relay listener.
    pub fn server_config(&self) -> Result<Arc<ServerConfig>, IdentityError> {
        let cert_chain = rustls_pemfile::certs(&mut self.cert_pem.as_bytes())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| IdentityError::InvalidCert(e.to_string()))?;

        let private_key = PrivateKeyDer::try_from(self.key.serialize_der())
            .map_err(|e| IdentityError::InvalidCert(format!("Invalid private key: {:?}", e)))?;

        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(cert_chain, private_key)
            .map_err(|e| IdentityError::InvalidCert(e.to_string()))?;

        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        Ok(Arc::new(config))
    }
}
