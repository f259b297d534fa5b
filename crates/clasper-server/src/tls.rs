// clasper-server/src/tls.rs
// ============================================================================
// Module: TLS and mTLS Configuration
// Description: Loads a certificate chain, private key, and optional client
// CA bundle from disk and builds an axum-server rustls config.
// Purpose: Terminate TLS (and, when a client CA bundle is configured, mTLS)
// for the HTTP surface using the certificate/key paths from ClasperConfig.
// Dependencies: rustls, rustls-pki-types, axum-server
// ============================================================================

//! ## Overview
//! [`build_tls_config`] loads PEM material with `rustls-pki-types`'s own
//! PEM parser (its `"pem"` feature) rather than a separate PEM crate, and
//! assembles a `rustls::ServerConfig` wrapped for `axum-server`. When
//! `client_ca_path` is set the server additionally verifies client
//! certificates against that bundle.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::sync::Arc;

use rustls::RootCertStore;
use rustls::server::WebPkiClientVerifier;
use rustls_pki_types::CertificateDer;
use rustls_pki_types::PrivateKeyDer;
use rustls_pki_types::pem::PemObject;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while assembling the server's TLS configuration.
#[derive(Debug, Error)]
pub enum TlsConfigError {
    /// The certificate chain file could not be read or contained no certificates.
    #[error("tls certificate load failed: {0}")]
    Certificate(String),
    /// The private key file could not be read or contained no recognized key.
    #[error("tls private key load failed: {0}")]
    PrivateKey(String),
    /// The client CA bundle could not be read or contained no certificates.
    #[error("tls client ca load failed: {0}")]
    ClientCa(String),
    /// `rustls::ServerConfig` construction rejected the supplied material.
    #[error("tls server config rejected: {0}")]
    ServerConfig(String),
}

// ============================================================================
// SECTION: Config Inputs
// ============================================================================

/// Filesystem paths needed to terminate TLS, mirroring `clasper_config::TlsConfig`.
pub struct TlsMaterial<'a> {
    /// PEM certificate chain path.
    pub cert_path: &'a Path,
    /// PEM private key path.
    pub key_path: &'a Path,
    /// Optional PEM client CA bundle path; presence enables mTLS.
    pub mtls_client_ca_path: Option<&'a Path>,
}

// ============================================================================
// SECTION: Config Builder
// ============================================================================

/// Builds an `axum-server` rustls config from `material`.
///
/// # Errors
/// Returns [`TlsConfigError`] if any PEM file is missing, unreadable, or
/// contains no usable certificate/key material, or if `rustls` rejects the
/// assembled configuration.
pub fn build_tls_config(material: &TlsMaterial<'_>) -> Result<axum_server::tls_rustls::RustlsConfig, TlsConfigError> {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    let certs = load_certificates(material.cert_path)?;
    let key = load_private_key(material.key_path)?;

    let builder = if let Some(ca_path) = material.mtls_client_ca_path {
        let roots = Arc::new(load_root_store(ca_path)?);
        let verifier = WebPkiClientVerifier::builder(roots)
            .build()
            .map_err(|err| TlsConfigError::ServerConfig(err.to_string()))?;
        rustls::ServerConfig::builder().with_client_cert_verifier(verifier)
    } else {
        rustls::ServerConfig::builder().with_no_client_auth()
    };

    let mut server_config = builder
        .with_single_cert(certs, key)
        .map_err(|err| TlsConfigError::ServerConfig(err.to_string()))?;
    server_config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(axum_server::tls_rustls::RustlsConfig::from_config(Arc::new(server_config)))
}

/// Loads a PEM-encoded certificate chain from disk.
fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsConfigError> {
    let certs: Vec<CertificateDer<'static>> = CertificateDer::pem_file_iter(path)
        .map_err(|err| TlsConfigError::Certificate(err.to_string()))?
        .collect::<Result<_, _>>()
        .map_err(|err| TlsConfigError::Certificate(err.to_string()))?;
    if certs.is_empty() {
        return Err(TlsConfigError::Certificate("file contains no certificates".to_string()));
    }
    Ok(certs)
}

/// Loads a PEM-encoded private key from disk, accepting PKCS#8, PKCS#1, or SEC1.
fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsConfigError> {
    PrivateKeyDer::from_pem_file(path).map_err(|err| TlsConfigError::PrivateKey(err.to_string()))
}

/// Loads a PEM-encoded CA bundle into a root store for client-certificate verification.
fn load_root_store(path: &Path) -> Result<RootCertStore, TlsConfigError> {
    let certs: Vec<CertificateDer<'static>> = CertificateDer::pem_file_iter(path)
        .map_err(|err| TlsConfigError::ClientCa(err.to_string()))?
        .collect::<Result<_, _>>()
        .map_err(|err| TlsConfigError::ClientCa(err.to_string()))?;
    if certs.is_empty() {
        return Err(TlsConfigError::ClientCa("file contains no certificates".to_string()));
    }
    let mut store = RootCertStore::empty();
    for cert in certs {
        store.add(cert).map_err(|err| TlsConfigError::ClientCa(err.to_string()))?;
    }
    Ok(store)
}
