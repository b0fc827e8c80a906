//! Mutual-TLS client configuration from in-memory PEM material.

use crate::error::ConnectError;
use retainer_core::endpoint::Credentials;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};
use std::sync::Arc;

/// Builds a client config that presents the client certificate and trusts
/// only the supplied root.
pub fn client_config(credentials: &Credentials) -> Result<Arc<ClientConfig>, ConnectError> {
    let roots = parse_certificates(&credentials.root_cert, "root certificate")?;
    let mut root_store = RootCertStore::empty();
    for cert in roots {
        root_store
            .add(cert)
            .map_err(|e| ConnectError::Credentials(format!("failed to add root certificate: {e}")))?;
    }

    let chain = parse_certificates(&credentials.client_cert, "client certificate")?;
    let key = parse_private_key(&credentials.client_key)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ConnectError::Credentials(format!("protocol setup failed: {e}")))?
        .with_root_certificates(root_store)
        .with_client_auth_cert(chain, key)
        .map_err(|e| ConnectError::Credentials(format!("client key does not match certificate: {e}")))?;

    Ok(Arc::new(config))
}

fn parse_certificates(pem: &[u8], what: &str) -> Result<Vec<CertificateDer<'static>>, ConnectError> {
    let certs = CertificateDer::pem_slice_iter(pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ConnectError::Credentials(format!("failed to parse {what}: {e}")))?;
    if certs.is_empty() {
        return Err(ConnectError::Credentials(format!("no {what} found")));
    }
    Ok(certs)
}

fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>, ConnectError> {
    PrivateKeyDer::from_pem_slice(pem).map_err(|e| {
        ConnectError::Credentials(format!(
            "no usable private key (password-protected keys are not supported): {e}"
        ))
    })
}
