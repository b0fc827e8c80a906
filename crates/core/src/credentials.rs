//! Loads the three PEM artifacts for the engine's mutual-TLS session.

use crate::endpoint::Credentials;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Credential file missing: {0}")]
    Missing(PathBuf),
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} does not contain PEM data")]
    NotPem(PathBuf),
    #[error("{0} is password protected, which is not supported")]
    Encrypted(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialPaths {
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
    pub root_cert: PathBuf,
}

impl CredentialPaths {
    pub fn in_dir(dir: &Path, client_cert: &str, client_key: &str, root_cert: &str) -> Self {
        Self {
            client_cert: dir.join(client_cert),
            client_key: dir.join(client_key),
            root_cert: dir.join(root_cert),
        }
    }

    pub async fn load(&self) -> Result<Credentials, CredentialError> {
        let client_cert = read_pem(&self.client_cert).await?;
        let client_key = read_pem(&self.client_key).await?;
        let root_cert = read_pem(&self.root_cert).await?;

        if is_encrypted(&client_key) {
            return Err(CredentialError::Encrypted(self.client_key.clone()));
        }

        debug!("🔐 Loaded credentials from {}", self.client_cert.display());
        Ok(Credentials {
            client_cert,
            client_key,
            root_cert,
        })
    }
}

async fn read_pem(path: &Path) -> Result<Vec<u8>, CredentialError> {
    if !path.exists() {
        return Err(CredentialError::Missing(path.to_path_buf()));
    }
    let bytes = tokio::fs::read(path).await.map_err(|source| CredentialError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if !String::from_utf8_lossy(&bytes).contains("-----BEGIN ") {
        return Err(CredentialError::NotPem(path.to_path_buf()));
    }
    Ok(bytes)
}

fn is_encrypted(pem: &[u8]) -> bool {
    let text = String::from_utf8_lossy(pem);
    text.contains("BEGIN ENCRYPTED PRIVATE KEY") || text.contains("Proc-Type: 4,ENCRYPTED")
}
