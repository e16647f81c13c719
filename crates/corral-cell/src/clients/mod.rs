//! HTTP clients for the BBS, the executor, and the coordination store.

mod bbs;
mod coordination;
mod executor;

pub use bbs::HttpBbsClient;
pub use coordination::HttpCoordinationStore;
pub use executor::HttpExecutorClient;

use std::path::{Path, PathBuf};
use std::time::Duration;

use corral_core::error::{Error, Result};

/// Optional mutual-TLS material for the outbound clients.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// CA bundle to trust.
    pub ca_cert: Option<PathBuf>,
    /// Client certificate, paired with `client_key`.
    pub client_cert: Option<PathBuf>,
    /// Client key, paired with `client_cert`.
    pub client_key: Option<PathBuf>,
}

/// Builds the shared reqwest client with the communication timeout and any
/// configured TLS material.
pub fn build_http_client(timeout: Duration, tls: &TlsConfig) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().timeout(timeout);

    if let Some(path) = &tls.ca_cert {
        let pem = read_pem(path)?;
        let certificate = reqwest::Certificate::from_pem(&pem)
            .map_err(|err| Error::http_with_source("invalid CA certificate", err))?;
        builder = builder.add_root_certificate(certificate);
    }

    if let (Some(cert_path), Some(key_path)) = (&tls.client_cert, &tls.client_key) {
        let mut pem = read_pem(cert_path)?;
        pem.extend_from_slice(&read_pem(key_path)?);
        let identity = reqwest::Identity::from_pem(&pem)
            .map_err(|err| Error::http_with_source("invalid client certificate", err))?;
        builder = builder.identity(identity);
    }

    builder
        .build()
        .map_err(|err| Error::http_with_source("failed to build http client", err))
}

fn read_pem(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|err| {
        Error::invalid_config(format!("failed to read {}: {err}", path.display()))
    })
}

/// Maps a non-success response to the shared error taxonomy.
pub(crate) async fn response_error(context: &str, response: reqwest::Response) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if status == reqwest::StatusCode::CONFLICT {
        return Error::state_conflict(format!("{context}: {body}"));
    }
    if status == reqwest::StatusCode::INSUFFICIENT_STORAGE {
        return Error::insufficient_resources(format!("{context}: {body}"));
    }
    Error::http(format!("{context}: status {status}: {body}"))
}
