//! HTTP binding of the coordination store's lease API.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use corral_core::coordination::{AcquireResult, CoordinationStore, RenewResult};
use corral_core::error::{Error, Result};

use super::response_error;

/// Client for the coordination store's lease-backed key-value API.
#[derive(Clone)]
pub struct HttpCoordinationStore {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AcquireRequest<'a> {
    payload: &'a [u8],
    ttl_seconds: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AcquireResponse {
    lease_token: String,
    ttl_seconds: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HeldResponse {
    #[serde(default)]
    holder: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LeaseScope<'a> {
    lease_token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenewResponse {
    ttl_seconds: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FetchResponse {
    payload: Vec<u8>,
}

impl HttpCoordinationStore {
    /// Creates a client against the given cluster URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into(),
            client,
        }
    }

    fn url(&self, key: &str) -> String {
        format!("{}/v1/leases/{key}", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl CoordinationStore for HttpCoordinationStore {
    async fn acquire(&self, key: &str, payload: &[u8], ttl: Duration) -> Result<AcquireResult> {
        let response = self
            .client
            .put(self.url(key))
            .json(&AcquireRequest {
                payload,
                ttl_seconds: ttl.as_secs(),
            })
            .send()
            .await
            .map_err(|err| Error::http_with_source("lease acquire", err))?;
        if response.status() == reqwest::StatusCode::CONFLICT {
            let held: HeldResponse = response.json().await.unwrap_or(HeldResponse { holder: None });
            return Ok(AcquireResult::Held { holder: held.holder });
        }
        if !response.status().is_success() {
            return Err(response_error("lease acquire", response).await);
        }
        let body: AcquireResponse = response
            .json()
            .await
            .map_err(|err| Error::http_with_source("lease acquire: invalid body", err))?;
        Ok(AcquireResult::Acquired {
            lease_token: body.lease_token,
            ttl: Duration::from_secs(body.ttl_seconds),
        })
    }

    async fn renew(&self, key: &str, lease_token: &str) -> Result<RenewResult> {
        let response = self
            .client
            .post(format!("{}/renew", self.url(key)))
            .json(&LeaseScope { lease_token })
            .send()
            .await
            .map_err(|err| Error::http_with_source("lease renew", err))?;
        match response.status() {
            reqwest::StatusCode::NOT_FOUND | reqwest::StatusCode::GONE => Ok(RenewResult::Lost),
            reqwest::StatusCode::FORBIDDEN => Ok(RenewResult::InvalidToken),
            status if status.is_success() => {
                let body: RenewResponse = response
                    .json()
                    .await
                    .map_err(|err| Error::http_with_source("lease renew: invalid body", err))?;
                Ok(RenewResult::Renewed {
                    ttl: Duration::from_secs(body.ttl_seconds),
                })
            }
            _ => Err(response_error("lease renew", response).await),
        }
    }

    async fn release(&self, key: &str, lease_token: &str) -> Result<bool> {
        let response = self
            .client
            .delete(self.url(key))
            .json(&LeaseScope { lease_token })
            .send()
            .await
            .map_err(|err| Error::http_with_source("lease release", err))?;
        match response.status() {
            reqwest::StatusCode::NOT_FOUND | reqwest::StatusCode::FORBIDDEN => Ok(false),
            status if status.is_success() => Ok(true),
            _ => Err(response_error("lease release", response).await),
        }
    }

    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let response = self
            .client
            .get(self.url(key))
            .send()
            .await
            .map_err(|err| Error::http_with_source("lease fetch", err))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(response_error("lease fetch", response).await);
        }
        let body: FetchResponse = response
            .json()
            .await
            .map_err(|err| Error::http_with_source("lease fetch: invalid body", err))?;
        Ok(Some(body.payload))
    }
}
