//! HTTP binding of the executor API.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::BytesMut;
use futures::StreamExt;
use serde::Deserialize;

use corral_core::container::{Container, ContainerSpec};
use corral_core::error::{Error, Result};
use corral_core::executor::{ContainerEvent, EventStream};
use corral_core::identity::ContainerIdentity;
use corral_core::resources::Resources;
use corral_core::ExecutorClient;

use super::response_error;

/// Client for the executor HTTP API.
#[derive(Clone)]
pub struct HttpExecutorClient {
    base_url: String,
    client: reqwest::Client,
}

/// One line of the executor's newline-delimited event stream.
#[derive(Deserialize)]
#[serde(tag = "event", content = "container", rename_all = "kebab-case")]
enum WireEvent {
    ContainerReserved(Container),
    ContainerCreated(Container),
    ContainerRunning(Container),
    ContainerCompleted(Container),
}

impl From<WireEvent> for ContainerEvent {
    fn from(event: WireEvent) -> Self {
        match event {
            WireEvent::ContainerReserved(c) => Self::Reserved(c),
            WireEvent::ContainerCreated(c) => Self::Created(c),
            WireEvent::ContainerRunning(c) => Self::Running(c),
            WireEvent::ContainerCompleted(c) => Self::Completed(c),
        }
    }
}

impl HttpExecutorClient {
    /// Creates a client against the given base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into(),
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.trim_end_matches('/'))
    }

    async fn get_json<Resp: serde::de::DeserializeOwned>(&self, path: &str) -> Result<Resp> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|err| Error::http_with_source(format!("executor {path}"), err))?;
        if !response.status().is_success() {
            return Err(response_error(&format!("executor {path}"), response).await);
        }
        response
            .json()
            .await
            .map_err(|err| Error::http_with_source(format!("executor {path}: invalid body"), err))
    }

    async fn check(
        &self,
        context: &str,
        identity: Option<&ContainerIdentity>,
        response: reqwest::Response,
    ) -> Result<()> {
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            if let Some(identity) = identity {
                return Err(Error::container_not_found(identity.as_str()));
            }
        }
        if !response.status().is_success() {
            return Err(response_error(context, response).await);
        }
        Ok(())
    }
}

#[async_trait]
impl ExecutorClient for HttpExecutorClient {
    async fn ping(&self) -> Result<()> {
        let response = self
            .client
            .get(self.url("ping"))
            .send()
            .await
            .map_err(|err| Error::http_with_source("executor ping", err))?;
        if !response.status().is_success() {
            return Err(response_error("executor ping", response).await);
        }
        Ok(())
    }

    async fn total_resources(&self) -> Result<Resources> {
        self.get_json("resources/total").await
    }

    async fn remaining_resources(&self) -> Result<Resources> {
        self.get_json("resources/remaining").await
    }

    async fn list_containers(&self, tags: &BTreeMap<String, String>) -> Result<Vec<Container>> {
        let response = self
            .client
            .post(self.url("containers/list"))
            .json(tags)
            .send()
            .await
            .map_err(|err| Error::http_with_source("executor list", err))?;
        if !response.status().is_success() {
            return Err(response_error("executor list", response).await);
        }
        response
            .json()
            .await
            .map_err(|err| Error::http_with_source("executor list: invalid body", err))
    }

    async fn get_container(&self, identity: &ContainerIdentity) -> Result<Container> {
        let response = self
            .client
            .get(self.url(&format!("containers/{identity}")))
            .send()
            .await
            .map_err(|err| Error::http_with_source("executor get", err))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::container_not_found(identity.as_str()));
        }
        if !response.status().is_success() {
            return Err(response_error("executor get", response).await);
        }
        response
            .json()
            .await
            .map_err(|err| Error::http_with_source("executor get: invalid body", err))
    }

    async fn allocate_container(&self, spec: ContainerSpec) -> Result<()> {
        let response = self
            .client
            .post(self.url("containers"))
            .json(&spec)
            .send()
            .await
            .map_err(|err| Error::http_with_source("executor allocate", err))?;
        if !response.status().is_success() {
            return Err(response_error("executor allocate", response).await);
        }
        Ok(())
    }

    async fn run_container(&self, identity: &ContainerIdentity) -> Result<()> {
        let response = self
            .client
            .post(self.url(&format!("containers/{identity}/run")))
            .send()
            .await
            .map_err(|err| Error::http_with_source("executor run", err))?;
        self.check("executor run", Some(identity), response).await
    }

    async fn stop_container(&self, identity: &ContainerIdentity) -> Result<()> {
        let response = self
            .client
            .post(self.url(&format!("containers/{identity}/stop")))
            .send()
            .await
            .map_err(|err| Error::http_with_source("executor stop", err))?;
        self.check("executor stop", Some(identity), response).await
    }

    async fn delete_container(&self, identity: &ContainerIdentity) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("containers/{identity}")))
            .send()
            .await
            .map_err(|err| Error::http_with_source("executor delete", err))?;
        self.check("executor delete", Some(identity), response).await
    }

    async fn subscribe(&self) -> Result<EventStream> {
        let response = self
            .client
            .get(self.url("events"))
            .send()
            .await
            .map_err(|err| Error::http_with_source("executor subscribe", err))?;
        if !response.status().is_success() {
            return Err(response_error("executor subscribe", response).await);
        }

        // The executor streams newline-delimited JSON events.
        let bytes = response.bytes_stream();
        let stream = futures::stream::try_unfold(
            (bytes, BytesMut::new()),
            |(mut bytes, mut buffer)| async move {
                loop {
                    if let Some(position) = buffer.iter().position(|&b| b == b'\n') {
                        let line = buffer.split_to(position + 1);
                        let line = &line[..line.len() - 1];
                        if line.is_empty() {
                            continue;
                        }
                        let event: WireEvent = serde_json::from_slice(line)?;
                        return Ok(Some((ContainerEvent::from(event), (bytes, buffer))));
                    }
                    match bytes.next().await {
                        Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                        Some(Err(err)) => {
                            return Err(Error::http_with_source("event stream failed", err));
                        }
                        None => return Ok(None),
                    }
                }
            },
        );
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_events_parse_kebab_case_tags() {
        let line = serde_json::json!({
            "event": "container-running",
            "container": {
                "identity": "t-1",
                "state": "running",
            }
        });
        let event: WireEvent = serde_json::from_value(line).expect("parse");
        let event = ContainerEvent::from(event);
        assert_eq!(event.name(), "container-running");
        assert_eq!(event.container().identity.as_str(), "t-1");
    }
}
