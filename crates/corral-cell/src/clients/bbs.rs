//! HTTP binding of the BBS record APIs.

use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use corral_core::error::{Error, Result};
use corral_core::identity::{CellId, ProcessId, TaskId};
use corral_core::lrp::{ActualLrpGroup, LrpInstanceKey, LrpKey, LrpNetInfo};
use corral_core::task::Task;
use corral_core::BbsClient;

use super::response_error;

/// Client for the BBS HTTP API.
///
/// Paths follow the BBS's record vocabulary; every endpoint is a POST with
/// a JSON body, 404 means the record does not exist and 409 signals a lost
/// compare-and-swap.
#[derive(Clone)]
pub struct HttpBbsClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CellScope<'a> {
    cell_id: &'a CellId,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SlotScope<'a> {
    process_id: &'a ProcessId,
    index: i32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LrpRequest<'a> {
    key: &'a LrpKey,
    instance: &'a LrpInstanceKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    net_info: Option<&'a LrpNetInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ttl_seconds: Option<u64>,
}

impl<'a> LrpRequest<'a> {
    fn new(key: &'a LrpKey, instance: &'a LrpInstanceKey) -> Self {
        Self {
            key,
            instance,
            net_info: None,
            reason: None,
            ttl_seconds: None,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskScope<'a> {
    task_id: &'a TaskId,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartTaskRequest<'a> {
    task_id: &'a TaskId,
    cell_id: &'a CellId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartTaskResponse {
    should_start: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompleteTaskRequest<'a> {
    task_id: &'a TaskId,
    cell_id: &'a CellId,
    failed: bool,
    failure_reason: &'a str,
    result: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FailTaskRequest<'a> {
    task_id: &'a TaskId,
    failure_reason: &'a str,
}

impl HttpBbsClient {
    /// Creates a client against the given base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into(),
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{path}", self.base_url.trim_end_matches('/'))
    }

    async fn post<Req: Serialize + Sync, Resp: DeserializeOwned>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|err| Error::http_with_source(format!("bbs {path}"), err))?;
        if !response.status().is_success() {
            return Err(response_error(&format!("bbs {path}"), response).await);
        }
        response
            .json()
            .await
            .map_err(|err| Error::http_with_source(format!("bbs {path}: invalid body"), err))
    }

    /// POST that only cares about success, with 404 surfaced distinctly.
    async fn post_unit<Req: Serialize + Sync>(&self, path: &str, body: &Req) -> Result<()> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|err| Error::http_with_source(format!("bbs {path}"), err))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::state_conflict(format!("bbs {path}: record gone")));
        }
        if !response.status().is_success() {
            return Err(response_error(&format!("bbs {path}"), response).await);
        }
        Ok(())
    }
}

#[async_trait]
impl BbsClient for HttpBbsClient {
    async fn actual_lrp_groups_for_cell(&self, cell_id: &CellId) -> Result<Vec<ActualLrpGroup>> {
        self.post("actual_lrp_groups/list_by_cell", &CellScope { cell_id })
            .await
    }

    async fn actual_lrp_group_by_process_index(
        &self,
        process_id: &ProcessId,
        index: i32,
    ) -> Result<Option<ActualLrpGroup>> {
        let response = self
            .client
            .post(self.url("actual_lrp_groups/get_by_process_index"))
            .json(&SlotScope { process_id, index })
            .send()
            .await
            .map_err(|err| Error::http_with_source("bbs get group", err))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(response_error("bbs get group", response).await);
        }
        response
            .json()
            .await
            .map(Some)
            .map_err(|err| Error::http_with_source("bbs get group: invalid body", err))
    }

    async fn claim_actual_lrp(&self, key: &LrpKey, instance: &LrpInstanceKey) -> Result<()> {
        self.post_unit("actual_lrps/claim", &LrpRequest::new(key, instance))
            .await
    }

    async fn start_actual_lrp(
        &self,
        key: &LrpKey,
        instance: &LrpInstanceKey,
        net_info: &LrpNetInfo,
    ) -> Result<()> {
        let mut request = LrpRequest::new(key, instance);
        request.net_info = Some(net_info);
        self.post_unit("actual_lrps/start", &request).await
    }

    async fn crash_actual_lrp(
        &self,
        key: &LrpKey,
        instance: &LrpInstanceKey,
        reason: &str,
    ) -> Result<()> {
        let mut request = LrpRequest::new(key, instance);
        request.reason = Some(reason);
        self.post_unit("actual_lrps/crash", &request).await
    }

    async fn unclaim_actual_lrp(&self, key: &LrpKey, instance: &LrpInstanceKey) -> Result<()> {
        self.post_unit("actual_lrps/unclaim", &LrpRequest::new(key, instance))
            .await
    }

    async fn remove_actual_lrp(&self, key: &LrpKey, instance: &LrpInstanceKey) -> Result<()> {
        self.post_unit("actual_lrps/remove", &LrpRequest::new(key, instance))
            .await
    }

    async fn evacuate_actual_lrp(
        &self,
        key: &LrpKey,
        instance: &LrpInstanceKey,
        net_info: Option<&LrpNetInfo>,
        ttl: Duration,
    ) -> Result<()> {
        let mut request = LrpRequest::new(key, instance);
        request.net_info = net_info;
        request.ttl_seconds = Some(ttl.as_secs());
        self.post_unit("actual_lrps/evacuate", &request).await
    }

    async fn remove_evacuating_actual_lrp(
        &self,
        key: &LrpKey,
        instance: &LrpInstanceKey,
    ) -> Result<()> {
        self.post_unit("actual_lrps/remove_evacuating", &LrpRequest::new(key, instance))
            .await
    }

    async fn tasks_for_cell(&self, cell_id: &CellId) -> Result<Vec<Task>> {
        self.post("tasks/list_by_cell", &CellScope { cell_id }).await
    }

    async fn task_by_id(&self, task_id: &TaskId) -> Result<Option<Task>> {
        let response = self
            .client
            .post(self.url("tasks/get"))
            .json(&TaskScope { task_id })
            .send()
            .await
            .map_err(|err| Error::http_with_source("bbs get task", err))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(response_error("bbs get task", response).await);
        }
        response
            .json()
            .await
            .map(Some)
            .map_err(|err| Error::http_with_source("bbs get task: invalid body", err))
    }

    async fn start_task(&self, task_id: &TaskId, cell_id: &CellId) -> Result<bool> {
        let response: StartTaskResponse = self
            .post("tasks/start", &StartTaskRequest { task_id, cell_id })
            .await?;
        Ok(response.should_start)
    }

    async fn complete_task(
        &self,
        task_id: &TaskId,
        cell_id: &CellId,
        failed: bool,
        failure_reason: &str,
        result: &str,
    ) -> Result<()> {
        self.post_unit(
            "tasks/complete",
            &CompleteTaskRequest {
                task_id,
                cell_id,
                failed,
                failure_reason,
                result,
            },
        )
        .await
    }

    async fn fail_task(&self, task_id: &TaskId, failure_reason: &str) -> Result<()> {
        self.post_unit(
            "tasks/fail",
            &FailTaskRequest {
                task_id,
                failure_reason,
            },
        )
        .await
    }

    async fn cancel_task(&self, task_id: &TaskId) -> Result<()> {
        self.post_unit("tasks/cancel", &TaskScope { task_id }).await
    }
}
