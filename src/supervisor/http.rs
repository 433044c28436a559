use crate::reconcile::plan::WorkloadPlan;
use crate::supervisor::{
    ExecOutput, ExecRequest, FileStaging, HealthStatus, Supervisor, SupervisorError,
};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use url::Url;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for a Pebble-style supervisor REST API.
///
/// Routes, per workload:
///   GET  /v1/workloads/{name}/ping
///   GET  /v1/workloads/{name}/plan
///   POST /v1/workloads/{name}/layers   (combine)
///   POST /v1/workloads/{name}/replan
///   GET  /v1/workloads/{name}/health
///   POST /v1/workloads/{name}/exec
///   POST /v1/workloads/{name}/files
pub struct HttpSupervisor {
    base: Url,
    client: reqwest::Client,
}

impl HttpSupervisor {
    pub fn new(base_url: &str, request_timeout: Option<Duration>) -> crate::error::Result<Self> {
        let base = Url::parse(base_url)?;
        let client = reqwest::Client::builder()
            .timeout(request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT))
            .build()?;
        Ok(Self { base, client })
    }

    fn route(&self, workload: &str, tail: &str) -> Result<Url, SupervisorError> {
        self.base
            .join(&format!("v1/workloads/{workload}/{tail}"))
            .map_err(|err| SupervisorError::Protocol(format!("invalid route: {err}")))
    }

    fn unreachable(workload: &str, err: reqwest::Error) -> SupervisorError {
        SupervisorError::Unreachable {
            workload: workload.to_string(),
            reason: err.to_string(),
        }
    }

    async fn check_status(
        workload: &str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, SupervisorError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let detail = response.text().await.unwrap_or_default();
        Err(SupervisorError::Rejected {
            workload: workload.to_string(),
            status: status.as_u16(),
            detail,
        })
    }
}

#[derive(Debug, Deserialize)]
struct HealthPayload {
    status: String,
}

#[derive(Debug, Deserialize)]
struct ExecPayload {
    exit_code: i32,
    #[serde(default)]
    stdout: String,
}

#[async_trait]
impl Supervisor for HttpSupervisor {
    async fn can_connect(&self, workload: &str) -> bool {
        let Ok(url) = self.route(workload, "ping") else {
            return false;
        };
        match self.client.get(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn submit_plan(
        &self,
        workload: &str,
        plan: &WorkloadPlan,
    ) -> Result<(), SupervisorError> {
        let layers = self.route(workload, "layers")?;
        let body = json!({
            "combine": true,
            "plan": plan,
        });
        let response = self
            .client
            .post(layers)
            .json(&body)
            .send()
            .await
            .map_err(|err| Self::unreachable(workload, err))?;
        Self::check_status(workload, response).await?;

        let replan = self.route(workload, "replan")?;
        let response = self
            .client
            .post(replan)
            .send()
            .await
            .map_err(|err| Self::unreachable(workload, err))?;
        Self::check_status(workload, response).await?;
        Ok(())
    }

    async fn actual_plan(&self, workload: &str) -> Result<Option<WorkloadPlan>, SupervisorError> {
        let url = self.route(workload, "plan")?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| Self::unreachable(workload, err))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = Self::check_status(workload, response).await?;
        let plan = response
            .json::<WorkloadPlan>()
            .await
            .map_err(|err| SupervisorError::Protocol(format!("malformed plan payload: {err}")))?;
        Ok(Some(plan))
    }

    async fn health(&self, workload: &str) -> Result<HealthStatus, SupervisorError> {
        let url = self.route(workload, "health")?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| Self::unreachable(workload, err))?;
        let response = Self::check_status(workload, response).await?;
        let payload = response
            .json::<HealthPayload>()
            .await
            .map_err(|err| SupervisorError::Protocol(format!("malformed health payload: {err}")))?;

        match payload.status.as_str() {
            "UP" => Ok(HealthStatus::Up),
            "DOWN" => Ok(HealthStatus::Down),
            other => Err(SupervisorError::Protocol(format!(
                "unknown health status `{other}`"
            ))),
        }
    }

    async fn exec(
        &self,
        workload: &str,
        request: ExecRequest,
    ) -> Result<ExecOutput, SupervisorError> {
        let url = self.route(workload, "exec")?;
        let body = json!({
            "command": request.command,
            "environment": request.environment,
            "working_dir": request.working_dir,
            "timeout_secs": request.timeout.map(|timeout| timeout.as_secs()),
        });

        let send = self.client.post(url).json(&body).send();
        let response = match request.timeout {
            // The supervisor enforces the timeout server-side as well; the
            // client-side bound covers a supervisor that stops responding.
            Some(timeout) => tokio::time::timeout(timeout + Duration::from_secs(5), send)
                .await
                .map_err(|_| SupervisorError::Timeout {
                    workload: workload.to_string(),
                    timeout,
                })?,
            None => send.await,
        }
        .map_err(|err| Self::unreachable(workload, err))?;

        let response = Self::check_status(workload, response).await?;
        let payload = response
            .json::<ExecPayload>()
            .await
            .map_err(|err| SupervisorError::Protocol(format!("malformed exec payload: {err}")))?;

        Ok(ExecOutput {
            exit_code: payload.exit_code,
            stdout: payload.stdout,
        })
    }
}

#[async_trait]
impl FileStaging for HttpSupervisor {
    async fn stage(
        &self,
        workload: &str,
        contents: &str,
        dest_path: &str,
        permissions: u32,
    ) -> Result<(), SupervisorError> {
        let url = self.route(workload, "files")?;
        let body = json!({
            "path": dest_path,
            "permissions": format!("{permissions:o}"),
            "make_dirs": true,
            "contents": contents,
        });
        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|err| Self::unreachable(workload, err))?;
        Self::check_status(workload, response).await?;
        Ok(())
    }
}
