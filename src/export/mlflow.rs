#![forbid(unsafe_code)]

// MLflow tracking server client (REST API 2.0)

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use super::types::{ExportError, ExportResult, MetricPoint, Param, RunStatus, Tag};
use crate::handoff::epoch_millis_now;

/// Write access to a telemetry backend that groups metrics into runs.
#[async_trait]
pub trait TelemetryBackend: Send + Sync {
    /// Creates a run under `experiment` (creating the experiment if needed)
    /// and returns its id.
    async fn start_run(&self, experiment: &str, run_name: &str) -> ExportResult<String>;

    async fn log_batch(
        &self,
        run_id: &str,
        metrics: &[MetricPoint],
        params: &[Param],
        tags: &[Tag],
    ) -> ExportResult<()>;

    async fn finish_run(&self, run_id: &str, status: RunStatus) -> ExportResult<()>;
}

#[derive(Debug, Deserialize)]
struct ExperimentEnvelope {
    experiment: Experiment,
}

#[derive(Debug, Deserialize)]
struct Experiment {
    experiment_id: String,
}

#[derive(Debug, Deserialize)]
struct RunEnvelope {
    run: Run,
}

#[derive(Debug, Deserialize)]
struct Run {
    info: RunInfo,
}

#[derive(Debug, Deserialize)]
struct RunInfo {
    run_id: String,
}

#[derive(Debug, Serialize)]
struct LogBatch<'a> {
    run_id: &'a str,
    metrics: &'a [MetricPoint],
    params: &'a [Param],
    tags: &'a [Tag],
}

pub struct MlflowClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl MlflowClient {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    pub fn new(tracking_uri: &str, timeout: Duration) -> ExportResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: format!("{}/api/2.0/mlflow", tracking_uri.trim_end_matches('/')),
            token: None,
        })
    }

    /// Sends `Authorization: Bearer <token>` with every request.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn decode<T: DeserializeOwned>(url: &str, response: reqwest::Response) -> ExportResult<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExportError::Status {
                status: status.as_u16(),
                url: url.to_string(),
                body,
            });
        }
        Ok(response.json().await?)
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: &impl Serialize) -> ExportResult<T> {
        let url = format!("{}/{}", self.base_url, path);
        debug!("POST {}", url);
        let response = self.authorize(self.client.post(&url).json(body)).send().await?;
        Self::decode(&url, response).await
    }

    async fn experiment_id(&self, name: &str) -> ExportResult<String> {
        let url = format!("{}/experiments/get-by-name", self.base_url);
        let response = self
            .authorize(self.client.get(&url).query(&[("experiment_name", name)]))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            info!("Creating MLflow experiment {}", name);
            let created: Experiment = self.post("experiments/create", &json!({ "name": name })).await?;
            return Ok(created.experiment_id);
        }
        let found: ExperimentEnvelope = Self::decode(&url, response).await?;
        Ok(found.experiment.experiment_id)
    }
}

#[async_trait]
impl TelemetryBackend for MlflowClient {
    async fn start_run(&self, experiment: &str, run_name: &str) -> ExportResult<String> {
        let experiment_id = self.experiment_id(experiment).await?;
        let body = json!({
            "experiment_id": experiment_id,
            "run_name": run_name,
            "start_time": epoch_millis_now(),
        });
        let created: RunEnvelope = self.post("runs/create", &body).await?;
        Ok(created.run.info.run_id)
    }

    async fn log_batch(
        &self,
        run_id: &str,
        metrics: &[MetricPoint],
        params: &[Param],
        tags: &[Tag],
    ) -> ExportResult<()> {
        let body = LogBatch {
            run_id,
            metrics,
            params,
            tags,
        };
        let _: serde_json::Value = self.post("runs/log-batch", &body).await?;
        Ok(())
    }

    async fn finish_run(&self, run_id: &str, status: RunStatus) -> ExportResult<()> {
        let body = json!({
            "run_id": run_id,
            "status": status,
            "end_time": epoch_millis_now(),
        });
        let _: serde_json::Value = self.post("runs/update", &body).await?;
        Ok(())
    }
}
