//! Service client for the remote emulator.
//!
//! One method per server capability. Transport failures and non-success HTTP
//! statuses are normalized into [`ClientError`]; nothing is retried here.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, Client, Method};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tracing::Instrument;

use crate::config::{
    errors::{ERR_DECODE, ERR_SERVICE, ERR_TRANSPORT},
    timeouts::DEFAULT_HTTP_TIMEOUT_MS,
    ApiEndpoint,
};
use crate::model::{
    CompileRequest, CompileResponse, EmulatorSnapshot, ExecuteRequest, ExecuteResponse,
    LoadTaskRequest, LoadTaskResponse, ResetResponse, StepResponse, TaskId, TaskInfo, TaskProgram,
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// The service could not be reached at all.
    #[error("{code}: cannot connect to the emulator service at {base_url}; make sure the backend is running ({detail})", code = ERR_TRANSPORT)]
    Transport { base_url: String, detail: String },
    /// The service answered with a non-success HTTP status.
    #[error("{code}: HTTP error {status}: {message}", code = ERR_SERVICE)]
    Service { status: u16, message: String },
    /// The service answered 2xx but the body did not match the expected shape.
    #[error("{code}: malformed {operation} response: {detail}", code = ERR_DECODE)]
    Decode {
        operation: &'static str,
        detail: String,
    },
}

impl ClientError {
    pub fn code(&self) -> &'static str {
        match self {
            ClientError::Transport { .. } => ERR_TRANSPORT,
            ClientError::Service { .. } => ERR_SERVICE,
            ClientError::Decode { .. } => ERR_DECODE,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, ClientError::Transport { .. })
    }
}

/// Typed view of the remote emulator's capabilities.
#[async_trait]
pub trait EmulatorService: Send + Sync {
    async fn get_state(&self) -> Result<EmulatorSnapshot, ClientError>;

    async fn compile(&self, req: &CompileRequest) -> Result<CompileResponse, ClientError>;

    async fn load_task(&self, req: &LoadTaskRequest) -> Result<LoadTaskResponse, ClientError>;

    async fn execute(&self, req: &ExecuteRequest) -> Result<ExecuteResponse, ClientError>;

    async fn step(&self) -> Result<StepResponse, ClientError>;

    async fn reset(&self) -> Result<ResetResponse, ClientError>;

    async fn list_tasks(&self) -> Result<Vec<TaskInfo>, ClientError>;

    async fn get_task(&self, task_id: TaskId) -> Result<TaskInfo, ClientError>;

    async fn get_task_program(&self, task_id: TaskId) -> Result<TaskProgram, ClientError>;
}

/// HTTP implementation against the emulator's REST API.
#[derive(Debug, Clone)]
pub struct HttpEmulatorService {
    http: Client,
    base_url: String,
}

impl HttpEmulatorService {
    /// Build a client for `endpoint` with the request timeout taken from
    /// `EMUCTL_HTTP_TIMEOUT_MS` (default 30 s).
    pub fn new(endpoint: &ApiEndpoint) -> Result<Self, ClientError> {
        let timeout_ms =
            crate::config::env_parse("EMUCTL_HTTP_TIMEOUT_MS", DEFAULT_HTTP_TIMEOUT_MS);
        let http = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| ClientError::Transport {
                base_url: endpoint.base_url.clone(),
                detail: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self::with_client(http, endpoint.base_url.clone()))
    }

    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn request<B, T>(
        &self,
        operation: &'static str,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        let span = tracing::info_span!("service_request", op = operation, path = %path);
        async move {
            let t0 = Instant::now();
            let mut builder = self
                .http
                .request(method, &url)
                .header(CONTENT_TYPE, "application/json");
            if let Some(b) = body {
                builder = builder.json(b);
            }

            let resp = builder.send().await.map_err(|e| {
                tracing::warn!(target = "emuctl", error = %e, "service unreachable");
                ClientError::Transport {
                    base_url: self.base_url.clone(),
                    detail: e.to_string(),
                }
            })?;

            let status = resp.status();
            let bytes = resp.bytes().await.map_err(|e| ClientError::Transport {
                base_url: self.base_url.clone(),
                detail: e.to_string(),
            })?;
            let ms = t0.elapsed().as_millis() as u64;

            if !status.is_success() {
                let message = String::from_utf8_lossy(&bytes).into_owned();
                tracing::warn!(
                    target = "emuctl",
                    status = status.as_u16(),
                    duration_ms = ms,
                    body = %message,
                    "service returned error status"
                );
                return Err(ClientError::Service {
                    status: status.as_u16(),
                    message,
                });
            }

            tracing::debug!(target = "emuctl", duration_ms = ms, bytes = bytes.len(), "request ok");
            serde_json::from_slice::<T>(&bytes).map_err(|e| ClientError::Decode {
                operation,
                detail: e.to_string(),
            })
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl EmulatorService for HttpEmulatorService {
    async fn get_state(&self) -> Result<EmulatorSnapshot, ClientError> {
        self.request::<(), _>("get-state", Method::GET, "/api/state", None)
            .await
    }

    async fn compile(&self, req: &CompileRequest) -> Result<CompileResponse, ClientError> {
        self.request("compile", Method::POST, "/api/compile", Some(req))
            .await
    }

    async fn load_task(&self, req: &LoadTaskRequest) -> Result<LoadTaskResponse, ClientError> {
        self.request("load-task", Method::POST, "/api/load-task", Some(req))
            .await
    }

    async fn execute(&self, req: &ExecuteRequest) -> Result<ExecuteResponse, ClientError> {
        self.request("execute", Method::POST, "/api/execute", Some(req))
            .await
    }

    async fn step(&self) -> Result<StepResponse, ClientError> {
        self.request::<(), _>("step", Method::POST, "/api/step", None)
            .await
    }

    async fn reset(&self) -> Result<ResetResponse, ClientError> {
        self.request(
            "reset",
            Method::POST,
            "/api/reset",
            Some(&serde_json::json!({})),
        )
        .await
    }

    async fn list_tasks(&self) -> Result<Vec<TaskInfo>, ClientError> {
        self.request::<(), _>("list-tasks", Method::GET, "/api/tasks", None)
            .await
    }

    async fn get_task(&self, task_id: TaskId) -> Result<TaskInfo, ClientError> {
        let path = format!("/api/tasks/{task_id}");
        self.request::<(), _>("get-task", Method::GET, &path, None)
            .await
    }

    async fn get_task_program(&self, task_id: TaskId) -> Result<TaskProgram, ClientError> {
        let path = format!("/api/tasks/{task_id}/program");
        self.request::<(), _>("get-task-program", Method::GET, &path, None)
            .await
    }
}
