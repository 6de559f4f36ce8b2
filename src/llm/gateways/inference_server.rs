use crate::error::{Result, StepwiseError};
use crate::llm::models::{
    HealthResponse, LoadRequest, LoadResponse, PredictRequest, Prediction, ServerMetrics,
};
use reqwest::{Client, Response};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

/// Configuration for connecting to the inference server
#[derive(Debug, Clone)]
pub struct InferenceServerConfig {
    pub host: String,
    /// Applies to every non-streaming request.
    pub request_timeout: Duration,
    /// Longest a stream may go without response headers or body bytes before the attempt
    /// fails with a retryable timeout.
    pub stream_idle_timeout: Duration,
    pub connect_timeout: Duration,
    /// Upper bound on concurrent requests across every run sharing this client.
    pub max_connections: usize,
    pub max_idle_per_host: usize,
    pub cancel_timeout: Duration,
}

impl Default for InferenceServerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("INFERENCE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8080".to_string()),
            request_timeout: Duration::from_secs(60),
            stream_idle_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_connections: 20,
            max_idle_per_host: 10,
            cancel_timeout: Duration::from_secs(2),
        }
    }
}

/// HTTP transport to the inference server
///
/// One instance is shared by the session manager and every streaming client. The reqwest
/// pool keeps at most `max_idle_per_host` idle sockets and a semaphore caps the number of
/// requests in flight at `max_connections`.
pub struct InferenceServerClient {
    client: Client,
    config: InferenceServerConfig,
    permits: Arc<Semaphore>,
}

impl InferenceServerClient {
    /// Create a client with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(InferenceServerConfig::default())
    }

    /// Create a client with custom configuration
    pub fn with_config(config: InferenceServerConfig) -> Result<Self> {
        if config.max_connections == 0 {
            return Err(StepwiseError::ConfigError(
                "max_connections must be at least 1".to_string(),
            ));
        }

        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.max_idle_per_host)
            .build()?;

        let permits = Arc::new(Semaphore::new(config.max_connections));

        Ok(Self {
            client,
            config,
            permits,
        })
    }

    /// Create a client for a custom host
    pub fn with_host(host: impl Into<String>) -> Result<Self> {
        Self::with_config(InferenceServerConfig {
            host: host.into(),
            ..Default::default()
        })
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        self.config.stream_idle_timeout
    }

    /// Requests that may start right now without waiting for a free slot.
    pub fn available_connections(&self) -> usize {
        self.permits.available_permits()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.host.trim_end_matches('/'), path)
    }

    async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        self.permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StepwiseError::GatewayError("connection pool closed".to_string()))
    }

    /// `POST /load`
    pub async fn load(&self, gpu_layers: u32) -> Result<LoadResponse> {
        info!(gpu_layers, "Requesting model load");
        let _permit = self.acquire().await?;

        let response = self
            .client
            .post(self.url("/load"))
            .timeout(self.config.request_timeout)
            .json(&LoadRequest { gpu_layers })
            .send()
            .await?;

        Ok(check_status(response).await?.json().await?)
    }

    /// `POST /unload`
    pub async fn unload(&self) -> Result<Value> {
        info!("Requesting model unload");
        let _permit = self.acquire().await?;

        let response = self
            .client
            .post(self.url("/unload"))
            .timeout(self.config.request_timeout)
            .send()
            .await?;

        Ok(check_status(response).await?.json().await?)
    }

    /// `GET /health`
    pub async fn health(&self) -> Result<HealthResponse> {
        debug!("Probing server health");
        let _permit = self.acquire().await?;

        let response = self
            .client
            .get(self.url("/health"))
            .timeout(self.config.request_timeout)
            .send()
            .await?;

        Ok(check_status(response).await?.json().await?)
    }

    /// `GET /metrics`
    pub async fn metrics(&self) -> Result<ServerMetrics> {
        let _permit = self.acquire().await?;

        let response = self
            .client
            .get(self.url("/metrics"))
            .timeout(self.config.request_timeout)
            .send()
            .await?;

        Ok(check_status(response).await?.json().await?)
    }

    /// `POST /predict`
    pub async fn predict(&self, request: &PredictRequest) -> Result<Prediction> {
        debug!(prompt_len = request.prompt.len(), "Sending prediction request");
        let _permit = self.acquire().await?;

        let response = self
            .client
            .post(self.url("/predict"))
            .timeout(self.config.request_timeout)
            .json(request)
            .send()
            .await?;

        Ok(check_status(response).await?.json().await?)
    }

    /// `POST /predict/stream`
    ///
    /// Returns the response once headers arrive, together with the pool slot it occupies.
    /// The slot is released when the permit is dropped.
    pub async fn open_stream(
        &self,
        request: &PredictRequest,
    ) -> Result<(Response, OwnedSemaphorePermit)> {
        debug!(prompt_len = request.prompt.len(), "Opening prediction stream");
        let permit = self.acquire().await?;

        let response = self
            .client
            .post(self.url("/predict/stream"))
            .json(request)
            .send()
            .await?;

        Ok((check_status(response).await?, permit))
    }

    /// `POST /cancel`
    ///
    /// Bypasses the connection cap: a cancel must be deliverable even when every slot is
    /// held by the streams it is meant to stop.
    pub async fn cancel(&self) -> Result<Value> {
        let response = self
            .client
            .post(self.url("/cancel"))
            .timeout(self.config.cancel_timeout)
            .send()
            .await?;

        let response = check_status(response).await?;
        Ok(response.json().await.unwrap_or(Value::Null))
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    Err(StepwiseError::HttpStatus {
        status: status.as_u16(),
        message: if message.is_empty() {
            status.canonical_reason().unwrap_or("request failed").to_string()
        } else {
            message
        },
    })
}
