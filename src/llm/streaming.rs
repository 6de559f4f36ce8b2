//! Streaming generation with retry, backoff and cooperative cancellation.
//!
//! The server answers `POST /predict/stream` with newline-delimited frames. Payload lines
//! start with `data:` and carry a JSON object holding a text fragment (`text` or `content`)
//! and optionally a completion flag (`done: true`) or a type discriminator (`type: "chunk"`
//! / `type: "done"`). Blank lines, comments and other SSE fields are keep-alives. A payload
//! that is not JSON is passed through verbatim as one fragment.

use crate::error::{Result, StepwiseError};
use crate::llm::gateway::{CompletionConfig, InferenceGateway, StreamEvent, TokenStream};
use crate::llm::gateways::InferenceServerClient;
use crate::llm::models::PredictRequest;
use crate::llm::session::ModelSessionManager;
use async_trait::async_trait;
use futures::stream::StreamExt;
use reqwest::Response;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const DATA_PREFIX: &str = "data:";

/// Exponential backoff for re-issuing failed requests
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt + 1`: base, 2x base, 4x base, ...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }
}

/// One decoded line of the stream body
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    KeepAlive,
    Data { text: String, done: bool },
    Error(String),
}

/// Decode a single line of the stream body.
pub fn decode_frame(line: &str) -> Frame {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return Frame::KeepAlive;
    };
    let payload = payload.strip_prefix(' ').unwrap_or(payload);

    if payload.trim().is_empty() {
        return Frame::KeepAlive;
    }
    if payload.trim() == "[DONE]" {
        return Frame::Data {
            text: String::new(),
            done: true,
        };
    }

    let object = match serde_json::from_str::<Value>(payload) {
        Ok(Value::Object(object)) => object,
        Ok(Value::String(text)) => return Frame::Data { text, done: false },
        _ => {
            return Frame::Data {
                text: payload.to_string(),
                done: false,
            }
        }
    };

    if let Some(message) = object.get("error") {
        let message = match message {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return Frame::Error(message);
    }

    let text = object
        .get("text")
        .or_else(|| object.get("content"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let done = object.get("done").and_then(|v| v.as_bool()).unwrap_or(false)
        || object.get("type").and_then(|v| v.as_str()) == Some("done");

    Frame::Data { text, done }
}

/// Outcome of a `cancel_all` call
#[derive(Debug, Clone, Serialize)]
pub struct CancelReport {
    pub active_streams: usize,
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_reply: Option<Value>,
}

/// Cancellation observed by one request: the caller's run token plus the client-wide
/// token that `cancel_all` trips.
struct CancelScope {
    run: CancellationToken,
    client: CancellationToken,
}

impl CancelScope {
    fn is_cancelled(&self) -> bool {
        self.run.is_cancelled() || self.client.is_cancelled()
    }

    async fn cancelled(&self) {
        tokio::select! {
            _ = self.run.cancelled() => {}
            _ = self.client.cancelled() => {}
        }
    }
}

struct ActiveStreamGuard(Arc<AtomicUsize>);

impl ActiveStreamGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for ActiveStreamGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

enum Read {
    Bytes(Vec<u8>),
    Closed,
    Failed(StepwiseError),
    Cancelled,
}

/// Issues streaming generation requests against the inference server.
///
/// A failed attempt is never resumed: the whole request is re-issued and the consumer is
/// told to discard what it received through [`StreamEvent::Restart`].
pub struct StreamingInferenceClient {
    server: Arc<InferenceServerClient>,
    session: Arc<ModelSessionManager>,
    retry: RetryPolicy,
    auto_load: bool,
    active: Arc<AtomicUsize>,
    client_scope: RwLock<CancellationToken>,
}

impl StreamingInferenceClient {
    pub fn new(session: Arc<ModelSessionManager>) -> Self {
        Self {
            server: session.server().clone(),
            session,
            retry: RetryPolicy::default(),
            auto_load: true,
            active: Arc::new(AtomicUsize::new(0)),
            client_scope: RwLock::new(CancellationToken::new()),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Load the model before the first request when the local session says it is not
    /// loaded (default: on).
    pub fn with_auto_load(mut self, auto_load: bool) -> Self {
        self.auto_load = auto_load;
        self
    }

    pub fn session(&self) -> &Arc<ModelSessionManager> {
        &self.session
    }

    pub fn active_stream_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn scope(&self, run: &CancellationToken) -> CancelScope {
        let client = self.client_scope.read().unwrap_or_else(|p| p.into_inner()).clone();
        CancelScope {
            run: run.clone(),
            client,
        }
    }

    fn request(&self, prompt: &str, config: &CompletionConfig, stream: bool) -> PredictRequest {
        PredictRequest {
            prompt: prompt.to_string(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            stop: config.stop.clone(),
            stream,
        }
    }

    async fn prepare(&self) {
        if self.auto_load && !self.session.is_loaded() && !self.session.ensure_loaded().await {
            warn!("Model could not be loaded ahead of the request, trying anyway");
        }
    }

    /// Open the stream, failing with a retryable timeout when the headers do not arrive
    /// within the idle limit.
    async fn open(&self, request: &PredictRequest) -> Result<(Response, OwnedSemaphorePermit)> {
        let idle = self.server.stream_idle_timeout();
        tokio::time::timeout(idle, self.server.open_stream(request))
            .await
            .map_err(|_| StepwiseError::Timeout(format!("no response headers within {:?}", idle)))?
    }

    /// Wait out the backoff for `attempt`, then repair the session.
    async fn backoff(&self, attempt: u32, scope: &CancelScope) -> Result<()> {
        let delay = self.retry.delay_for(attempt);
        tokio::select! {
            biased;
            _ = scope.cancelled() => return Err(StepwiseError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }

        if !self.session.ensure_loaded().await {
            warn!(attempt = attempt + 1, "Session repair failed before retry");
        }
        Ok(())
    }

    fn exhausted(&self, attempt: u32, cause: &StepwiseError) -> StepwiseError {
        error!(attempts = attempt + 1, error = %cause, "Inference retries exhausted");
        StepwiseError::InferenceUnavailable {
            attempts: attempt + 1,
            cause: cause.to_string(),
        }
    }

    /// Best-effort notice to the server that the in-flight generation should stop.
    async fn notify_cancel(&self) {
        match self.server.cancel().await {
            Ok(_) => debug!("Cancel notification delivered"),
            Err(e) => error!(error = %e, "Failed to notify server of cancellation"),
        }
    }

    /// Abort every stream of this client and tell the server to stop generating.
    pub async fn cancel_all(&self) -> CancelReport {
        let active_streams = self.active_stream_count();
        {
            let mut scope = self.client_scope.write().unwrap_or_else(|p| p.into_inner());
            scope.cancel();
            *scope = CancellationToken::new();
        }

        let (delivered, server_reply) = match self.server.cancel().await {
            Ok(reply) => (true, Some(reply)),
            Err(e) => {
                error!(error = %e, "Failed to send cancel signal");
                (false, None)
            }
        };

        info!(active_streams, delivered, "Cancelled all streams");
        CancelReport {
            active_streams,
            delivered,
            server_reply,
        }
    }
}

#[async_trait]
impl InferenceGateway for StreamingInferenceClient {
    async fn complete(
        &self,
        prompt: &str,
        config: &CompletionConfig,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let scope = self.scope(cancel);
        let request = self.request(prompt, config, false);
        self.prepare().await;

        let mut attempt = 0;
        loop {
            if scope.is_cancelled() {
                return Err(StepwiseError::Cancelled);
            }

            let result = tokio::select! {
                biased;
                _ = scope.cancelled() => {
                    self.notify_cancel().await;
                    return Err(StepwiseError::Cancelled);
                }
                result = self.server.predict(&request) => result,
            };

            match result {
                Ok(prediction) => {
                    debug!(
                        tokens = prediction.tokens_generated,
                        time_ms = prediction.time_ms,
                        "Prediction complete"
                    );
                    return Ok(prediction.text);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= self.retry.max_retries => return Err(self.exhausted(attempt, &e)),
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "Prediction failed, retrying");
                    self.backoff(attempt, &scope).await?;
                    attempt += 1;
                }
            }
        }
    }

    fn stream<'a>(
        &'a self,
        prompt: &'a str,
        config: &'a CompletionConfig,
        cancel: &'a CancellationToken,
    ) -> TokenStream<'a> {
        Box::pin(async_stream::stream! {
            let scope = self.scope(cancel);
            let request = self.request(prompt, config, true);
            let _active = ActiveStreamGuard::enter(&self.active);
            let idle = self.server.stream_idle_timeout();

            let prepared = tokio::select! {
                biased;
                _ = scope.cancelled() => false,
                _ = self.prepare() => true,
            };
            if !prepared {
                yield Err(StepwiseError::Cancelled);
                return;
            }

            let mut attempt: u32 = 0;
            loop {
                if scope.is_cancelled() {
                    yield Err(StepwiseError::Cancelled);
                    return;
                }
                if attempt > 0 {
                    yield Ok(StreamEvent::Restart { attempt });
                }

                info!(attempt = attempt + 1, "Starting streaming request");

                let opened = tokio::select! {
                    biased;
                    _ = scope.cancelled() => None,
                    result = self.open(&request) => Some(result),
                };

                let failure = match opened {
                    None => {
                        warn!("Stream cancelled while waiting for response headers");
                        self.notify_cancel().await;
                        yield Err(StepwiseError::Cancelled);
                        return;
                    }
                    Some(Err(e)) => e,
                    Some(Ok((response, _permit))) => {
                        let mut body = response.bytes_stream();
                        let mut pending: Vec<u8> = Vec::new();
                        let mut completed = false;
                        let mut cancelled = false;
                        let mut failed: Option<StepwiseError> = None;

                        'read: loop {
                            let read = tokio::select! {
                                biased;
                                _ = scope.cancelled() => Read::Cancelled,
                                next = tokio::time::timeout(idle, body.next()) => match next {
                                    Ok(Some(Ok(bytes))) => Read::Bytes(bytes.to_vec()),
                                    Ok(Some(Err(e))) => Read::Failed(e.into()),
                                    Ok(None) => Read::Closed,
                                    Err(_) => Read::Failed(StepwiseError::Timeout(format!(
                                        "no stream data within {:?}",
                                        idle
                                    ))),
                                },
                            };

                            match read {
                                Read::Cancelled => {
                                    cancelled = true;
                                    break 'read;
                                }
                                Read::Failed(e) => {
                                    failed = Some(e);
                                    break 'read;
                                }
                                Read::Closed => {
                                    completed = true;
                                    if pending.is_empty() {
                                        break 'read;
                                    }
                                    // A final line may arrive without its newline.
                                    pending.push(b'\n');
                                }
                                Read::Bytes(bytes) => pending.extend_from_slice(&bytes),
                            }

                            while let Some(newline) = pending.iter().position(|b| *b == b'\n') {
                                if scope.is_cancelled() {
                                    cancelled = true;
                                    break 'read;
                                }

                                let line: Vec<u8> = pending.drain(..=newline).collect();
                                match decode_frame(&String::from_utf8_lossy(&line)) {
                                    Frame::KeepAlive => {}
                                    Frame::Data { text, done } => {
                                        if !text.is_empty() {
                                            yield Ok(StreamEvent::Token(text));
                                        }
                                        if done {
                                            debug!("Stream completed by server marker");
                                            completed = true;
                                            break 'read;
                                        }
                                    }
                                    Frame::Error(message) => {
                                        failed = Some(StepwiseError::ServerError(message));
                                        break 'read;
                                    }
                                }
                            }

                            if completed {
                                break 'read;
                            }
                        }

                        if cancelled {
                            warn!("Stream cancelled, aborting read loop");
                            self.notify_cancel().await;
                            yield Err(StepwiseError::Cancelled);
                            return;
                        }

                        match failed {
                            Some(e) => e,
                            None => {
                                debug!(completed, "Stream finished");
                                return;
                            }
                        }
                    }
                };

                if !failure.is_retryable() {
                    error!(error = %failure, "Streaming request failed");
                    yield Err(failure);
                    return;
                }
                if attempt >= self.retry.max_retries {
                    yield Err(self.exhausted(attempt, &failure));
                    return;
                }

                warn!(
                    attempt = attempt + 1,
                    delay_ms = self.retry.delay_for(attempt).as_millis() as u64,
                    error = %failure,
                    "Streaming request failed, retrying"
                );
                if let Err(e) = self.backoff(attempt, &scope).await {
                    yield Err(e);
                    return;
                }
                attempt += 1;
            }
        })
    }
}
