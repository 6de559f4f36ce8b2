use crate::error::Result;
use async_trait::async_trait;
use futures::stream::Stream;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// Generation parameters for a single request
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub max_tokens: u32,
    pub temperature: f32,
    pub stop: Vec<String>,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.1,
            stop: vec!["</s>".to_string(), "[INST]".to_string(), "Observation:".to_string()],
        }
    }
}

/// One item of a token stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A text increment from the model.
    Token(String),
    /// The previous attempt failed and the whole request is being re-issued.
    /// Everything received since the last `Restart` (or the start) must be discarded.
    Restart { attempt: u32 },
}

pub type TokenStream<'a> = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send + 'a>>;

/// Abstract interface to the remote text-generation capability
#[async_trait]
pub trait InferenceGateway: Send + Sync {
    /// Generate a complete response in one request.
    async fn complete(
        &self,
        prompt: &str,
        config: &CompletionConfig,
        cancel: &CancellationToken,
    ) -> Result<String>;

    /// Stream a response as it is generated.
    ///
    /// The stream is finite and ends after the server's completion marker or when the
    /// connection closes. Cancellation ends it with `Err(StepwiseError::Cancelled)`.
    fn stream<'a>(
        &'a self,
        prompt: &'a str,
        config: &'a CompletionConfig,
        cancel: &'a CancellationToken,
    ) -> TokenStream<'a>;
}
