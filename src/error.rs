//! Error types and result aliases for the Stepwise engine.
//!
//! This module defines the core error type [`StepwiseError`] and the [`Result`] type alias
//! used throughout the library. Only two categories ever end a run outright: an exhausted
//! [`StepwiseError::InferenceUnavailable`] and [`StepwiseError::Cancelled`]. Everything else
//! is folded into the step log as an observation by the orchestrator.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StepwiseError {
    #[error("Inference gateway error: {0}")]
    GatewayError(String),

    #[error("HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("Server reported an error: {0}")]
    ServerError(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Tool error: {0}")]
    ToolError(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Model load failed: {0}")]
    LoadFailed(String),

    #[error("Inference unavailable after {attempts} attempt(s): {cause}")]
    InferenceUnavailable { attempts: u32, cause: String },

    #[error("Could not parse your response: {0}")]
    ParseError(String),

    #[error("Unknown tool '{name}'. Valid tools: [{valid}]")]
    UnknownAction { name: String, valid: String },

    #[error("Operation cancelled")]
    Cancelled,
}

impl StepwiseError {
    /// Whether a failed request may succeed if re-issued.
    ///
    /// Connection failures, timeouts, broken bodies and 5xx replies qualify. Client errors
    /// and everything produced locally do not.
    pub fn is_retryable(&self) -> bool {
        match self {
            StepwiseError::HttpError(e) => {
                if let Some(status) = e.status() {
                    return status.is_server_error();
                }
                e.is_connect() || e.is_timeout() || e.is_body() || e.is_request() || e.is_decode()
            }
            StepwiseError::HttpStatus { status, .. } => *status >= 500,
            StepwiseError::ServerError(_) | StepwiseError::Timeout(_) => true,
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StepwiseError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, StepwiseError>;
