//! Wire types for the inference server endpoints and the local session snapshot.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where the server placed the model weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Acceleration {
    #[serde(rename = "GPU")]
    Gpu,
    #[serde(rename = "CPU")]
    Cpu,
    #[default]
    #[serde(rename = "None", alias = "Unloaded")]
    None,
}

impl Acceleration {
    /// Lenient parse used for server replies; anything unrecognised maps to `None`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "GPU" => Acceleration::Gpu,
            "CPU" => Acceleration::Cpu,
            _ => Acceleration::None,
        }
    }
}

impl fmt::Display for Acceleration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Acceleration::Gpu => write!(f, "GPU"),
            Acceleration::Cpu => write!(f, "CPU"),
            Acceleration::None => write!(f, "None"),
        }
    }
}

/// `POST /load` request body
#[derive(Debug, Clone, Serialize)]
pub struct LoadRequest {
    pub gpu_layers: u32,
}

/// `POST /load` reply
#[derive(Debug, Clone, Deserialize)]
pub struct LoadResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub acceleration: Option<String>,
    #[serde(default)]
    pub gpu_layers: u32,
}

impl LoadResponse {
    /// The server answers 200 with `status: "failed: ..."` when both of its own
    /// load strategies fail.
    pub fn is_failure(&self) -> bool {
        self.status.trim_start().to_ascii_lowercase().starts_with("failed")
    }
}

/// `GET /health` reply
#[derive(Debug, Clone, Deserialize)]
pub struct HealthResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub model_loaded: bool,
    #[serde(default)]
    pub acceleration: Option<String>,
}

/// `GET /metrics` reply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerMetrics {
    #[serde(default)]
    pub total_requests: u64,
    #[serde(default)]
    pub total_tokens_generated: u64,
    #[serde(default)]
    pub total_time_ms: u64,
    #[serde(default)]
    pub average_tokens_per_request: f64,
    #[serde(default)]
    pub average_time_per_request_ms: f64,
}

/// Body shared by `POST /predict` and `POST /predict/stream`
#[derive(Debug, Clone, Serialize)]
pub struct PredictRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub stop: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

/// `POST /predict` reply
#[derive(Debug, Clone, Deserialize)]
pub struct Prediction {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub tokens_generated: u64,
    #[serde(default)]
    pub time_ms: u64,
}

/// Result of a health probe. Never an error: an unreachable server is reported as
/// unhealthy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub loaded: bool,
    pub acceleration: Acceleration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl HealthReport {
    pub fn degraded(detail: impl Into<String>) -> Self {
        Self {
            healthy: false,
            loaded: false,
            acceleration: Acceleration::None,
            detail: Some(detail.into()),
        }
    }
}

/// Snapshot of the model session as returned by `load()`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    pub status: String,
    pub acceleration: Acceleration,
    pub gpu_layers: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acceleration_parse() {
        assert_eq!(Acceleration::parse("GPU"), Acceleration::Gpu);
        assert_eq!(Acceleration::parse("cpu"), Acceleration::Cpu);
        assert_eq!(Acceleration::parse("None"), Acceleration::None);
        assert_eq!(Acceleration::parse("Unloaded"), Acceleration::None);
        assert_eq!(Acceleration::parse(""), Acceleration::None);
    }

    #[test]
    fn test_acceleration_display() {
        assert_eq!(Acceleration::Gpu.to_string(), "GPU");
        assert_eq!(Acceleration::Cpu.to_string(), "CPU");
        assert_eq!(Acceleration::None.to_string(), "None");
    }

    #[test]
    fn test_load_response_failure_detection() {
        let ok: LoadResponse =
            serde_json::from_str(r#"{"status":"loaded","acceleration":"GPU","gpu_layers":99}"#)
                .unwrap();
        assert!(!ok.is_failure());

        let failed: LoadResponse =
            serde_json::from_str(r#"{"status":"failed: out of memory","acceleration":"None"}"#)
                .unwrap();
        assert!(failed.is_failure());
        assert_eq!(failed.gpu_layers, 0);
    }

    #[test]
    fn test_metrics_averages_default_to_zero() {
        let metrics: ServerMetrics = serde_json::from_str(
            r#"{"total_requests":2,"total_tokens_generated":40,"total_time_ms":900}"#,
        )
        .unwrap();
        assert_eq!(metrics.total_requests, 2);
        assert_eq!(metrics.average_tokens_per_request, 0.0);
        assert_eq!(metrics.average_time_per_request_ms, 0.0);
    }

    #[test]
    fn test_predict_request_omits_stream_flag_when_false() {
        let body = PredictRequest {
            prompt: "hi".to_string(),
            max_tokens: 8,
            temperature: 0.1,
            stop: vec![],
            stream: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("stream").is_none());

        let streaming = PredictRequest { stream: true, ..body };
        let json = serde_json::to_value(&streaming).unwrap();
        assert_eq!(json["stream"], true);
    }
}
