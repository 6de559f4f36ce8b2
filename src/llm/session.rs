//! Model session lifecycle on the inference server.
//!
//! The session moves between two states, UNLOADED and LOADED. Transitions (`load`,
//! `unload`, and the reset that follows a detected server restart) are serialized by a
//! single async lock. Reads of the local snapshot never wait on that lock and may be
//! slightly stale; `ensure_loaded` always re-validates against the server.

use crate::error::{Result, StepwiseError};
use crate::llm::gateways::InferenceServerClient;
use crate::llm::models::{Acceleration, HealthReport, ServerMetrics, SessionInfo};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Local view of the remote model session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModelSession {
    pub loaded: bool,
    pub acceleration: Acceleration,
    pub gpu_layers: u32,
}

/// Owns load/unload/health state of the remote generation capability.
pub struct ModelSessionManager {
    server: Arc<InferenceServerClient>,
    state: RwLock<ModelSession>,
    transition: Mutex<()>,
    configured_gpu_layers: AtomicU32,
}

impl ModelSessionManager {
    pub fn new(server: Arc<InferenceServerClient>, default_gpu_layers: u32) -> Self {
        Self {
            server,
            state: RwLock::new(ModelSession::default()),
            transition: Mutex::new(()),
            configured_gpu_layers: AtomicU32::new(default_gpu_layers),
        }
    }

    pub fn server(&self) -> &Arc<InferenceServerClient> {
        &self.server
    }

    /// Current local snapshot, without touching the network.
    pub fn snapshot(&self) -> ModelSession {
        *self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_loaded(&self) -> bool {
        self.snapshot().loaded
    }

    /// GPU layer count used by `ensure_loaded` for recovery loads.
    pub fn configured_gpu_layers(&self) -> u32 {
        self.configured_gpu_layers.load(Ordering::SeqCst)
    }

    fn set_state(&self, session: ModelSession) {
        *self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = session;
    }

    /// Probe the server. Never fails: transport problems produce a degraded report.
    pub async fn health(&self) -> HealthReport {
        match self.server.health().await {
            Ok(reply) => HealthReport {
                healthy: reply.status.eq_ignore_ascii_case("healthy"),
                loaded: reply.model_loaded,
                acceleration: reply
                    .acceleration
                    .as_deref()
                    .map(Acceleration::parse)
                    .unwrap_or_default(),
                detail: None,
            },
            Err(e) => {
                warn!(error = %e, "Health check failed");
                HealthReport::degraded(e.to_string())
            }
        }
    }

    /// Load the model, falling back from GPU to CPU once.
    ///
    /// Holds the transition lock for the whole call. When the session is already loaded
    /// this returns the current state with status `already_loaded` and makes no request.
    pub async fn load(&self, gpu_layers: u32) -> Result<SessionInfo> {
        let _transition = self.transition.lock().await;

        let current = self.snapshot();
        if current.loaded {
            return Ok(SessionInfo {
                status: "already_loaded".to_string(),
                acceleration: current.acceleration,
                gpu_layers: current.gpu_layers,
            });
        }

        self.configured_gpu_layers.store(gpu_layers, Ordering::SeqCst);

        match self.request_load(gpu_layers).await {
            Ok(info) => Ok(info),
            Err(gpu_err) if gpu_layers > 0 => {
                warn!(gpu_layers, error = %gpu_err, "GPU load failed, falling back to CPU");
                self.request_load(0).await.map_err(|cpu_err| {
                    error!(error = %cpu_err, "CPU fallback load failed");
                    StepwiseError::LoadFailed(format!(
                        "GPU load failed ({}); CPU fallback failed ({})",
                        gpu_err, cpu_err
                    ))
                })
            }
            Err(e) => {
                error!(error = %e, "Model load failed");
                Err(StepwiseError::LoadFailed(e.to_string()))
            }
        }
    }

    async fn request_load(&self, gpu_layers: u32) -> Result<SessionInfo> {
        let reply = self.server.load(gpu_layers).await?;
        if reply.is_failure() {
            return Err(StepwiseError::LoadFailed(reply.status));
        }

        let acceleration = reply
            .acceleration
            .as_deref()
            .map(Acceleration::parse)
            .unwrap_or(Acceleration::Cpu);

        self.set_state(ModelSession {
            loaded: true,
            acceleration,
            gpu_layers: reply.gpu_layers,
        });

        info!(%acceleration, gpu_layers = reply.gpu_layers, "Model loaded");

        Ok(SessionInfo {
            status: if reply.status.is_empty() {
                "loaded".to_string()
            } else {
                reply.status
            },
            acceleration,
            gpu_layers: reply.gpu_layers,
        })
    }

    /// Make sure a model is loaded, repairing an evicted session if needed.
    ///
    /// Returns `false` instead of failing when the server is unreachable or recovery fails.
    pub async fn ensure_loaded(&self) -> bool {
        let health = self.health().await;
        if !health.healthy {
            warn!(detail = ?health.detail, "Server unhealthy, cannot ensure model is loaded");
            return false;
        }

        {
            let _transition = self.transition.lock().await;
            let local = self.snapshot();
            if health.loaded {
                if !local.loaded {
                    info!("Server already has a model loaded, adopting it");
                    self.set_state(ModelSession {
                        loaded: true,
                        acceleration: health.acceleration,
                        gpu_layers: local.gpu_layers,
                    });
                }
                return true;
            }

            if local.loaded {
                warn!("Server reports no model loaded, local session is stale");
                self.set_state(ModelSession::default());
            }
        }

        match self.load(self.configured_gpu_layers()).await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Could not recover model session");
                false
            }
        }
    }

    /// Best-effort unload. Local state always ends up UNLOADED.
    pub async fn unload(&self) {
        let _transition = self.transition.lock().await;

        if let Err(e) = self.server.unload().await {
            error!(error = %e, "Failed to unload model");
        } else {
            info!("Model unloaded");
        }

        self.set_state(ModelSession::default());
    }

    /// Fetch the server's generation counters.
    pub async fn metrics(&self) -> Result<ServerMetrics> {
        self.server.metrics().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn manager_for(url: String) -> ModelSessionManager {
        let server = Arc::new(InferenceServerClient::with_host(url).unwrap());
        ModelSessionManager::new(server, 99)
    }

    #[tokio::test]
    async fn test_load_success_updates_state() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/load")
            .with_status(200)
            .with_body(r#"{"status":"loaded","acceleration":"GPU","gpu_layers":99}"#)
            .create();

        let manager = manager_for(server.url());
        let info = manager.load(99).await.unwrap();

        mock.assert();
        assert_eq!(info.status, "loaded");
        assert_eq!(info.acceleration, Acceleration::Gpu);
        assert_eq!(info.gpu_layers, 99);
        assert_eq!(
            manager.snapshot(),
            ModelSession {
                loaded: true,
                acceleration: Acceleration::Gpu,
                gpu_layers: 99
            }
        );
    }

    #[tokio::test]
    async fn test_load_when_loaded_makes_no_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/load")
            .with_status(200)
            .with_body(r#"{"status":"loaded","acceleration":"GPU","gpu_layers":99}"#)
            .expect(1)
            .create();

        let manager = manager_for(server.url());
        manager.load(99).await.unwrap();
        let again = manager.load(99).await.unwrap();

        mock.assert();
        assert_eq!(again.status, "already_loaded");
        assert_eq!(again.acceleration, Acceleration::Gpu);
        assert_eq!(again.gpu_layers, 99);
    }

    #[tokio::test]
    async fn test_gpu_failure_falls_back_to_cpu() {
        let mut server = mockito::Server::new_async().await;
        let gpu = server
            .mock("POST", "/load")
            .match_body(Matcher::JsonString(r#"{"gpu_layers":99}"#.to_string()))
            .with_status(500)
            .with_body("CUDA out of memory")
            .expect(1)
            .create();
        let cpu = server
            .mock("POST", "/load")
            .match_body(Matcher::JsonString(r#"{"gpu_layers":0}"#.to_string()))
            .with_status(200)
            .with_body(r#"{"status":"loaded","acceleration":"CPU","gpu_layers":0}"#)
            .expect(1)
            .create();

        let manager = manager_for(server.url());
        let info = manager.load(99).await.unwrap();

        gpu.assert();
        cpu.assert();
        assert_eq!(info.acceleration, Acceleration::Cpu);
        assert_eq!(info.gpu_layers, 0);
        assert!(manager.is_loaded());
        assert_eq!(manager.configured_gpu_layers(), 99);
    }

    #[tokio::test]
    async fn test_reported_failure_status_triggers_fallback() {
        let mut server = mockito::Server::new_async().await;
        let gpu = server
            .mock("POST", "/load")
            .match_body(Matcher::JsonString(r#"{"gpu_layers":35}"#.to_string()))
            .with_status(200)
            .with_body(r#"{"status":"failed: no device","acceleration":"None","gpu_layers":0}"#)
            .create();
        let cpu = server
            .mock("POST", "/load")
            .match_body(Matcher::JsonString(r#"{"gpu_layers":0}"#.to_string()))
            .with_status(200)
            .with_body(r#"{"status":"loaded","acceleration":"CPU","gpu_layers":0}"#)
            .create();

        let manager = manager_for(server.url());
        let info = manager.load(35).await.unwrap();

        gpu.assert();
        cpu.assert();
        assert_eq!(info.status, "loaded");
        assert_eq!(info.acceleration, Acceleration::Cpu);
    }

    #[tokio::test]
    async fn test_both_strategies_failing_raises_load_failed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("POST", "/load").with_status(500).expect(2).create();

        let manager = manager_for(server.url());
        let err = manager.load(99).await.unwrap_err();

        mock.assert();
        assert!(matches!(err, StepwiseError::LoadFailed(_)));
        assert!(!manager.is_loaded());
    }

    #[tokio::test]
    async fn test_cpu_load_failure_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("POST", "/load").with_status(500).expect(1).create();

        let manager = manager_for(server.url());
        let err = manager.load(0).await.unwrap_err();

        mock.assert();
        assert!(matches!(err, StepwiseError::LoadFailed(_)));
    }

    #[tokio::test]
    async fn test_health_reports_degraded_when_unreachable() {
        let manager = manager_for("http://127.0.0.1:1".to_string());
        let health = manager.health().await;

        assert!(!health.healthy);
        assert!(!health.loaded);
        assert_eq!(health.acceleration, Acceleration::None);
        assert!(health.detail.is_some());
    }

    #[tokio::test]
    async fn test_health_parses_reply() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/health")
            .with_status(200)
            .with_body(r#"{"status":"healthy","model_loaded":true,"acceleration":"CPU"}"#)
            .create();

        let manager = manager_for(server.url());
        let health = manager.health().await;

        assert!(health.healthy);
        assert!(health.loaded);
        assert_eq!(health.acceleration, Acceleration::Cpu);
    }

    #[tokio::test]
    async fn test_ensure_loaded_loads_when_server_is_empty() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/health")
            .with_status(200)
            .with_body(r#"{"status":"healthy","model_loaded":false,"acceleration":"None"}"#)
            .create();
        let load = server
            .mock("POST", "/load")
            .match_body(Matcher::JsonString(r#"{"gpu_layers":99}"#.to_string()))
            .with_status(200)
            .with_body(r#"{"status":"loaded","acceleration":"GPU","gpu_layers":99}"#)
            .expect(1)
            .create();

        let manager = manager_for(server.url());
        assert!(manager.ensure_loaded().await);

        load.assert();
        assert!(manager.is_loaded());
    }

    #[tokio::test]
    async fn test_ensure_loaded_detects_server_restart() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/health")
            .with_status(200)
            .with_body(r#"{"status":"healthy","model_loaded":false,"acceleration":"None"}"#)
            .create();
        let load = server
            .mock("POST", "/load")
            .with_status(200)
            .with_body(r#"{"status":"loaded","acceleration":"GPU","gpu_layers":20}"#)
            .expect(2)
            .create();

        let manager = manager_for(server.url());
        manager.load(20).await.unwrap();
        assert!(manager.is_loaded());

        // The server lost its model; the stale local state must not short-circuit.
        assert!(manager.ensure_loaded().await);

        load.assert();
        assert!(manager.is_loaded());
    }

    #[tokio::test]
    async fn test_ensure_loaded_adopts_remote_model() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/health")
            .with_status(200)
            .with_body(r#"{"status":"healthy","model_loaded":true,"acceleration":"GPU"}"#)
            .create();
        let load = server.mock("POST", "/load").expect(0).create();

        let manager = manager_for(server.url());
        assert!(manager.ensure_loaded().await);

        load.assert();
        assert!(manager.is_loaded());
        assert_eq!(manager.snapshot().acceleration, Acceleration::Gpu);
    }

    #[tokio::test]
    async fn test_ensure_loaded_returns_false_when_unreachable() {
        let manager = manager_for("http://127.0.0.1:1".to_string());
        assert!(!manager.ensure_loaded().await);
    }

    #[tokio::test]
    async fn test_ensure_loaded_returns_false_when_load_fails() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/health")
            .with_status(200)
            .with_body(r#"{"status":"healthy","model_loaded":false}"#)
            .create();
        server.mock("POST", "/load").with_status(500).create();

        let manager = manager_for(server.url());
        assert!(!manager.ensure_loaded().await);
        assert!(!manager.is_loaded());
    }

    #[tokio::test]
    async fn test_unload_resets_state_even_on_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/load")
            .with_status(200)
            .with_body(r#"{"status":"loaded","acceleration":"GPU","gpu_layers":99}"#)
            .create();
        let unload = server.mock("POST", "/unload").with_status(500).expect(1).create();

        let manager = manager_for(server.url());
        manager.load(99).await.unwrap();
        manager.unload().await;

        unload.assert();
        assert_eq!(manager.snapshot(), ModelSession::default());
    }

    #[tokio::test]
    async fn test_metrics() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/metrics")
            .with_status(200)
            .with_body(
                r#"{"total_requests":4,"total_tokens_generated":200,"total_time_ms":4000,
                    "average_tokens_per_request":50.0,"average_time_per_request_ms":1000.0}"#,
            )
            .create();

        let manager = manager_for(server.url());
        let metrics = manager.metrics().await.unwrap();

        assert_eq!(metrics.total_requests, 4);
        assert_eq!(metrics.average_tokens_per_request, 50.0);
    }
}
