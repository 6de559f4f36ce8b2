//! Inspect and manage the model session on the inference server.
//!
//! ```bash
//! cargo run --example session
//! ```

use std::sync::Arc;
use stepwise::prelude::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = EngineConfig::from_env()?;
    let server = Arc::new(InferenceServerClient::new()?);
    println!("Inference server: {}", server.host());

    let session = ModelSessionManager::new(server, config.default_gpu_layers);

    let health = session.health().await;
    println!("Health: {}", serde_json::to_string(&health)?);
    if !health.healthy {
        println!("Server is not reachable, nothing else to do.");
        return Ok(());
    }

    let info = session.load(config.default_gpu_layers).await?;
    println!(
        "Loaded: status={} acceleration={} gpu_layers={}",
        info.status, info.acceleration, info.gpu_layers
    );

    let metrics = session.metrics().await?;
    println!(
        "Metrics: {} requests, {} tokens, {:.1} ms/request",
        metrics.total_requests, metrics.total_tokens_generated, metrics.average_time_per_request_ms
    );

    session.unload().await;
    println!("Unloaded: {}", !session.is_loaded());

    Ok(())
}
