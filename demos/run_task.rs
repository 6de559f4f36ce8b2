//! Run one task through the ReAct loop and print its progress as it streams.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example run_task -- "What is (12 + 30) / 7?"
//! ```
//!
//! # Requirements
//!
//! - An inference server on `INFERENCE_URL` (default http://127.0.0.1:8080)
//!
//! Press Ctrl-C to cancel the run; the server is told to stop generating.

use std::io::Write;
use std::sync::Arc;
use stepwise::prelude::*;
use stepwise::react::orchestrator::AgentPhase;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("stepwise=info")),
        )
        .init();

    let task = std::env::args()
        .skip(1)
        .collect::<Vec<_>>()
        .join(" ");
    let task = if task.trim().is_empty() {
        "What is (12 + 30) / 7?".to_string()
    } else {
        task
    };

    let config = EngineConfig::from_env()?;
    let server = Arc::new(InferenceServerClient::new()?);
    let session = Arc::new(ModelSessionManager::new(server, config.default_gpu_layers));
    let client = Arc::new(
        StreamingInferenceClient::new(session).with_auto_load(config.auto_load),
    );

    let engine = ReActEngine::builder(client.clone())
        .tools(ToolDispatcher::with_builtins()?)
        .router(FastRouter::standard()?)
        .config(config)
        .build()?;

    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    let interrupt_client = client.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            watcher.cancel();
            let report = interrupt_client.cancel_all().await;
            eprintln!("\nCancelled {} active stream(s)", report.active_streams);
        }
    });

    let (tx, mut rx) = mpsc::channel(256);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                AgentEvent::Phase {
                    step,
                    phase: AgentPhase::Thinking,
                } => print!("\n[step {}] ", step),
                AgentEvent::Phase { .. } => {}
                AgentEvent::Thought { text, .. } => print!("{}", text),
                AgentEvent::Retry { attempt, .. } => print!("\n  (retry {}) ", attempt),
                AgentEvent::Action { tool, params, .. } => print!("\n  -> {}({})", tool, params),
                AgentEvent::Observation { text, .. } => print!("\n  <- {}", text),
                AgentEvent::Done { answer } => println!("\n\nAnswer: {}", answer),
                AgentEvent::Error { message } => println!("\n\nFailed: {}", message),
            }
            let _ = std::io::stdout().flush();
        }
    });

    println!("Task: {}", task);
    let result = engine.run_with_events(task.as_str(), &cancel, tx).await;
    printer.await?;

    println!("\n{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
