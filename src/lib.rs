pub mod config;
pub mod error;
pub mod llm;
pub mod react;
pub mod router;
pub mod tools;

pub use error::{Result, StepwiseError};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::error::{Result, StepwiseError};
    pub use crate::llm::gateways::{InferenceServerClient, InferenceServerConfig};
    pub use crate::llm::{
        CompletionConfig, InferenceGateway, ModelSessionManager, RetryPolicy, StreamEvent,
        StreamingInferenceClient,
    };
    pub use crate::react::{AgentEvent, Outcome, ReActEngine, RunResult, Task};
    pub use crate::router::{FastRouter, Route};
    pub use crate::tools::{FnTool, Tool, ToolDescriptor, ToolDispatcher};
}
