pub mod gateway;
pub mod gateways;
pub mod models;
pub mod session;
pub mod streaming;

pub use gateway::{CompletionConfig, InferenceGateway, StreamEvent, TokenStream};
pub use models::{Acceleration, HealthReport, ServerMetrics, SessionInfo};
pub use session::{ModelSession, ModelSessionManager};
pub use streaming::{CancelReport, RetryPolicy, StreamingInferenceClient};
