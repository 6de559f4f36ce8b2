pub mod inference_server;

pub use inference_server::{InferenceServerClient, InferenceServerConfig};
