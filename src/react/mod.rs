//! The ReAct orchestration loop and its building blocks.

pub mod models;
pub mod orchestrator;
pub mod parser;
pub mod prompt;

pub use models::{
    ActionDirective, ConversationHistory, Outcome, Role, RunResult, Step, StepLog, Task, Turn,
};
pub use orchestrator::{AgentEvent, AgentPhase, ReActEngine, ReActEngineBuilder};
pub use parser::{ParseEvent, ParsedTurn, Phase, ReActParser, TurnOutcome};
