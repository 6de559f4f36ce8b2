//! The bounded Reason-Act-Observe loop.
//!
//! Each step builds a prompt from the task and a trailing window of the conversation,
//! streams the model's reply through a [`ReActParser`], and either finishes with the answer
//! or runs the requested tool and records the observation. Parse failures, unknown tools
//! and tool errors become observations the model sees on the next step. Only cancellation
//! and exhausted inference retries end a run early.

use crate::config::EngineConfig;
use crate::error::{Result, StepwiseError};
use crate::llm::gateway::{CompletionConfig, InferenceGateway, StreamEvent};
use crate::react::models::{
    ActionDirective, ConversationHistory, Outcome, Role, RunResult, Step, StepLog, Task,
};
use crate::react::parser::{ParseEvent, ParsedTurn, ReActParser, TurnOutcome};
use crate::react::prompt::{build_prompt, system_prompt};
use crate::router::{FastRouter, Route};
use crate::tools::{ToolDispatcher, ERROR_PREFIX};
use futures::stream::StreamExt;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const MAX_STEPS_EXCEEDED: &str = "Max steps exceeded.";
pub const CANCELLED: &str = "Run cancelled.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentPhase {
    Thinking,
    Acting,
}

/// Progress notifications for a UI following a run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Phase { step: usize, phase: AgentPhase },
    Thought { step: usize, text: String },
    /// The inference request failed and is being re-issued; discard this step's thoughts.
    Retry { step: usize, attempt: u32 },
    Action { step: usize, tool: String, params: Value },
    Observation { step: usize, text: String },
    Done { answer: String },
    Error { message: String },
}

#[derive(Clone, Copy)]
struct Events<'a>(Option<&'a mpsc::Sender<AgentEvent>>);

impl Events<'_> {
    async fn send(&self, event: AgentEvent) {
        if let Some(sender) = self.0 {
            // A dropped receiver only means nobody is watching.
            let _ = sender.send(event).await;
        }
    }
}

/// Runs tasks through the Reason-Act-Observe loop.
///
/// ```ignore
/// let engine = ReActEngine::builder(gateway)
///     .tools(ToolDispatcher::with_builtins()?)
///     .router(FastRouter::standard()?)
///     .build()?;
///
/// let result = engine.run("What is (12 + 30) / 7?").await;
/// println!("{}", result.result_or_error());
/// ```
pub struct ReActEngine {
    gateway: Arc<dyn InferenceGateway>,
    dispatcher: Arc<ToolDispatcher>,
    router: Option<Arc<FastRouter>>,
    config: EngineConfig,
    system_prompt: String,
}

impl ReActEngine {
    pub fn builder(gateway: Arc<dyn InferenceGateway>) -> ReActEngineBuilder {
        ReActEngineBuilder::new(gateway)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &ToolDispatcher {
        &self.dispatcher
    }

    /// Run a task to completion.
    pub async fn run(&self, task: impl Into<Task>) -> RunResult {
        self.run_with_cancel(task, &CancellationToken::new()).await
    }

    /// Run a task, stopping early once `cancel` is triggered.
    pub async fn run_with_cancel(&self, task: impl Into<Task>, cancel: &CancellationToken) -> RunResult {
        self.start(task.into(), cancel, Events(None)).await
    }

    /// Run a task while reporting progress on `events`.
    pub async fn run_with_events(
        &self,
        task: impl Into<Task>,
        cancel: &CancellationToken,
        events: mpsc::Sender<AgentEvent>,
    ) -> RunResult {
        self.start(task.into(), cancel, Events(Some(&events))).await
    }

    async fn start(&self, task: Task, cancel: &CancellationToken, events: Events<'_>) -> RunResult {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", %run_id);

        async {
            info!(task = %task, max_steps = self.config.max_steps, "Run started");
            let result = if cancel.is_cancelled() {
                cancelled(StepLog::default())
            } else {
                match self.fast_path(&task, events).await {
                    Some(result) => result,
                    None => self.drive(&task, cancel, events).await,
                }
            };
            self.conclude(result, events).await
        }
        .instrument(span)
        .await
    }

    async fn conclude(&self, result: RunResult, events: Events<'_>) -> RunResult {
        if result.success {
            info!(outcome = ?result.outcome, steps = result.steps.len(), "Run succeeded");
            events
                .send(AgentEvent::Done {
                    answer: result.result_or_error().to_string(),
                })
                .await;
        } else {
            warn!(outcome = ?result.outcome, steps = result.steps.len(), error = result.result_or_error(), "Run failed");
            events
                .send(AgentEvent::Error {
                    message: result.result_or_error().to_string(),
                })
                .await;
        }
        result
    }

    /// Answer without inference when the router recognizes the task and the tool it
    /// names is registered. A failing direct tool call escalates to the loop.
    async fn fast_path(&self, task: &Task, events: Events<'_>) -> Option<RunResult> {
        let router = self.router.as_ref()?;

        match router.route(task.as_str())? {
            Route::Instant(answer) => Some(RunResult::answered(Outcome::FastPath, answer, vec![])),
            Route::Tool { name, params } => {
                if !self.dispatcher.contains(&name) {
                    debug!(tool = %name, "Fast path tool not registered, escalating");
                    return None;
                }

                events
                    .send(AgentEvent::Action {
                        step: 1,
                        tool: name.clone(),
                        params: params.clone(),
                    })
                    .await;
                let observation = self.dispatcher.execute(&name, &params);
                if observation.starts_with(ERROR_PREFIX) {
                    warn!(tool = %name, "Fast path tool failed, escalating");
                    return None;
                }
                events
                    .send(AgentEvent::Observation {
                        step: 1,
                        text: observation.clone(),
                    })
                    .await;

                let step = Step {
                    thought: "Matched a fast-path route".to_string(),
                    action: ActionDirective::new(name, params),
                    observation: observation.clone(),
                };
                Some(RunResult::answered(Outcome::FastPath, observation, vec![step]))
            }
        }
    }

    async fn drive(&self, task: &Task, cancel: &CancellationToken, events: Events<'_>) -> RunResult {
        let completion = self.config.completion();
        let mut history = ConversationHistory::new();
        history.push(Role::User, task.as_str());
        let mut log = StepLog::with_capacity(self.config.max_steps);

        while !log.is_full() {
            let step = log.len() + 1;
            if cancel.is_cancelled() {
                return cancelled(log);
            }

            let prompt = build_prompt(
                &self.system_prompt,
                task,
                history.trailing_window(self.config.history_window),
            );
            events
                .send(AgentEvent::Phase {
                    step,
                    phase: AgentPhase::Thinking,
                })
                .await;
            debug!(step, prompt_len = prompt.len(), "Requesting inference");

            let turn = match self.infer(&prompt, &completion, cancel, step, events).await {
                Ok(turn) => turn,
                Err(StepwiseError::Cancelled) => return cancelled(log),
                Err(e) => {
                    error!(step, error = %e, "Inference failed");
                    return RunResult::failed(
                        Outcome::InferenceFailed,
                        format!("Inference failed: {}", e),
                        log.into_steps(),
                    );
                }
            };
            history.push(Role::Assistant, turn.raw.as_str());

            let (action, observation) = match turn.outcome {
                TurnOutcome::FinalAnswer(answer) => {
                    info!(step, "Final answer received");
                    return RunResult::answered(Outcome::FinalAnswer, answer, log.into_steps());
                }
                TurnOutcome::Action(mut action) => {
                    action.name = self.dispatcher.normalize(&action.name);
                    if action.is_finish() {
                        info!(step, "Finish directive received");
                        return RunResult::answered(
                            Outcome::FinalAnswer,
                            action.input_text(),
                            log.into_steps(),
                        );
                    }

                    events
                        .send(AgentEvent::Action {
                            step,
                            tool: action.name.clone(),
                            params: action.input.clone(),
                        })
                        .await;
                    info!(step, tool = %action.name, "Executing action");
                    let observation = self.dispatcher.execute(&action.name, &action.input);
                    (action, observation)
                }
                TurnOutcome::ParseFailure(reason) => {
                    warn!(step, reason = %reason, "Could not parse model output");
                    let observation = format!(
                        "{} {}. Reply with Thought, Action and Action Input lines, or with a \
                         Final Answer.",
                        ERROR_PREFIX,
                        StepwiseError::ParseError(reason)
                    );
                    (ActionDirective::none(), observation)
                }
            };

            debug!(step, observation = %observation, "Observation recorded");
            events
                .send(AgentEvent::Observation {
                    step,
                    text: observation.clone(),
                })
                .await;
            history.push(Role::Observation, observation.as_str());
            log.push(Step {
                thought: turn.thought,
                action,
                observation,
            });
        }

        warn!(max_steps = self.config.max_steps, "Max steps exceeded");
        let partial = log.last().map(|step| step.observation.clone());
        RunResult::failed(Outcome::MaxStepsExceeded, MAX_STEPS_EXCEEDED, log.into_steps())
            .with_partial_result(partial)
    }

    /// One model turn, parsed as it arrives.
    async fn infer(
        &self,
        prompt: &str,
        completion: &CompletionConfig,
        cancel: &CancellationToken,
        step: usize,
        events: Events<'_>,
    ) -> Result<ParsedTurn> {
        let mut parser = ReActParser::new(self.config.implicit_answer_min_len);

        if !self.config.streaming {
            let text = self.gateway.complete(prompt, completion, cancel).await?;
            for event in parser.feed(&text) {
                forward(event, step, events).await;
            }
            return Ok(parser.finish());
        }

        // The gateway observes `cancel` itself and ends the stream with `Cancelled` once it
        // has notified the server.
        let mut stream = self.gateway.stream(prompt, completion, cancel);
        while let Some(item) = stream.next().await {
            match item? {
                StreamEvent::Token(token) => {
                    for event in parser.feed(&token) {
                        forward(event, step, events).await;
                    }
                }
                StreamEvent::Restart { attempt } => {
                    warn!(step, attempt, "Inference restarted, discarding partial output");
                    parser.reset();
                    events.send(AgentEvent::Retry { step, attempt }).await;
                }
            }
        }

        Ok(parser.finish())
    }
}

async fn forward(event: ParseEvent, step: usize, events: Events<'_>) {
    match event {
        ParseEvent::ThoughtDelta(text) => events.send(AgentEvent::Thought { step, text }).await,
        ParseEvent::Action(action) => {
            debug!(step, tool = %action.name, "Action detected mid-stream");
            events
                .send(AgentEvent::Phase {
                    step,
                    phase: AgentPhase::Acting,
                })
                .await;
        }
    }
}

fn cancelled(log: StepLog) -> RunResult {
    warn!(steps = log.len(), "Run cancelled");
    RunResult::failed(Outcome::Cancelled, CANCELLED, log.into_steps())
}

/// Builder for constructing a [`ReActEngine`]
pub struct ReActEngineBuilder {
    gateway: Arc<dyn InferenceGateway>,
    dispatcher: Option<Arc<ToolDispatcher>>,
    router: Option<Arc<FastRouter>>,
    config: EngineConfig,
}

impl ReActEngineBuilder {
    fn new(gateway: Arc<dyn InferenceGateway>) -> Self {
        Self {
            gateway,
            dispatcher: None,
            router: None,
            config: EngineConfig::default(),
        }
    }

    /// Tools available to the model (default: none).
    pub fn tools(mut self, dispatcher: ToolDispatcher) -> Self {
        self.dispatcher = Some(Arc::new(dispatcher));
        self
    }

    pub fn shared_tools(mut self, dispatcher: Arc<ToolDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Enable fast-path routing (default: off).
    pub fn router(mut self, router: FastRouter) -> Self {
        self.router = Some(Arc::new(router));
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_steps(mut self, max_steps: usize) -> Self {
        self.config.max_steps = max_steps;
        self
    }

    pub fn build(self) -> Result<ReActEngine> {
        self.config.validate()?;

        let dispatcher = self.dispatcher.unwrap_or_default();
        let system_prompt = system_prompt(&dispatcher.descriptors());

        Ok(ReActEngine {
            gateway: self.gateway,
            dispatcher,
            router: self.router,
            config: self.config,
            system_prompt,
        })
    }
}
