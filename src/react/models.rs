//! Data model of a run: the task, the conversation, the step log and the result.

use crate::tools::FINISH;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The immutable input of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Task(String);

impl Task {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Task {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for Task {
    fn from(text: String) -> Self {
        Self(text)
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Observation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

/// Ordered record of everything said during a run.
///
/// Assistant turns hold the model output verbatim, including anything it produced after
/// the action that was executed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationHistory {
    turns: Vec<Turn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, role: Role, text: impl Into<String>) {
        self.turns.push(Turn {
            role,
            text: text.into(),
        });
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// The trailing turns that cover the last `exchanges` assistant turns and whatever
    /// followed them. User turns are not counted.
    pub fn trailing_window(&self, exchanges: usize) -> &[Turn] {
        if exchanges == 0 {
            return &[];
        }

        let mut seen = 0;
        for (index, turn) in self.turns.iter().enumerate().rev() {
            if turn.role == Role::Assistant {
                seen += 1;
                if seen == exchanges {
                    return &self.turns[index..];
                }
            }
        }

        let first_assistant = self
            .turns
            .iter()
            .position(|turn| turn.role == Role::Assistant)
            .unwrap_or(self.turns.len());
        &self.turns[first_assistant..]
    }
}

/// The structured instruction extracted from model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDirective {
    pub name: String,
    /// A JSON object of keyword arguments, or a bare string.
    pub input: Value,
}

impl ActionDirective {
    pub fn new(name: impl Into<String>, input: Value) -> Self {
        Self {
            name: name.into(),
            input,
        }
    }

    /// Placeholder directive recorded for a step whose output could not be parsed.
    pub fn none() -> Self {
        Self::new("", Value::Null)
    }

    pub fn is_finish(&self) -> bool {
        self.name == FINISH
    }

    /// The input as answer text: strings verbatim, single-field objects by their value,
    /// anything else as JSON.
    pub fn input_text(&self) -> String {
        match &self.input {
            Value::String(text) => text.clone(),
            Value::Null => String::new(),
            Value::Object(map) => {
                let preferred = ["answer", "input", "result", "text"]
                    .iter()
                    .find_map(|key| map.get(*key).and_then(|v| v.as_str()));
                match preferred {
                    Some(text) => text.to_string(),
                    None if map.len() == 1 => match map.values().next() {
                        Some(Value::String(text)) => text.clone(),
                        Some(other) => other.to_string(),
                        None => String::new(),
                    },
                    None => self.input.to_string(),
                }
            }
            other => other.to_string(),
        }
    }
}

impl fmt::Display for ActionDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.input)
    }
}

/// One completed think/act/observe cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub thought: String,
    pub action: ActionDirective,
    pub observation: String,
}

/// Append-only step record that never grows past its capacity.
#[derive(Debug, Clone, Default)]
pub struct StepLog {
    steps: Vec<Step>,
    capacity: usize,
}

impl StepLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            steps: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a step. Returns `false`, leaving the log unchanged, once it is full.
    pub fn push(&mut self, step: Step) -> bool {
        if self.is_full() {
            return false;
        }
        self.steps.push(step);
        true
    }

    pub fn is_full(&self) -> bool {
        self.steps.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn last(&self) -> Option<&Step> {
        self.steps.last()
    }

    pub fn into_steps(self) -> Vec<Step> {
        self.steps
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The model produced a final answer (marker, implicit answer or `finish`).
    FinalAnswer,
    /// The fast-path router answered without inference.
    FastPath,
    MaxStepsExceeded,
    Cancelled,
    InferenceFailed,
}

/// The structured result every run returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub success: bool,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_result: Option<String>,
    pub steps: Vec<Step>,
}

impl RunResult {
    pub fn answered(outcome: Outcome, answer: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            success: true,
            outcome,
            result: Some(answer.into()),
            error: None,
            partial_result: None,
            steps,
        }
    }

    pub fn failed(outcome: Outcome, error: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            success: false,
            outcome,
            result: None,
            error: Some(error.into()),
            partial_result: None,
            steps,
        }
    }

    pub fn with_partial_result(mut self, partial: Option<String>) -> Self {
        self.partial_result = partial;
        self
    }

    /// The answer on success, the diagnostic otherwise.
    pub fn result_or_error(&self) -> &str {
        self.result
            .as_deref()
            .or(self.error.as_deref())
            .unwrap_or_default()
    }
}
