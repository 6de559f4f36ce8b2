//! Tool registry and invocation.
//!
//! The dispatcher turns whatever name the model produced into either a registered tool, the
//! reserved `finish` directive, or an unresolved name that fails lookup downstream. Every
//! invocation outcome (success, error or panic) comes back as a plain string.

use crate::error::{Result, StepwiseError};
use crate::tools::{
    AddNumbersTool, CalculatorTool, CurrentDatetimeTool, EchoTool, Tool, ToolDescriptor,
};
use serde_json::{Map, Value};
use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, info, warn};

/// The reserved directive name that ends a run with the action input as its answer.
pub const FINISH: &str = "finish";

/// Prefix that marks an observation as a failure.
pub const ERROR_PREFIX: &str = "ERROR:";

/// Registry key of a tool: trimmed, lower-cased and never `finish`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ToolId(String);

impl ToolId {
    pub fn new(name: &str) -> Result<Self> {
        let key = name.trim().to_lowercase();
        if key.is_empty() {
            return Err(StepwiseError::ConfigError("Tool name must not be empty".to_string()));
        }
        if key == FINISH {
            return Err(StepwiseError::ConfigError(format!(
                "'{}' is reserved and cannot be registered as a tool",
                FINISH
            )));
        }
        if key.contains('|') {
            return Err(StepwiseError::ConfigError(format!(
                "Tool name '{}' must not contain '|'",
                name
            )));
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ToolId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a model-produced action name refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Finish,
    Tool(ToolId),
    /// No match; carries the trimmed, lower-cased name.
    Unresolved(String),
}

impl Resolution {
    /// The normalized name: `finish`, a registry key, or the unresolved name.
    pub fn name(&self) -> &str {
        match self {
            Resolution::Finish => FINISH,
            Resolution::Tool(id) => id.as_str(),
            Resolution::Unresolved(name) => name,
        }
    }
}

/// Resolves action names against the registered tools and invokes them.
#[derive(Clone, Default)]
pub struct ToolDispatcher {
    tools: BTreeMap<ToolId, Arc<dyn Tool>>,
}

impl ToolDispatcher {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding `echo`, `add_numbers`, `calculator` and `current_datetime`.
    pub fn with_builtins() -> Result<Self> {
        let mut dispatcher = Self::new();
        dispatcher.register(EchoTool)?;
        dispatcher.register(AddNumbersTool)?;
        dispatcher.register(CalculatorTool)?;
        dispatcher.register(CurrentDatetimeTool::new())?;
        Ok(dispatcher)
    }

    /// Add a tool under its descriptor name. A later tool with the same key replaces the
    /// earlier one.
    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<ToolId> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<ToolId> {
        let id = ToolId::new(&tool.name())?;
        if self.tools.insert(id.clone(), tool).is_some() {
            warn!(tool = %id, "Replacing previously registered tool");
        }
        Ok(id)
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Result<Self> {
        self.register(tool)?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Whether `name` is exactly a registry key.
    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Registry keys in sorted order.
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().map(|id| id.to_string()).collect()
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.values().map(|tool| tool.descriptor()).collect()
    }

    fn lookup(&self, name: &str) -> Option<(&ToolId, &Arc<dyn Tool>)> {
        self.tools.get_key_value(name)
    }

    /// Normalize a model-produced action name.
    ///
    /// The name is trimmed and lower-cased. A `|`-separated hedge list resolves to `finish`
    /// if listed, else the first listed registered tool. A name that is neither `finish`
    /// nor a key falls back to substring containment against the keys (either direction).
    pub fn resolve(&self, raw: &str) -> Resolution {
        let name = raw.trim().to_lowercase();

        if name.contains('|') {
            let parts: Vec<&str> = name.split('|').map(str::trim).collect();
            if parts.contains(&FINISH) {
                return Resolution::Finish;
            }
            if let Some((id, _)) = parts.iter().find_map(|part| self.lookup(part)) {
                return Resolution::Tool(id.clone());
            }
        }

        if name == FINISH {
            return Resolution::Finish;
        }
        if let Some((id, _)) = self.lookup(&name) {
            return Resolution::Tool(id.clone());
        }

        if !name.is_empty() {
            let contained = self
                .tools
                .keys()
                .find(|id| name.contains(id.as_str()) || id.as_str().contains(name.as_str()));
            if let Some(id) = contained {
                return Resolution::Tool(id.clone());
            }
        }

        Resolution::Unresolved(name)
    }

    /// Shorthand for `resolve(raw).name()`.
    pub fn normalize(&self, raw: &str) -> String {
        self.resolve(raw).name().to_string()
    }

    /// Invoke the tool registered under `name` and render the outcome as text.
    ///
    /// Never fails: unknown names, tool errors and tool panics all come back as strings
    /// starting with [`ERROR_PREFIX`].
    pub fn execute(&self, name: &str, input: &Value) -> String {
        let Some((id, tool)) = self.lookup(name) else {
            warn!(tool = name, "Unknown tool requested");
            return self.unknown_tool_message(name);
        };

        let args = expand_arguments(input);
        info!(tool = %id, "Executing tool");

        match catch_unwind(AssertUnwindSafe(|| tool.run(&args))) {
            Ok(Ok(value)) => render_output(value),
            Ok(Err(e)) => {
                error!(tool = %id, error = %e, "Tool execution failed");
                let detail = match e {
                    StepwiseError::ToolError(message) => message,
                    other => other.to_string(),
                };
                format!("{} Tool execution failed - {}", ERROR_PREFIX, detail)
            }
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(tool = %id, panic = %detail, "Tool panicked");
                format!("{} Tool execution failed - tool panicked: {}", ERROR_PREFIX, detail)
            }
        }
    }

    fn unknown_tool_message(&self, name: &str) -> String {
        let mut valid = self.tool_names();
        valid.push(FINISH.to_string());
        let err = StepwiseError::UnknownAction {
            name: name.to_string(),
            valid: valid.join(", "),
        };
        format!("{} {}", ERROR_PREFIX, err)
    }
}

impl fmt::Debug for ToolDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDispatcher").field("tools", &self.tool_names()).finish()
    }
}

/// Keyword-expand an action input: objects pass through, anything else lands under `input`.
pub fn expand_arguments(input: &Value) -> HashMap<String, Value> {
    match input {
        Value::Object(map) => map.clone().into_iter().collect(),
        Value::Null => HashMap::new(),
        other => {
            let mut args = HashMap::new();
            args.insert("input".to_string(), other.clone());
            args
        }
    }
}

/// Render a tool result as observation text. Strings are used verbatim, everything else
/// as compact JSON.
pub fn render_output(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

/// Build an object input from key/value pairs.
pub fn object_input<I, K>(pairs: I) -> Value
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    Value::Object(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect::<Map<_, _>>())
}
