use crate::error::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Descriptor for tool function parameters
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolDescriptor {
    pub r#type: String,
    pub function: FunctionDescriptor,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FunctionDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDescriptor {
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            r#type: "function".to_string(),
            function: FunctionDescriptor {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

/// A capability the engine can invoke on the model's behalf.
///
/// Tools run synchronously inside a step and are expected to be short-lived. Arguments
/// arrive keyword-expanded: a JSON object from the model is passed as-is, a bare string
/// arrives under the `input` key.
pub trait Tool: Send + Sync {
    /// Execute the tool with given arguments
    fn run(&self, args: &HashMap<String, Value>) -> Result<Value>;

    /// Get tool descriptor for prompts
    fn descriptor(&self) -> ToolDescriptor;

    fn name(&self) -> String {
        self.descriptor().function.name
    }
}

type ToolFn = dyn Fn(&HashMap<String, Value>) -> Result<Value> + Send + Sync;

/// Adapts a plain closure into a [`Tool`].
///
/// ```ignore
/// let shout = FnTool::new("shout", "Upper-case the input", |args| {
///     let text = args.get("input").and_then(|v| v.as_str()).unwrap_or_default();
///     Ok(json!(text.to_uppercase()))
/// });
/// ```
pub struct FnTool {
    name: String,
    description: String,
    parameters: Value,
    handler: Box<ToolFn>,
}

impl FnTool {
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&HashMap<String, Value>) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "input": {"type": "string", "description": "Free-form input"}
                },
                "required": []
            }),
            handler: Box::new(handler),
        }
    }

    /// Replace the default single-`input` parameter schema.
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }
}

impl fmt::Debug for FnTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

impl Tool for FnTool {
    fn run(&self, args: &HashMap<String, Value>) -> Result<Value> {
        (self.handler)(args)
    }

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::function(&self.name, &self.description, self.parameters.clone())
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

/// Read the first string argument found under any of `keys`.
pub(crate) fn string_arg<'a>(args: &'a HashMap<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| args.get(*key).and_then(|v| v.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StepwiseError;
    use serde_json::json;

    #[test]
    fn test_tool_descriptor_serialization() {
        let descriptor = ToolDescriptor::function(
            "test_tool",
            "A test tool",
            json!({
                "type": "object",
                "properties": {
                    "arg1": {"type": "string"}
                }
            }),
        );

        let json = serde_json::to_string(&descriptor).unwrap();
        assert!(json.contains("test_tool"));
        assert!(json.contains("A test tool"));
        assert!(json.contains("function"));
    }

    #[test]
    fn test_tool_descriptor_deserialization() {
        let json = r#"{
            "type": "function",
            "function": {
                "name": "calculator",
                "description": "Perform calculations",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "expr": {"type": "string"}
                    }
                }
            }
        }"#;

        let descriptor: ToolDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(descriptor.r#type, "function");
        assert_eq!(descriptor.function.name, "calculator");
        assert_eq!(descriptor.function.description, "Perform calculations");
    }

    #[test]
    fn test_fn_tool_runs_closure() {
        let tool = FnTool::new("shout", "Upper-case the input", |args| {
            let text = string_arg(args, &["input"]).unwrap_or_default();
            Ok(json!(text.to_uppercase()))
        });

        let mut args = HashMap::new();
        args.insert("input".to_string(), json!("quiet"));

        assert_eq!(tool.run(&args).unwrap(), json!("QUIET"));
        assert_eq!(tool.name(), "shout");
    }

    #[test]
    fn test_fn_tool_propagates_errors() {
        let tool = FnTool::new("broken", "Always fails", |_| {
            Err(StepwiseError::ToolError("nope".to_string()))
        });

        assert!(matches!(
            tool.run(&HashMap::new()),
            Err(StepwiseError::ToolError(_))
        ));
    }

    #[test]
    fn test_fn_tool_custom_parameters() {
        let tool = FnTool::new("lookup", "Look something up", |_| Ok(Value::Null))
            .with_parameters(json!({"type": "object", "properties": {"key": {"type": "string"}}}));

        let descriptor = tool.descriptor();
        assert_eq!(descriptor.function.name, "lookup");
        assert!(descriptor.function.parameters["properties"].get("key").is_some());
    }

    #[test]
    fn test_string_arg_checks_keys_in_order() {
        let mut args = HashMap::new();
        args.insert("expression".to_string(), json!("1+1"));
        args.insert("input".to_string(), json!("2+2"));

        assert_eq!(string_arg(&args, &["expr", "expression", "input"]), Some("1+1"));
        assert_eq!(string_arg(&args, &["missing"]), None);
    }
}
