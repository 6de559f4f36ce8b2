use crate::error::Result;
use crate::tools::{string_arg, Tool, ToolDescriptor};
use serde_json::{json, Value};
use std::collections::HashMap;

/// Repeats its input back, prefixed with `ECHO: `.
#[derive(Debug, Default)]
pub struct EchoTool;

impl Tool for EchoTool {
    fn run(&self, args: &HashMap<String, Value>) -> Result<Value> {
        let text = match string_arg(args, &["text", "input"]) {
            Some(text) => text.to_string(),
            None => args
                .get("text")
                .or_else(|| args.get("input"))
                .map(|v| v.to_string())
                .unwrap_or_default(),
        };
        Ok(json!(format!("ECHO: {}", text)))
    }

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::function(
            "echo",
            "Repeat the given text back verbatim.",
            json!({
                "type": "object",
                "properties": {
                    "text": {"type": "string", "description": "The text to repeat"}
                },
                "required": ["text"]
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_text() {
        let mut args = HashMap::new();
        args.insert("text".to_string(), json!("hello"));

        assert_eq!(EchoTool.run(&args).unwrap(), json!("ECHO: hello"));
    }

    #[test]
    fn test_echo_expanded_input() {
        let mut args = HashMap::new();
        args.insert("input".to_string(), json!("from a bare string"));

        assert_eq!(EchoTool.run(&args).unwrap(), json!("ECHO: from a bare string"));
    }

    #[test]
    fn test_echo_non_string_value() {
        let mut args = HashMap::new();
        args.insert("text".to_string(), json!(42));

        assert_eq!(EchoTool.run(&args).unwrap(), json!("ECHO: 42"));
    }
}
