use crate::error::{Result, StepwiseError};
use crate::tools::{string_arg, Tool, ToolDescriptor};
use chrono::Local;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt::Write;

/// Tool for getting the current date and time
///
/// Accepts an optional strftime-style format under `format_string` (or `input`).
pub struct CurrentDatetimeTool;

impl CurrentDatetimeTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CurrentDatetimeTool {
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for CurrentDatetimeTool {
    fn run(&self, args: &HashMap<String, Value>) -> Result<Value> {
        let format_string = string_arg(args, &["format_string", "input"])
            .filter(|f| !f.trim().is_empty())
            .unwrap_or("%Y-%m-%d %H:%M:%S");

        let now = Local::now();
        let mut formatted = String::new();
        write!(formatted, "{}", now.format(format_string)).map_err(|_| {
            StepwiseError::ToolError(format!("Invalid format string: {}", format_string))
        })?;

        Ok(json!({
            "current_datetime": formatted,
            "timestamp": now.timestamp(),
            "timezone": now.offset().to_string()
        }))
    }

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::function(
            "current_datetime",
            "Get the current date and time. Useful when you need to know the current time or date.",
            json!({
                "type": "object",
                "properties": {
                    "format_string": {
                        "type": "string",
                        "description": "Format string for the datetime (e.g., '%Y-%m-%d %H:%M:%S', '%A, %B %d, %Y'). Default is '%Y-%m-%d %H:%M:%S'."
                    }
                },
                "required": []
            }),
        )
    }
}
