use crate::error::{Result, StepwiseError};
use crate::tools::{string_arg, Tool, ToolDescriptor};
use regex::Regex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::LazyLock;

static INTEGER: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"-?\d+"));

/// Sums integers given as a JSON list (`[4, 7]`) or mentioned in free text (`add 4 and 7`).
#[derive(Debug, Default)]
pub struct AddNumbersTool;

impl AddNumbersTool {
    fn sum_list(values: &[Value], raw: &str) -> Result<i64> {
        values.iter().try_fold(0i64, |acc, value| {
            let n = match value {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.trim().parse::<i64>().ok(),
                _ => None,
            };
            n.map(|n| acc.saturating_add(n)).ok_or_else(|| invalid(raw))
        })
    }

    fn sum_text(text: &str) -> Result<i64> {
        let integers = INTEGER
            .as_ref()
            .map_err(|e| StepwiseError::ToolError(format!("Invalid number pattern: {}", e)))?;

        let total = integers.find_iter(text).try_fold(0i64, |acc, m| {
            m.as_str().parse::<i64>().map(|n| acc.saturating_add(n)).map_err(|_| invalid(text))
        })?;
        Ok(total)
    }
}

fn invalid(raw: &str) -> StepwiseError {
    StepwiseError::ToolError(format!("Invalid input for add_numbers: {}", raw))
}

impl Tool for AddNumbersTool {
    fn run(&self, args: &HashMap<String, Value>) -> Result<Value> {
        if let Some(Value::Array(values)) = args.get("numbers") {
            return Ok(json!(Self::sum_list(values, &Value::Array(values.clone()).to_string())?));
        }

        let text = string_arg(args, &["numbers", "text", "input"]).unwrap_or_default();
        let total = if text.trim_start().starts_with('[') {
            let values: Vec<Value> = serde_json::from_str(text).map_err(|_| invalid(text))?;
            Self::sum_list(&values, text)?
        } else {
            Self::sum_text(text)?
        };

        Ok(json!(total))
    }

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::function(
            "add_numbers",
            "Add integers together. Accepts a JSON list like [4, 7] or text like 'add 4 and 7'.",
            json!({
                "type": "object",
                "properties": {
                    "numbers": {
                        "type": "string",
                        "description": "A JSON list of integers or text mentioning the integers to add"
                    }
                },
                "required": ["numbers"]
            }),
        )
    }
}
