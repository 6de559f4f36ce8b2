use crate::error::{Result, StepwiseError};
use crate::tools::{string_arg, Tool, ToolDescriptor};
use serde_json::{json, Value};
use std::collections::HashMap;

/// Deepest nesting of parentheses and unary signs an expression may use.
const MAX_DEPTH: usize = 256;

/// Evaluates arithmetic with `+ - * /`, unary minus and parentheses.
///
/// Integral results are rendered without a fractional part, so `2+2` yields `"4"`.
#[derive(Debug, Default)]
pub struct CalculatorTool;

impl Tool for CalculatorTool {
    fn run(&self, args: &HashMap<String, Value>) -> Result<Value> {
        let expression = string_arg(args, &["expr", "expression", "input"]).ok_or_else(|| {
            StepwiseError::ToolError("Missing 'expr' argument".to_string())
        })?;

        let value = evaluate(expression)?;
        Ok(json!(format_number(value)))
    }

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::function(
            "calculator",
            "Evaluate an arithmetic expression using + - * / and parentheses.",
            json!({
                "type": "object",
                "properties": {
                    "expr": {"type": "string", "description": "The expression to evaluate, e.g. '(2+3)*4'"}
                },
                "required": ["expr"]
            }),
        )
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Evaluate an arithmetic expression.
pub fn evaluate(expression: &str) -> Result<f64> {
    let mut parser = Expression {
        chars: expression.chars().filter(|c| !c.is_whitespace()).collect(),
        pos: 0,
        depth: 0,
    };

    if parser.chars.is_empty() {
        return Err(StepwiseError::ToolError("Empty expression".to_string()));
    }

    let value = parser.sum()?;
    if let Some(c) = parser.peek() {
        return Err(StepwiseError::ToolError(format!(
            "Unexpected '{}' at position {}",
            c, parser.pos
        )));
    }
    if !value.is_finite() {
        return Err(StepwiseError::ToolError("Result is not a finite number".to_string()));
    }
    Ok(value)
}

struct Expression {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Expression {
    fn nested<F>(&mut self, parse: F) -> Result<f64>
    where
        F: FnOnce(&mut Self) -> Result<f64>,
    {
        if self.depth >= MAX_DEPTH {
            return Err(StepwiseError::ToolError("Expression nested too deeply".to_string()));
        }
        self.depth += 1;
        let value = parse(self);
        self.depth -= 1;
        value
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn sum(&mut self) -> Result<f64> {
        let mut value = self.product()?;
        while let Some(op) = self.peek().filter(|c| *c == '+' || *c == '-') {
            self.pos += 1;
            let rhs = self.product()?;
            value = if op == '+' { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn product(&mut self) -> Result<f64> {
        let mut value = self.unary()?;
        while let Some(op) = self.peek().filter(|c| *c == '*' || *c == '/') {
            self.pos += 1;
            let rhs = self.unary()?;
            if op == '/' {
                if rhs == 0.0 {
                    return Err(StepwiseError::ToolError("Division by zero".to_string()));
                }
                value /= rhs;
            } else {
                value *= rhs;
            }
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<f64> {
        match self.peek() {
            Some('-') => {
                self.pos += 1;
                Ok(-self.nested(Self::unary)?)
            }
            Some('+') => {
                self.pos += 1;
                self.nested(Self::unary)
            }
            _ => self.atom(),
        }
    }

    fn atom(&mut self) -> Result<f64> {
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let value = self.nested(Self::sum)?;
                if self.peek() != Some(')') {
                    return Err(StepwiseError::ToolError("Unbalanced parentheses".to_string()));
                }
                self.pos += 1;
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => {
                let start = self.pos;
                while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '.') {
                    self.pos += 1;
                }
                let literal: String = self.chars[start..self.pos].iter().collect();
                literal
                    .parse::<f64>()
                    .map_err(|_| StepwiseError::ToolError(format!("Invalid number '{}'", literal)))
            }
            Some(c) => Err(StepwiseError::ToolError(format!(
                "Unexpected '{}' at position {}",
                c, self.pos
            ))),
            None => Err(StepwiseError::ToolError("Unexpected end of expression".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calc(expr: &str) -> Result<Value> {
        let mut args = HashMap::new();
        args.insert("expr".to_string(), json!(expr));
        CalculatorTool.run(&args)
    }

    #[test]
    fn test_addition() {
        assert_eq!(calc("2+2").unwrap(), json!("4"));
    }

    #[test]
    fn test_precedence_and_parentheses() {
        assert_eq!(evaluate("2 + 3 * 4").unwrap(), 14.0);
        assert_eq!(evaluate("(2 + 3) * 4").unwrap(), 20.0);
        assert_eq!(evaluate("-(1 - 4) / 2").unwrap(), 1.5);
    }

    #[test]
    fn test_fractional_result() {
        assert_eq!(calc("7/2").unwrap(), json!("3.5"));
    }

    #[test]
    fn test_alternate_argument_names() {
        let mut args = HashMap::new();
        args.insert("input".to_string(), json!("10 - 3"));
        assert_eq!(CalculatorTool.run(&args).unwrap(), json!("7"));
    }

    #[test]
    fn test_division_by_zero() {
        let err = calc("1/0").unwrap_err();
        assert!(err.to_string().contains("Division by zero"));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(calc("2 + x").is_err());
        assert!(calc("(1 + 2").is_err());
        assert!(calc("").is_err());
        assert!(calc("1..2").is_err());
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let expr = format!("{}1+1{}", "(".repeat(200_000), ")".repeat(200_000));
        let err = calc(&expr).unwrap_err();
        assert!(err.to_string().contains("nested too deeply"));

        let signs = format!("{}1", "-".repeat(200_000));
        assert!(calc(&signs).is_err());
    }

    #[test]
    fn test_moderate_nesting_is_allowed() {
        let expr = format!("{}2*3{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(calc(&expr).unwrap(), json!("6"));
    }

    #[test]
    fn test_missing_argument() {
        assert!(CalculatorTool.run(&HashMap::new()).is_err());
    }
}
