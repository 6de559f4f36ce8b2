//! Fast-path routing for trivial inputs.
//!
//! The router answers small talk from a table of canned replies and maps common command
//! phrasings straight to a tool call, skipping inference. It is only a latency shortcut:
//! an engine without a router, or a router that matches nothing, behaves the same apart
//! from speed.

use crate::error::{Result, StepwiseError};
use crate::tools::dispatcher::object_input;
use regex::{Captures, Regex};
use serde_json::{json, Value};
use std::fmt;
use tracing::{debug, info};

const ACKNOWLEDGMENT_REPLY: &str = "Got it. Let me know if you need anything else.";

/// Where the router sends an input
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Reply with this text; no tool, no inference.
    Instant(String),
    /// Invoke this tool directly.
    Tool { name: String, params: Value },
}

type RouteHandler = dyn Fn(&Captures<'_>) -> Option<(String, Value)> + Send + Sync;

/// Ordered pattern table consulted before the orchestration loop.
#[derive(Default)]
pub struct FastRouter {
    acknowledgments: Vec<Regex>,
    instant: Vec<(Regex, String)>,
    patterns: Vec<(Regex, Box<RouteHandler>)>,
}

impl FastRouter {
    /// A router that matches nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Greetings, acknowledgments, and direct routes for the built-in tools.
    pub fn standard() -> Result<Self> {
        let mut router = Self::empty();

        router.add_acknowledgment(
            r"^(ok|okay|cool|nice|great|awesome|perfect|yes|yeah|yep|no|nope|nah|lol|haha|hehe)[\s!.]*$",
        )?;

        router.add_instant(
            r"^(hi|hello|hey|yo|greetings)[\s!.]*$",
            "Hello! How can I help you today?",
        )?;
        router.add_instant(
            r"^(good morning|morning)[\s!.]*$",
            "Good morning! What can I help with?",
        )?;
        router.add_instant(
            r"^(good evening|evening)[\s!.]*$",
            "Good evening! How can I help you?",
        )?;
        router.add_instant(
            r"^(how are you|how're you|hows it going|how's it going|what's up|whats up)[\s?!.]*$",
            "Running smoothly and ready to help. What do you need?",
        )?;
        router.add_instant(
            r"^(thanks|thank you|thx|ty)[\s!.]*$",
            "You're welcome! Happy to help.",
        )?;
        router.add_instant(
            r"^(bye|goodbye|see you|cya)[\s!.]*$",
            "Goodbye! Feel free to come back anytime.",
        )?;
        router.add_instant(
            r"^(help|what can you do|capabilities)[\s?!.]*$",
            "I work through tasks step by step and use tools along the way: \
             arithmetic, adding numbers, echoing text and telling the time. \
             Just tell me what you need!",
        )?;

        router.add_pattern(r"^echo\s+(.+)$", |caps| {
            let text = caps.get(1)?.as_str().trim();
            Some(("echo".to_string(), json!({ "text": text })))
        })?;

        router.add_pattern(
            r"^(?:what\s+is|what's|calculate|compute|evaluate)\s+([\d\s+\-*/().]+?)\s*\??$",
            |caps| {
                let expr = caps.get(1)?.as_str().trim();
                let has_operator = expr.chars().any(|c| "+-*/".contains(c));
                let has_digit = expr.chars().any(|c| c.is_ascii_digit());
                (has_operator && has_digit)
                    .then(|| ("calculator".to_string(), object_input([("expr", json!(expr))])))
            },
        )?;

        router.add_pattern(
            r"^(?:add|sum)\s+(-?\d+(?:\s*(?:,|and|\+)\s*-?\d+)+)[\s.!?]*$",
            |caps| {
                let numbers = caps.get(1)?.as_str().trim();
                Some(("add_numbers".to_string(), json!({ "numbers": numbers })))
            },
        )?;

        router.add_pattern(
            r"^(?:(?:what(?:'s|\s+is)\s+the|tell\s+me\s+the)\s+)?(?:current\s+)?(?:time|date)(?:\s+(?:now|today|please))?[\s?!.]*$",
            |_| Some(("current_datetime".to_string(), json!({}))),
        )?;
        router.add_pattern(r"^what\s+time\s+is\s+it(?:\s+now)?[\s?!.]*$", |_| {
            Some(("current_datetime".to_string(), json!({})))
        })?;

        Ok(router)
    }

    /// Inputs matching `pattern` are treated as acknowledgments.
    pub fn add_acknowledgment(&mut self, pattern: &str) -> Result<()> {
        self.acknowledgments.push(compile(pattern)?);
        Ok(())
    }

    /// Inputs matching `pattern` get `response` as an instant answer.
    pub fn add_instant(&mut self, pattern: &str, response: impl Into<String>) -> Result<()> {
        self.instant.push((compile(pattern)?, response.into()));
        Ok(())
    }

    /// Inputs matching `pattern` are handed to `handler`, which may produce a tool call.
    /// Patterns are tried in registration order.
    pub fn add_pattern<F>(&mut self, pattern: &str, handler: F) -> Result<()>
    where
        F: Fn(&Captures<'_>) -> Option<(String, Value)> + Send + Sync + 'static,
    {
        self.patterns.push((compile(pattern)?, Box::new(handler)));
        Ok(())
    }

    fn is_acknowledgment(&self, text: &str) -> bool {
        self.acknowledgments.iter().any(|re| re.is_match(text))
    }

    fn instant_response(&self, text: &str) -> Option<&str> {
        self.instant
            .iter()
            .find(|(re, _)| re.is_match(text))
            .map(|(_, response)| response.as_str())
    }

    fn tool_route(&self, text: &str) -> Option<(String, Value)> {
        self.patterns
            .iter()
            .find_map(|(re, handler)| re.captures(text).and_then(|caps| handler(&caps)))
    }

    /// Cheap check whether `text` has to go to the model. Acknowledgments are settled
    /// before the pattern table is consulted.
    pub fn needs_inference(&self, text: &str) -> bool {
        let text = text.trim();
        if self.is_acknowledgment(text) {
            return false;
        }
        self.instant_response(text).is_none() && self.tool_route(text).is_none()
    }

    /// Resolve `text` to an instant answer or a direct tool call, or `None` to escalate.
    pub fn route(&self, text: &str) -> Option<Route> {
        let text = text.trim();

        if self.is_acknowledgment(text) {
            debug!("Fast path: acknowledgment");
            return Some(Route::Instant(ACKNOWLEDGMENT_REPLY.to_string()));
        }
        if let Some(response) = self.instant_response(text) {
            debug!("Fast path: instant response");
            return Some(Route::Instant(response.to_string()));
        }

        let (name, params) = self.tool_route(text)?;
        info!(tool = %name, "Fast path: direct tool route");
        Some(Route::Tool { name, params })
    }
}

impl fmt::Debug for FastRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FastRouter")
            .field("acknowledgments", &self.acknowledgments.len())
            .field("instant", &self.instant.len())
            .field("patterns", &self.patterns.len())
            .finish()
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("(?i){}", pattern))
        .map_err(|e| StepwiseError::ConfigError(format!("Invalid route pattern: {}", e)))
}
