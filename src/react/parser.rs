//! Incremental parser for Thought / Action / Final Answer output.
//!
//! Tokens are fed as they stream in. The parser moves through three phases:
//!
//! - `Thinking`: text is reasoning, forwarded as thought deltas. `Action:` switches to
//!   `Action`; `Final Answer:` switches to `Done` and everything after it is the answer.
//! - `Action`: after every token the text following the marker is scanned for a balanced
//!   JSON object. An object that does not parse yet only means more tokens are needed.
//!   The first object that parses becomes the action.
//! - `Done`: tokens are still recorded so the raw output stays complete, but nothing else
//!   is extracted.
//!
//! [`ReActParser::finish`] settles the turn at end of stream, including the fallbacks for
//! string action inputs, JSON-shaped replies and marker-free answers.

use crate::react::models::ActionDirective;
use serde_json::Value;

pub const THOUGHT_MARKER: &str = "Thought:";
pub const ACTION_MARKER: &str = "Action:";
pub const ACTION_INPUT_MARKER: &str = "Action Input:";
pub const FINAL_ANSWER_MARKER: &str = "Final Answer:";
pub const OBSERVATION_MARKER: &str = "Observation:";

const PHASE_MARKERS: [&str; 2] = [ACTION_MARKER, FINAL_ANSWER_MARKER];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Thinking,
    Action,
    Done,
}

/// Emitted while tokens are fed
#[derive(Debug, Clone, PartialEq)]
pub enum ParseEvent {
    ThoughtDelta(String),
    /// The first complete action of the turn. The name is not normalized yet.
    Action(ActionDirective),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    FinalAnswer(String),
    Action(ActionDirective),
    /// Neither a usable action nor an answer; carries the reason.
    ParseFailure(String),
}

/// Everything extracted from one model turn
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTurn {
    pub thought: String,
    /// The model output exactly as received.
    pub raw: String,
    pub outcome: TurnOutcome,
}

#[derive(Debug, Clone)]
pub struct ReActParser {
    buffer: String,
    phase: Phase,
    implicit_answer_min_len: usize,
    /// Bytes of `buffer` already forwarded as thought deltas.
    emitted: usize,
    thought_end: Option<usize>,
    action_start: usize,
    /// Where the next search for an opening brace starts.
    scan_from: usize,
    answer_start: Option<usize>,
    action: Option<ActionDirective>,
}

impl ReActParser {
    /// `implicit_answer_min_len`: marker-free output at least this many characters long
    /// (after trimming) is taken as the final answer.
    pub fn new(implicit_answer_min_len: usize) -> Self {
        Self {
            buffer: String::new(),
            phase: Phase::Thinking,
            implicit_answer_min_len,
            emitted: 0,
            thought_end: None,
            action_start: 0,
            scan_from: 0,
            answer_start: None,
            action: None,
        }
    }

    /// Parse a complete response in one go.
    pub fn parse(text: &str, implicit_answer_min_len: usize) -> ParsedTurn {
        let mut parser = Self::new(implicit_answer_min_len);
        parser.feed(text);
        parser.finish()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn raw(&self) -> &str {
        &self.buffer
    }

    /// Discard everything received so far.
    pub fn reset(&mut self) {
        *self = Self::new(self.implicit_answer_min_len);
    }

    pub fn feed(&mut self, token: &str) -> Vec<ParseEvent> {
        self.buffer.push_str(token);

        let mut events = Vec::new();
        if self.phase == Phase::Thinking {
            self.advance_thinking(&mut events);
        }
        if self.phase == Phase::Action {
            self.advance_action(&mut events);
        }
        events
    }

    fn advance_thinking(&mut self, events: &mut Vec<ParseEvent>) {
        let pending = &self.buffer[self.emitted..];
        let marker = PHASE_MARKERS
            .iter()
            .filter_map(|marker| pending.find(marker).map(|at| (at, *marker)))
            .min_by_key(|(at, _)| *at);

        match marker {
            Some((at, marker)) => {
                let at = self.emitted + at;
                self.emit_thought(at, events);
                self.thought_end = Some(at);

                if marker == ACTION_MARKER {
                    self.action_start = at + marker.len();
                    self.scan_from = self.action_start;
                    self.phase = Phase::Action;
                } else {
                    self.answer_start = Some(at + marker.len());
                    self.phase = Phase::Done;
                }
            }
            None => {
                let safe_end = self.buffer.len() - self.partial_marker_len();
                self.emit_thought(safe_end, events);
            }
        }
    }

    fn emit_thought(&mut self, end: usize, events: &mut Vec<ParseEvent>) {
        if end > self.emitted {
            events.push(ParseEvent::ThoughtDelta(self.buffer[self.emitted..end].to_string()));
            self.emitted = end;
        }
    }

    /// Length of the longest buffer suffix that could still grow into a phase marker.
    fn partial_marker_len(&self) -> usize {
        let available = self.buffer.len() - self.emitted;
        PHASE_MARKERS
            .into_iter()
            .flat_map(|marker| (1..marker.len()).map(move |k| &marker[..k]))
            .filter(|prefix| self.buffer.ends_with(prefix))
            .map(str::len)
            .max()
            .unwrap_or(0)
            .min(available)
    }

    fn advance_action(&mut self, events: &mut Vec<ParseEvent>) {
        while let Some(offset) = self.buffer[self.scan_from..].find('{') {
            let open = self.scan_from + offset;
            let Some(len) = balanced_object_len(&self.buffer[open..]) else {
                // Not closed yet; rescan from this brace on the next token.
                self.scan_from = open;
                return;
            };

            match serde_json::from_str::<Value>(&self.buffer[open..open + len]) {
                Ok(input @ Value::Object(_)) => {
                    let name = self.action_name(open);
                    let directive = ActionDirective::new(name, input);
                    events.push(ParseEvent::Action(directive.clone()));
                    self.action = Some(directive);
                    self.phase = Phase::Done;
                    return;
                }
                _ => self.scan_from = open + 1,
            }
        }
        self.scan_from = self.buffer.len();
    }

    /// Tool name between the action marker and `end`.
    fn action_name(&self, end: usize) -> String {
        let segment = &self.buffer[self.action_start..end];
        let segment = match segment.find(ACTION_INPUT_MARKER) {
            Some(at) => &segment[..at],
            None => segment,
        };
        clean_name(segment)
    }

    fn thought_text(&self) -> String {
        let end = self.thought_end.unwrap_or(self.buffer.len());
        strip_thought_marker(&self.buffer[..end])
    }

    /// Settle the turn at end of stream.
    pub fn finish(self) -> ParsedTurn {
        let thought = self.thought_text();

        let (thought, outcome) = match self.phase {
            Phase::Done => match (&self.action, self.answer_start) {
                (Some(action), _) => (thought, TurnOutcome::Action(action.clone())),
                (None, Some(start)) => (
                    thought,
                    TurnOutcome::FinalAnswer(self.buffer[start..].trim().to_string()),
                ),
                (None, None) => (
                    thought,
                    TurnOutcome::ParseFailure("No Action or Final Answer found".to_string()),
                ),
            },
            Phase::Action => (thought, self.settle_unstructured_action()),
            Phase::Thinking => match json_shaped_turn(&self.buffer) {
                Some((json_thought, directive)) => (json_thought, TurnOutcome::Action(directive)),
                None if thought.chars().count() >= self.implicit_answer_min_len => {
                    let answer = thought.clone();
                    (thought, TurnOutcome::FinalAnswer(answer))
                }
                None => (
                    thought,
                    TurnOutcome::ParseFailure(
                        "No Action or Final Answer found in the response".to_string(),
                    ),
                ),
            },
        };

        ParsedTurn {
            thought,
            raw: self.buffer,
            outcome,
        }
    }

    /// An action whose input never formed a JSON object: accept a plain-text or scalar
    /// JSON input, reject a broken object.
    fn settle_unstructured_action(&self) -> TurnOutcome {
        let section = &self.buffer[self.action_start..];
        let Some(at) = section.find(ACTION_INPUT_MARKER) else {
            return TurnOutcome::ParseFailure("Action is missing an Action Input".to_string());
        };

        let name = clean_name(&section[..at]);
        if name.is_empty() {
            return TurnOutcome::ParseFailure("Action is missing a tool name".to_string());
        }

        let input = cut_at_marker(&section[at + ACTION_INPUT_MARKER.len()..]).trim();
        if input.starts_with('{') {
            return TurnOutcome::ParseFailure(
                "Action Input is not a complete JSON object".to_string(),
            );
        }

        let input = if input.is_empty() {
            Value::Null
        } else {
            serde_json::from_str::<Value>(input).unwrap_or_else(|_| Value::String(input.to_string()))
        };
        TurnOutcome::Action(ActionDirective::new(name, input))
    }
}

/// Byte length of the JSON object starting at the first byte of `text` (which must be
/// `{`), or `None` while its braces are unbalanced. Braces inside strings are ignored.
pub fn balanced_object_len(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// First non-empty line, without quotes, backticks or a trailing `()`.
fn clean_name(segment: &str) -> String {
    segment
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`')
        .trim_end_matches("()")
        .trim()
        .to_string()
}

fn strip_thought_marker(text: &str) -> String {
    let text = text.trim();
    text.strip_prefix(THOUGHT_MARKER).unwrap_or(text).trim().to_string()
}

/// Text up to the first marker line that starts a new section.
fn cut_at_marker(text: &str) -> &str {
    [THOUGHT_MARKER, ACTION_MARKER, OBSERVATION_MARKER, FINAL_ANSWER_MARKER]
        .iter()
        .filter_map(|marker| text.find(&format!("\n{}", marker)))
        .min()
        .map_or(text, |at| &text[..at])
}

/// Recognize a reply in the `{"thought": ..., "action": {"name": ..., "input": ...}}`
/// shape.
fn json_shaped_turn(buffer: &str) -> Option<(String, ActionDirective)> {
    let text = buffer.trim_start();
    let text = text.strip_prefix(THOUGHT_MARKER).unwrap_or(text).trim_start();
    if !text.starts_with('{') {
        return None;
    }

    let len = balanced_object_len(text)?;
    let value: Value = serde_json::from_str(&text[..len]).ok()?;
    let action = value.get("action")?.as_object()?;
    let name = action.get("name")?.as_str()?;
    let input = action.get("input").cloned().unwrap_or(Value::Null);
    let thought = value.get("thought").and_then(|t| t.as_str()).unwrap_or_default();

    Some((thought.trim().to_string(), ActionDirective::new(name.trim(), input)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn feed_all(parser: &mut ReActParser, tokens: &[&str]) -> Vec<ParseEvent> {
        tokens.iter().flat_map(|t| parser.feed(t)).collect()
    }

    fn actions(events: &[ParseEvent]) -> Vec<ActionDirective> {
        events
            .iter()
            .filter_map(|e| match e {
                ParseEvent::Action(a) => Some(a.clone()),
                _ => None,
            })
            .collect()
    }

    fn thought_deltas(events: &[ParseEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                ParseEvent::ThoughtDelta(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_final_answer_in_one_token() {
        let turn = ReActParser::parse(" I know this.\nFinal Answer: 4", 20);

        assert_eq!(turn.outcome, TurnOutcome::FinalAnswer("4".to_string()));
        assert_eq!(turn.thought, "I know this.");
    }

    #[test]
    fn test_final_answer_marker_split_across_tokens() {
        let mut parser = ReActParser::new(20);
        let events = feed_all(&mut parser, &[" Easy.\nFinal An", "swer:", " 4 is", " the answer\n"]);

        assert_eq!(parser.phase(), Phase::Done);
        assert_eq!(thought_deltas(&events), " Easy.\n");
        assert_eq!(
            parser.finish().outcome,
            TurnOutcome::FinalAnswer("4 is the answer".to_string())
        );
    }

    #[test]
    fn test_action_json_split_across_tokens_detected_once() {
        let mut parser = ReActParser::new(20);
        let tokens = [
            " compute\n",
            "Action: calcu",
            "lator\nAction Input: {\"ex",
            "pr\": \"2+",
            "2\"}",
            "\nThought: and more {\"x\": 1}",
        ];

        let mut per_token = Vec::new();
        for token in tokens {
            per_token.push(actions(&parser.feed(token)).len());
        }

        assert_eq!(per_token, vec![0, 0, 0, 0, 1, 0]);
        assert_eq!(parser.phase(), Phase::Done);

        let turn = parser.finish();
        assert_eq!(turn.thought, "compute");
        assert_eq!(
            turn.outcome,
            TurnOutcome::Action(ActionDirective::new("calculator", json!({"expr": "2+2"})))
        );
        assert!(turn.raw.ends_with("and more {\"x\": 1}"));
    }

    #[test]
    fn test_first_action_wins() {
        let turn = ReActParser::parse(
            "Action: echo\nAction Input: {\"text\": \"one\"}\nAction: echo\nAction Input: {\"text\": \"two\"}",
            20,
        );

        assert_eq!(
            turn.outcome,
            TurnOutcome::Action(ActionDirective::new("echo", json!({"text": "one"})))
        );
        assert!(turn.raw.contains("two"));
    }

    #[test]
    fn test_braces_inside_strings() {
        let turn = ReActParser::parse("Action: echo\nAction Input: {\"text\": \"a } b {\"}", 20);
        assert_eq!(
            turn.outcome,
            TurnOutcome::Action(ActionDirective::new("echo", json!({"text": "a } b {"})))
        );
    }

    #[test]
    fn test_final_answer_after_action_is_ignored() {
        let turn = ReActParser::parse(
            "Action: echo\nAction Input: {\"text\": \"x\"}\nFinal Answer: done",
            20,
        );
        assert!(matches!(turn.outcome, TurnOutcome::Action(_)));
    }

    #[test]
    fn test_thought_deltas_hold_back_partial_marker() {
        let mut parser = ReActParser::new(20);

        let first = parser.feed(" I will act. Act");
        assert_eq!(thought_deltas(&first), " I will act. ");

        let second = parser.feed("ually no.");
        assert_eq!(thought_deltas(&second), "Actually no.");

        let third = parser.feed(" Action: echo");
        assert_eq!(thought_deltas(&third), " ");
        assert_eq!(parser.phase(), Phase::Action);
    }

    #[test]
    fn test_multibyte_thought() {
        let mut parser = ReActParser::new(20);
        let events = feed_all(&mut parser, &[" café ☕ F", "inal Answer: ok"]);

        assert_eq!(thought_deltas(&events), " café ☕ ");
        assert_eq!(parser.finish().outcome, TurnOutcome::FinalAnswer("ok".to_string()));
    }

    #[test]
    fn test_truncated_json_is_parse_failure() {
        let turn = ReActParser::parse("Action: calculator\nAction Input: {\"expr\": \"2+", 20);
        assert!(matches!(turn.outcome, TurnOutcome::ParseFailure(_)));
    }

    #[test]
    fn test_invalid_balanced_json_keeps_scanning() {
        let turn = ReActParser::parse("Action: echo\nAction Input: {oops} {\"text\": \"ok\"}", 20);
        assert_eq!(
            turn.outcome,
            TurnOutcome::Action(ActionDirective::new("echo", json!({"text": "ok"})))
        );
    }

    #[test]
    fn test_plain_text_action_input() {
        let turn = ReActParser::parse("Action: echo\nAction Input: hello world\n", 20);
        assert_eq!(
            turn.outcome,
            TurnOutcome::Action(ActionDirective::new("echo", json!("hello world")))
        );
    }

    #[test]
    fn test_finish_with_quoted_input() {
        let turn = ReActParser::parse("Action: finish\nAction Input: \"Paris\"", 20);
        assert_eq!(
            turn.outcome,
            TurnOutcome::Action(ActionDirective::new("finish", json!("Paris")))
        );
    }

    #[test]
    fn test_action_without_input_is_parse_failure() {
        let turn = ReActParser::parse("Action: echo", 20);
        assert!(matches!(turn.outcome, TurnOutcome::ParseFailure(_)));
    }

    #[test]
    fn test_implicit_answer() {
        let turn = ReActParser::parse(" The capital of France is Paris.", 20);
        assert_eq!(
            turn.outcome,
            TurnOutcome::FinalAnswer("The capital of France is Paris.".to_string())
        );
    }

    #[test]
    fn test_short_unmarked_output_is_parse_failure() {
        let turn = ReActParser::parse(" hmm", 20);

        assert!(matches!(turn.outcome, TurnOutcome::ParseFailure(_)));
        assert_eq!(turn.thought, "hmm");
    }

    #[test]
    fn test_json_shaped_reply() {
        let turn = ReActParser::parse(
            r#" {"thought": "add them", "action": {"name": "add_numbers", "input": "[1, 2]"}}"#,
            20,
        );

        assert_eq!(turn.thought, "add them");
        assert_eq!(
            turn.outcome,
            TurnOutcome::Action(ActionDirective::new("add_numbers", json!("[1, 2]")))
        );
    }

    #[test]
    fn test_reset_discards_partial_output() {
        let mut parser = ReActParser::new(20);
        parser.feed("Action: echo\nAction Input: {\"te");
        parser.reset();

        assert_eq!(parser.phase(), Phase::Thinking);
        assert_eq!(parser.raw(), "");

        parser.feed(" Final Answer: fresh");
        assert_eq!(parser.finish().outcome, TurnOutcome::FinalAnswer("fresh".to_string()));
    }

    #[test]
    fn test_balanced_object_len() {
        assert_eq!(balanced_object_len("{}"), Some(2));
        assert_eq!(balanced_object_len(r#"{"a": {"b": "}"}} tail"#), Some(17));
        assert_eq!(balanced_object_len(r#"{"a": "\"}"#), None);
        assert_eq!(balanced_object_len("{\"a\": 1"), None);
    }
}
