//! Prompt construction for the ReAct loop.
//!
//! The prompt is an instruction block listing the tools and the output format, the task,
//! and a bounded trailing window of the conversation. It always ends with `Thought:` so
//! the model continues with its reasoning.

use crate::react::models::{Role, Task, Turn};
use crate::react::parser::{
    ACTION_INPUT_MARKER, ACTION_MARKER, FINAL_ANSWER_MARKER, OBSERVATION_MARKER, THOUGHT_MARKER,
};
use crate::tools::{ToolDescriptor, FINISH};

/// Format the available tools into a readable list.
pub fn format_available_tools(tools: &[ToolDescriptor]) -> String {
    let mut output = String::new();

    for descriptor in tools {
        output.push_str(&format!(
            "- {}: {}\n",
            descriptor.function.name, descriptor.function.description
        ));

        let Some(params) = descriptor.function.parameters.as_object() else {
            continue;
        };
        let Some(properties) = params.get("properties").and_then(|p| p.as_object()) else {
            continue;
        };
        if properties.is_empty() {
            continue;
        }

        let required: Vec<&str> = params
            .get("required")
            .and_then(|r| r.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();

        output.push_str("  Parameters:\n");
        for (param_name, param_info) in properties {
            let param_desc = param_info.get("description").and_then(|d| d.as_str()).unwrap_or("");
            let req_str = if required.contains(&param_name.as_str()) {
                " (required)"
            } else {
                " (optional)"
            };
            output.push_str(&format!("    - {}{}: {}\n", param_name, req_str, param_desc));
        }
    }

    output.push_str(&format!(
        "- {}: End the task and give the answer as the input.\n",
        FINISH
    ));
    output
}

/// The instruction block: role, tools and the exact output format.
pub fn system_prompt(tools: &[ToolDescriptor]) -> String {
    format!(
        "You are an efficient assistant that solves tasks step by step using tools.\n\
         \n\
         Tools available:\n\
         {tools}\
         \n\
         Use EXACTLY this format, one tool call per step:\n\
         {thought} <one line of reasoning>\n\
         {action} <tool name>\n\
         {action_input} {{\"param\": \"value\"}}\n\
         \n\
         Then stop and wait for the {observation} line.\n\
         \n\
         When the task is complete, reply with:\n\
         {final_answer} <the answer>\n\
         \n\
         Use the most direct tool. Do not ask questions.",
        tools = format_available_tools(tools),
        thought = THOUGHT_MARKER,
        action = ACTION_MARKER,
        action_input = ACTION_INPUT_MARKER,
        observation = OBSERVATION_MARKER,
        final_answer = FINAL_ANSWER_MARKER,
    )
}

/// Build the prompt for the next step from the task and a window of past turns.
///
/// Assistant turns are rendered verbatim after `Thought:`, mirroring how they were
/// generated.
pub fn build_prompt(system: &str, task: &Task, window: &[Turn]) -> String {
    let mut text = format!("<s>[INST] {} [/INST]\n[INST] {} [/INST]", system, task);

    for turn in window {
        match turn.role {
            Role::User => text.push_str(&format!("\n[INST] {} [/INST]", turn.text)),
            Role::Assistant => {
                text.push_str(&format!("\n{}{}", THOUGHT_MARKER, turn.text.trim_end()))
            }
            Role::Observation => {
                text.push_str(&format!("\n{} {}", OBSERVATION_MARKER, turn.text.trim()))
            }
        }
    }

    text.push('\n');
    text.push_str(THOUGHT_MARKER);
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::react::models::ConversationHistory;
    use crate::tools::{Tool, ToolDispatcher};

    #[test]
    fn test_format_available_tools_lists_parameters_and_finish() {
        let dispatcher = ToolDispatcher::with_builtins().unwrap();
        let formatted = format_available_tools(&dispatcher.descriptors());

        assert!(formatted.contains("- calculator: Evaluate an arithmetic expression"));
        assert!(formatted.contains("    - expr (required):"));
        assert!(formatted.contains("    - format_string (optional):"));
        assert!(formatted.ends_with("- finish: End the task and give the answer as the input.\n"));
    }

    #[test]
    fn test_format_available_tools_empty_registry() {
        let formatted = format_available_tools(&[]);
        assert_eq!(formatted, "- finish: End the task and give the answer as the input.\n");
    }

    #[test]
    fn test_system_prompt_describes_format() {
        let prompt = system_prompt(&[crate::tools::EchoTool.descriptor()]);

        assert!(prompt.contains("- echo:"));
        assert!(prompt.contains("Action Input: {\"param\": \"value\"}"));
        assert!(prompt.contains("Final Answer: <the answer>"));
    }

    #[test]
    fn test_build_prompt_without_history() {
        let prompt = build_prompt("SYSTEM", &Task::new("2+2"), &[]);

        assert_eq!(prompt, "<s>[INST] SYSTEM [/INST]\n[INST] 2+2 [/INST]\nThought:");
    }

    #[test]
    fn test_build_prompt_renders_window() {
        let mut history = ConversationHistory::new();
        history.push(Role::User, "2+2");
        history.push(Role::Assistant, " compute\nAction: calculator\nAction Input: {\"expr\":\"2+2\"}\n");
        history.push(Role::Observation, "4");

        let prompt = build_prompt("SYSTEM", &Task::new("2+2"), history.trailing_window(3));

        assert!(prompt.ends_with(
            "[INST] 2+2 [/INST]\nThought: compute\nAction: calculator\nAction Input: {\"expr\":\"2+2\"}\nObservation: 4\nThought:"
        ));
    }
}
