//! Engine configuration.
//!
//! [`EngineConfig::default`] holds the built-in values. [`EngineConfig::from_env`] starts
//! from those and applies any `STEPWISE_*` environment overrides.

use crate::error::{Result, StepwiseError};
use crate::llm::gateway::CompletionConfig;
use std::str::FromStr;

/// Knobs for the orchestration loop, prompt construction and generation
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Hard cap on think/act/observe cycles per run.
    pub max_steps: usize,
    /// Number of trailing steps rendered into each prompt.
    pub history_window: usize,
    pub max_tokens: u32,
    pub temperature: f32,
    pub stop: Vec<String>,
    /// Marker-free output at least this long (trimmed) is taken as the final answer.
    pub implicit_answer_min_len: usize,
    /// Stream tokens through the parser, or send one blocking prediction per step.
    pub streaming: bool,
    pub default_gpu_layers: u32,
    /// Load the model before the first request when the session is not loaded.
    pub auto_load: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let completion = CompletionConfig::default();
        Self {
            max_steps: 10,
            history_window: 3,
            max_tokens: completion.max_tokens,
            temperature: completion.temperature,
            stop: completion.stop,
            implicit_answer_min_len: 20,
            streaming: true,
            default_gpu_layers: 99,
            auto_load: true,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `STEPWISE_MAX_STEPS`, `STEPWISE_HISTORY_WINDOW`,
    /// `STEPWISE_MAX_TOKENS`, `STEPWISE_TEMPERATURE`, `STEPWISE_GPU_LAYERS` and
    /// `STEPWISE_STREAMING`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), reading values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_var(&lookup, "STEPWISE_MAX_STEPS")? {
            config.max_steps = v;
        }
        if let Some(v) = parse_var(&lookup, "STEPWISE_HISTORY_WINDOW")? {
            config.history_window = v;
        }
        if let Some(v) = parse_var(&lookup, "STEPWISE_MAX_TOKENS")? {
            config.max_tokens = v;
        }
        if let Some(v) = parse_var(&lookup, "STEPWISE_TEMPERATURE")? {
            config.temperature = v;
        }
        if let Some(v) = parse_var(&lookup, "STEPWISE_GPU_LAYERS")? {
            config.default_gpu_layers = v;
        }
        if let Some(raw) = lookup("STEPWISE_STREAMING") {
            config.streaming = parse_bool("STEPWISE_STREAMING", &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_steps == 0 {
            return Err(StepwiseError::ConfigError("max_steps must be at least 1".to_string()));
        }
        if self.max_tokens == 0 {
            return Err(StepwiseError::ConfigError("max_tokens must be at least 1".to_string()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(StepwiseError::ConfigError(format!(
                "temperature must be within 0.0..=2.0, got {}",
                self.temperature
            )));
        }
        Ok(())
    }

    /// Generation parameters for one inference request.
    pub fn completion(&self) -> CompletionConfig {
        CompletionConfig {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stop: self.stop.clone(),
        }
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| StepwiseError::ConfigError(format!("{}={:?}: {}", key, raw, e))),
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(StepwiseError::ConfigError(format!(
            "{}={:?}: expected a boolean",
            key, raw
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();

        assert_eq!(config.max_steps, 10);
        assert_eq!(config.history_window, 3);
        assert_eq!(config.max_tokens, 1024);
        assert_eq!(config.stop, vec!["</s>", "[INST]", "Observation:"]);
        assert_eq!(config.implicit_answer_min_len, 20);
        assert_eq!(config.default_gpu_layers, 99);
        assert!(config.streaming);
        assert!(config.auto_load);
    }

    #[test]
    fn test_no_overrides_is_default() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_overrides() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("STEPWISE_MAX_STEPS", "4"),
            ("STEPWISE_HISTORY_WINDOW", " 5 "),
            ("STEPWISE_TEMPERATURE", "0.7"),
            ("STEPWISE_GPU_LAYERS", "0"),
            ("STEPWISE_STREAMING", "off"),
        ]))
        .unwrap();

        assert_eq!(config.max_steps, 4);
        assert_eq!(config.history_window, 5);
        assert!((config.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.default_gpu_layers, 0);
        assert!(!config.streaming);
    }

    #[test]
    fn test_invalid_number_is_config_error() {
        let result = EngineConfig::from_lookup(lookup(&[("STEPWISE_MAX_STEPS", "ten")]));

        match result {
            Err(StepwiseError::ConfigError(message)) => {
                assert!(message.contains("STEPWISE_MAX_STEPS"))
            }
            other => panic!("Expected ConfigError, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_bool_is_config_error() {
        let result = EngineConfig::from_lookup(lookup(&[("STEPWISE_STREAMING", "maybe")]));
        assert!(matches!(result, Err(StepwiseError::ConfigError(_))));
    }

    #[test]
    fn test_zero_steps_rejected() {
        let result = EngineConfig::from_lookup(lookup(&[("STEPWISE_MAX_STEPS", "0")]));
        assert!(matches!(result, Err(StepwiseError::ConfigError(_))));
    }

    #[test]
    fn test_completion_config() {
        let config = EngineConfig {
            max_tokens: 64,
            ..Default::default()
        };
        let completion = config.completion();

        assert_eq!(completion.max_tokens, 64);
        assert_eq!(completion.stop, config.stop);
    }
}
