//! Driver configuration: defaults, file loading, and the deprecation shim.

use std::path::Path;
use std::sync::Once;

use serde::Deserialize;

use crate::error::Result;
use crate::error::RlmError;

pub const DEFAULT_MAX_CALLS: u32 = 20;
pub const DEFAULT_MAX_DEPTH: u32 = 3;
pub const DEFAULT_TRUNCATE_LEN: usize = 5000;

/// Resolved driver settings.
#[derive(Clone, Debug)]
pub struct DriverConfig {
    /// Chat-completion calls allowed per agent before it is abandoned.
    pub max_calls_per_subagent: u32,
    /// Recursion depth at which `llm_query` stops spawning children.
    pub max_depth: u32,
    /// Tail length kept when execution output is fed back to the model.
    pub truncate_len: usize,
    /// Requested root model; the environment and preflight may override it.
    pub primary_agent: Option<String>,
    /// Requested model for recursive sub-agents.
    pub sub_agent: Option<String>,
    /// Global prompt-token cap across the whole agent tree.
    pub max_prompt_tokens: Option<u64>,
    /// Global completion-token cap across the whole agent tree.
    pub max_completion_tokens: Option<u64>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            max_calls_per_subagent: DEFAULT_MAX_CALLS,
            max_depth: DEFAULT_MAX_DEPTH,
            truncate_len: DEFAULT_TRUNCATE_LEN,
            primary_agent: None,
            sub_agent: None,
            max_prompt_tokens: None,
            max_completion_tokens: None,
        }
    }
}

/// On-disk shape: every recognized key optional, unknown keys rejected.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DriverConfigFile {
    pub max_calls_per_subagent: Option<u32>,
    pub max_depth: Option<u32>,
    pub truncate_len: Option<usize>,
    pub primary_agent: Option<String>,
    pub sub_agent: Option<String>,
    pub max_prompt_tokens: Option<u64>,
    pub max_completion_tokens: Option<u64>,
    /// Deprecated cost cap. Accepted so old configs keep loading, never read.
    pub max_money_spent: Option<toml::Value>,
}

static MONEY_DEPRECATION: Once = Once::new();

impl DriverConfig {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|err| RlmError::Config(format!("cannot read {}: {err}", path.display())))?;
        let file: DriverConfigFile = toml::from_str(&content)
            .map_err(|err| RlmError::Config(format!("cannot parse {}: {err}", path.display())))?;
        Ok(Self::from_file(file))
    }

    pub fn from_file(file: DriverConfigFile) -> Self {
        if file.max_money_spent.is_some() {
            MONEY_DEPRECATION.call_once(|| {
                tracing::warn!(
                    "max_money_spent is deprecated and ignored; set max_prompt_tokens / max_completion_tokens instead"
                );
            });
        }
        let defaults = Self::default();
        Self {
            max_calls_per_subagent: file
                .max_calls_per_subagent
                .filter(|value| *value > 0)
                .unwrap_or(defaults.max_calls_per_subagent),
            max_depth: file.max_depth.unwrap_or(defaults.max_depth),
            truncate_len: file
                .truncate_len
                .filter(|value| *value > 0)
                .unwrap_or(defaults.truncate_len),
            primary_agent: file.primary_agent,
            sub_agent: file.sub_agent,
            max_prompt_tokens: file.max_prompt_tokens.filter(|value| *value > 0),
            max_completion_tokens: file.max_completion_tokens.filter(|value| *value > 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = DriverConfig::default();
        assert_eq!(config.max_calls_per_subagent, 20);
        assert_eq!(config.max_depth, 3);
        assert_eq!(config.truncate_len, 5000);
        assert_eq!(config.max_prompt_tokens, None);
    }

    #[test]
    fn file_values_override_defaults() {
        let file: DriverConfigFile = toml::from_str(
            r#"
max_calls_per_subagent = 5
max_depth = 1
truncate_len = 1000
primary_agent = "gpt-5.1"
max_prompt_tokens = 200000
"#,
        )
        .unwrap();
        let config = DriverConfig::from_file(file);
        assert_eq!(config.max_calls_per_subagent, 5);
        assert_eq!(config.max_depth, 1);
        assert_eq!(config.truncate_len, 1000);
        assert_eq!(config.primary_agent.as_deref(), Some("gpt-5.1"));
        assert_eq!(config.max_prompt_tokens, Some(200_000));
    }

    #[test]
    fn zero_counts_fall_back_to_defaults() {
        let file: DriverConfigFile = toml::from_str(
            r#"
max_calls_per_subagent = 0
truncate_len = 0
max_prompt_tokens = 0
max_depth = 0
"#,
        )
        .unwrap();
        let config = DriverConfig::from_file(file);
        assert_eq!(config.max_calls_per_subagent, 20);
        assert_eq!(config.truncate_len, 5000);
        assert_eq!(config.max_prompt_tokens, None);
        // max_depth = 0 is a legal setting: recursion disabled.
        assert_eq!(config.max_depth, 0);
    }

    #[test]
    fn deprecated_money_cap_is_accepted_and_ignored() {
        let file: DriverConfigFile = toml::from_str("max_money_spent = 12.5").unwrap();
        let config = DriverConfig::from_file(file);
        assert_eq!(config.max_prompt_tokens, None);
        assert_eq!(config.max_completion_tokens, None);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<DriverConfigFile>("max_cost = 1").is_err());
    }
}
