//! Canonical token accounting records and provider usage normalization.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::error::RlmError;

/// Canonical per-call usage shape.
///
/// Every provider-reported usage record is collapsed into this before it is
/// tracked or logged. All token counts are non-negative; `cost` defaults to 0
/// when the provider does not report one.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub cached_tokens: u64,
    #[serde(default)]
    pub reasoning_tokens: u64,
    #[serde(default)]
    pub cost: f64,
}

impl Usage {
    /// Add another record field-wise.
    pub fn absorb(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
        self.cached_tokens += other.cached_tokens;
        self.reasoning_tokens += other.reasoning_tokens;
        self.cost += other.cost;
    }
}

/// Collapse a provider usage object into the canonical [`Usage`] shape.
///
/// Understands both the flat OpenAI layout (`prompt_tokens`,
/// `completion_tokens`, nested `*_tokens_details`) and the Gemini-style
/// `usageMetadata` layout. Any field that is not a finite number greater than
/// zero is coerced to 0; a missing or zero `total_tokens` falls back to
/// `prompt + completion`. Fails only when the input is not an object.
pub fn normalize_usage(value: &Value) -> Result<Usage> {
    let Some(record) = value.as_object() else {
        return Err(RlmError::InvalidUsage(format!(
            "expected an object, got {}",
            type_name(value)
        )));
    };

    if let Some(metadata) = record.get("usageMetadata").and_then(Value::as_object) {
        let prompt_tokens = count(metadata.get("promptTokenCount"));
        let completion_tokens = count(metadata.get("candidatesTokenCount"));
        let total_tokens = match count(metadata.get("totalTokenCount")) {
            0 => prompt_tokens + completion_tokens,
            total => total,
        };
        return Ok(Usage {
            prompt_tokens,
            completion_tokens,
            total_tokens,
            ..Usage::default()
        });
    }

    let prompt_tokens = count(record.get("prompt_tokens"));
    let completion_tokens = count(record.get("completion_tokens"));
    let total_tokens = match count(record.get("total_tokens")) {
        0 => prompt_tokens + completion_tokens,
        total => total,
    };
    let cached_tokens = count(
        record
            .get("prompt_tokens_details")
            .and_then(|details| details.get("cached_tokens")),
    );
    let reasoning_tokens = count(
        record
            .get("completion_tokens_details")
            .and_then(|details| details.get("reasoning_tokens")),
    );
    let cost = match record.get("cost").and_then(Value::as_f64) {
        Some(cost) if cost.is_finite() && cost > 0.0 => cost,
        _ => 0.0,
    };

    Ok(Usage {
        prompt_tokens,
        completion_tokens,
        total_tokens,
        cached_tokens,
        reasoning_tokens,
        cost,
    })
}

fn count(value: Option<&Value>) -> u64 {
    match value.and_then(Value::as_f64) {
        Some(n) if n.is_finite() && n > 0.0 => n as u64,
        _ => 0,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
