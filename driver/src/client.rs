//! Chat completion client against an OpenAI-compatible proxy.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;

use crate::error::Result;
use crate::error::RlmError;
use crate::error::redact_secrets;
use crate::extract::extract_repl_code;
use crate::prompts::SYSTEM_PROMPT;
use crate::provider::Env;
use crate::provider::ProxyClientConfig;
use crate::provider::RequestedModels;
use crate::provider::RuntimeModels;
use crate::provider::fetch_available_models;
use crate::provider::resolve_runtime_models;
use crate::usage::Usage;
use crate::usage::normalize_usage;

/// Sampling temperature for every generation request.
pub const GENERATION_TEMPERATURE: f64 = 0.1;

/// Message roles used in the conversation history.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A chat history entry.
///
/// Host-authored turns are plain role/content pairs. Assistant turns are kept
/// as the raw provider object so unknown fields survive the round trip; only
/// the `reasoning` field is stripped before re-sending (it is logged instead).
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum Message {
    Plain { role: Role, content: String },
    Raw(Value),
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::Plain {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Wrap a raw assistant message for the history, dropping `reasoning`.
    pub fn assistant_raw(mut message: Value) -> Self {
        if let Some(object) = message.as_object_mut() {
            object.remove("reasoning");
        }
        Self::Raw(message)
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            Self::Plain { content, .. } => Some(content),
            Self::Raw(value) => value.get("content").and_then(Value::as_str),
        }
    }
}

/// Outcome of one chat-completion call.
#[derive(Clone, Debug)]
pub struct GeneratedTurn {
    /// Raw assistant message exactly as the provider returned it.
    pub message: Value,
    /// Extracted `repl` code (empty when none was found).
    pub code: String,
    /// Whether any code was found.
    pub success: bool,
    /// Canonicalized usage for this call.
    pub usage: Usage,
}

/// The seam between the turn loop and the model provider.
///
/// The default preflight takes the requested pair verbatim; generators backed
/// by a real endpoint override it to consult the model catalog.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn generate_code(&self, messages: &[Message], model: &str) -> Result<GeneratedTurn>;

    async fn preflight(&self, requested: &RequestedModels) -> Result<RuntimeModels> {
        Ok(RuntimeModels::verbatim(requested))
    }
}

/// HTTP chat client for the proxy's `/chat/completions` endpoint.
pub struct ChatClient {
    http: reqwest::Client,
    config: ProxyClientConfig,
    env: Env,
}

impl ChatClient {
    pub fn new(config: ProxyClientConfig, env: Env) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            env,
        }
    }

    fn proxy_error(&self, message: String) -> RlmError {
        RlmError::Proxy(redact_secrets(&message, &[self.config.api_key.as_str()]))
    }
}

#[async_trait]
impl CodeGenerator for ChatClient {
    async fn generate_code(&self, messages: &[Message], model: &str) -> Result<GeneratedTurn> {
        let mut wire_messages = Vec::with_capacity(messages.len() + 1);
        wire_messages.push(json!({"role": "system", "content": SYSTEM_PROMPT}));
        for message in messages {
            wire_messages.push(serde_json::to_value(message).map_err(|err| {
                RlmError::Runtime(format!("cannot serialize chat history: {err}"))
            })?);
        }
        let request = json!({
            "model": model,
            "messages": wire_messages,
            "temperature": GENERATION_TEMPERATURE,
        });

        let url = format!("{}/chat/completions", self.config.base_url);
        tracing::debug!("requesting completion: model={model}, history={}", messages.len());
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|err| self.proxy_error(format!("POST {url} failed: {err}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| self.proxy_error(format!("POST {url} failed: {err}")))?;
        if !status.is_success() {
            return Err(self.proxy_error(format!(
                "chat completion returned {status}: {}",
                body.chars().take(500).collect::<String>()
            )));
        }
        let parsed: Value = serde_json::from_str(&body)
            .map_err(|err| self.proxy_error(format!("chat completion was not valid JSON: {err}")))?;

        let message = parsed
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .cloned()
            .ok_or_else(|| self.proxy_error("chat completion carried no choices".to_string()))?;
        let content = message.get("content").and_then(Value::as_str).unwrap_or("");
        let (code, success) = extract_repl_code(content);
        let usage = normalize_usage(parsed.get("usage").unwrap_or(&json!({})))?;

        Ok(GeneratedTurn {
            message,
            code,
            success,
            usage,
        })
    }

    async fn preflight(&self, requested: &RequestedModels) -> Result<RuntimeModels> {
        let available = fetch_available_models(&self.http, &self.config).await?;
        Ok(resolve_runtime_models(requested, &available, &self.env))
    }
}
