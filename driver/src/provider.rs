//! Proxy endpoint configuration and runtime model resolution.
//!
//! The preflight path: validate the endpoint from the environment, ask the
//! provider which models it actually serves, and map the requested
//! primary/sub pair onto that catalog with deterministic fallback.

use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;

use crate::config::DriverConfig;
use crate::error::Result;
use crate::error::RlmError;
use crate::error::redact_secrets;

pub const ENV_BASE_URL: &str = "RLM_MODEL_BASE_URL";
pub const ENV_API_KEY: &str = "RLM_MODEL_API_KEY";
pub const ENV_PRIMARY_AGENT: &str = "RLM_PRIMARY_AGENT";
pub const ENV_SUB_AGENT: &str = "RLM_SUB_AGENT";
pub const ENV_FALLBACK_PRIMARY: &str = "RLM_FALLBACK_PRIMARY";
pub const ENV_FALLBACK_SUB: &str = "RLM_FALLBACK_SUB";

pub const DEFAULT_PRIMARY_AGENT: &str = "gpt-5";
pub const DEFAULT_SUB_AGENT: &str = "gpt-5-codex-mini";

/// Ordered fallback candidates scanned when the requested model is absent and
/// no environment fallback applies.
const PRIMARY_FALLBACKS: [&str; 4] = ["gpt-5", "gpt-5.1", "gpt-5.2", "gpt-5-codex"];
const SUB_FALLBACKS: [&str; 3] = ["gpt-5-codex-mini", "gpt-5.1-codex-mini", "gemini-2.5-flash"];

/// Snapshot of process environment variables, taken once at startup so the
/// resolution functions stay pure and testable.
#[derive(Clone, Debug, Default)]
pub struct Env(HashMap<String, String>);

impl Env {
    pub fn from_process() -> Self {
        Self(std::env::vars().collect())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

impl FromIterator<(String, String)> for Env {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Validated proxy endpoint settings.
#[derive(Clone, Debug)]
pub struct ProxyClientConfig {
    /// Base URL ending in `/v1`, trailing slashes trimmed.
    pub base_url: String,
    pub api_key: String,
}

/// Read and validate the two required endpoint variables.
pub fn resolve_proxy_client_config(env: &Env) -> Result<ProxyClientConfig> {
    let base_url = env
        .get(ENV_BASE_URL)
        .ok_or_else(|| RlmError::Config(format!("{ENV_BASE_URL} is not set")))?;
    let api_key = env
        .get(ENV_API_KEY)
        .ok_or_else(|| RlmError::Config(format!("{ENV_API_KEY} is not set")))?;
    let base_url = base_url.trim_end_matches('/').to_string();
    if !base_url.ends_with("/v1") {
        return Err(RlmError::Config(format!(
            "{ENV_BASE_URL} must point at an OpenAI-compatible /v1 root, got '{base_url}'"
        )));
    }
    Ok(ProxyClientConfig {
        base_url,
        api_key: api_key.to_string(),
    })
}

/// Requested model pair, before preflight has consulted the catalog.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestedModels {
    pub primary: String,
    pub sub: String,
}

/// Pick the requested pair from, in order: environment, config file,
/// built-in defaults.
pub fn resolve_model_names(config: &DriverConfig, env: &Env) -> RequestedModels {
    let primary = env
        .get(ENV_PRIMARY_AGENT)
        .or(config.primary_agent.as_deref())
        .unwrap_or(DEFAULT_PRIMARY_AGENT)
        .to_string();
    let sub = env
        .get(ENV_SUB_AGENT)
        .or(config.sub_agent.as_deref())
        .unwrap_or(DEFAULT_SUB_AGENT)
        .to_string();
    RequestedModels { primary, sub }
}

#[derive(Deserialize)]
struct ModelCatalog {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    #[serde(default)]
    id: String,
}

/// `GET {base_url}/models` with bearer auth; returns the non-empty model ids.
pub async fn fetch_available_models(
    http: &reqwest::Client,
    config: &ProxyClientConfig,
) -> Result<Vec<String>> {
    let url = format!("{}/models", config.base_url);
    let secrets = [config.api_key.as_str()];
    let response = http
        .get(&url)
        .bearer_auth(&config.api_key)
        .send()
        .await
        .map_err(|err| RlmError::Proxy(redact_secrets(&format!("GET {url} failed: {err}"), &secrets)))?;
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|err| RlmError::Proxy(redact_secrets(&format!("GET {url} failed: {err}"), &secrets)))?;
    if !status.is_success() {
        return Err(RlmError::Proxy(redact_secrets(
            &format!("GET {url} returned {status}: {}", preview(&body)),
            &secrets,
        )));
    }
    decode_model_catalog(&body, &config.base_url)
}

/// Decode a `/models` response body into the list of non-empty model ids.
fn decode_model_catalog(body: &str, base_url: &str) -> Result<Vec<String>> {
    let catalog: ModelCatalog = serde_json::from_str(body).map_err(|err| {
        RlmError::Proxy(format!(
            "model catalog from {base_url} was not valid JSON: {err}"
        ))
    })?;
    let models: Vec<String> = catalog
        .data
        .into_iter()
        .map(|entry| entry.id)
        .filter(|id| !id.is_empty())
        .collect();
    if models.is_empty() {
        return Err(RlmError::Model(format!(
            "the proxy at {base_url} advertises no models"
        )));
    }
    Ok(models)
}

fn preview(body: &str) -> &str {
    let end = body
        .char_indices()
        .nth(200)
        .map_or(body.len(), |(index, _)| index);
    &body[..end]
}

/// Resolved runtime pair plus any fallback warnings. Produced once per
/// top-level invocation and reused by every descendant agent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeModels {
    pub primary_agent: String,
    pub sub_agent: String,
    pub warnings: Vec<String>,
}

impl RuntimeModels {
    /// A pair taken verbatim, with no catalog consulted. Used by generators
    /// that have no preflight (tests, offline tooling).
    pub fn verbatim(requested: &RequestedModels) -> Self {
        Self {
            primary_agent: requested.primary.clone(),
            sub_agent: requested.sub.clone(),
            warnings: Vec::new(),
        }
    }
}

#[derive(Clone, Copy)]
enum ModelRole {
    Primary,
    Sub,
}

impl fmt::Display for ModelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Sub => write!(f, "sub"),
        }
    }
}

/// Map the requested pair onto the advertised catalog.
///
/// Per role: an exact catalog hit wins silently; otherwise the environment
/// fallback, then the built-in fallback list, then the first advertised model.
/// Every non-identity selection appends a warning naming the role, the
/// requested id, and the chosen id. Deterministic given its inputs.
pub fn resolve_runtime_models(
    requested: &RequestedModels,
    available: &[String],
    env: &Env,
) -> RuntimeModels {
    let mut warnings = Vec::new();
    let primary_agent = pick_model(
        ModelRole::Primary,
        &requested.primary,
        available,
        env.get(ENV_FALLBACK_PRIMARY),
        &PRIMARY_FALLBACKS,
        &mut warnings,
    );
    let sub_agent = pick_model(
        ModelRole::Sub,
        &requested.sub,
        available,
        env.get(ENV_FALLBACK_SUB),
        &SUB_FALLBACKS,
        &mut warnings,
    );
    RuntimeModels {
        primary_agent,
        sub_agent,
        warnings,
    }
}

fn pick_model(
    role: ModelRole,
    requested: &str,
    available: &[String],
    env_fallback: Option<&str>,
    fallbacks: &[&str],
    warnings: &mut Vec<String>,
) -> String {
    let advertised = |id: &str| available.iter().any(|model| model == id);
    if advertised(requested) {
        return requested.to_string();
    }
    let chosen = env_fallback
        .filter(|fallback| advertised(fallback))
        .map(str::to_string)
        .or_else(|| {
            fallbacks
                .iter()
                .find(|candidate| advertised(candidate))
                .map(|candidate| (*candidate).to_string())
        })
        .unwrap_or_else(|| available[0].clone());
    warnings.push(format!(
        "{role} model '{requested}' is not available; using '{chosen}' instead"
    ));
    chosen
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Env {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    fn catalog(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn proxy_config_requires_both_variables() {
        let err = resolve_proxy_client_config(&env(&[])).unwrap_err();
        assert!(matches!(err, RlmError::Config(_)));

        let err =
            resolve_proxy_client_config(&env(&[(ENV_BASE_URL, "https://proxy.test/v1")])).unwrap_err();
        assert!(err.to_string().contains(ENV_API_KEY));
    }

    #[test]
    fn proxy_config_trims_trailing_slash_and_validates_v1() {
        let config = resolve_proxy_client_config(&env(&[
            (ENV_BASE_URL, "https://proxy.test/v1/"),
            (ENV_API_KEY, "key"),
        ]))
        .unwrap();
        assert_eq!(config.base_url, "https://proxy.test/v1");

        let err = resolve_proxy_client_config(&env(&[
            (ENV_BASE_URL, "https://proxy.test"),
            (ENV_API_KEY, "key"),
        ]))
        .unwrap_err();
        assert!(matches!(err, RlmError::Config(_)));
    }

    #[test]
    fn model_names_prefer_env_then_config_then_defaults() {
        let mut config = DriverConfig::default();
        config.primary_agent = Some("config-primary".to_string());

        let requested = resolve_model_names(
            &config,
            &env(&[(ENV_PRIMARY_AGENT, "env-primary"), (ENV_SUB_AGENT, "env-sub")]),
        );
        assert_eq!(requested.primary, "env-primary");
        assert_eq!(requested.sub, "env-sub");

        let requested = resolve_model_names(&config, &env(&[]));
        assert_eq!(requested.primary, "config-primary");
        assert_eq!(requested.sub, DEFAULT_SUB_AGENT);

        let requested = resolve_model_names(&DriverConfig::default(), &env(&[]));
        assert_eq!(requested.primary, DEFAULT_PRIMARY_AGENT);
        assert_eq!(requested.sub, DEFAULT_SUB_AGENT);
    }

    #[test]
    fn catalog_decoding_keeps_non_empty_ids() {
        let models = decode_model_catalog(
            r#"{"data": [{"id": "gpt-5"}, {"id": ""}, {"id": "gpt-5-codex-mini"}]}"#,
            "https://proxy.test/v1",
        )
        .unwrap();
        assert_eq!(models, vec!["gpt-5".to_string(), "gpt-5-codex-mini".to_string()]);
    }

    #[test]
    fn empty_catalog_is_a_model_error() {
        let err = decode_model_catalog(r#"{"data": []}"#, "https://proxy.test/v1").unwrap_err();
        assert!(matches!(err, RlmError::Model(_)));
        assert_eq!(err.exit_code(), 5);
    }

    #[test]
    fn non_json_catalog_is_a_proxy_error() {
        let err = decode_model_catalog("<html>gateway timeout</html>", "https://proxy.test/v1")
            .unwrap_err();
        assert!(matches!(err, RlmError::Proxy(_)));
    }

    #[test]
    fn exact_catalog_hit_resolves_without_warnings() {
        let requested = RequestedModels {
            primary: "gpt-5".to_string(),
            sub: "gpt-5-codex-mini".to_string(),
        };
        let resolved = resolve_runtime_models(
            &requested,
            &catalog(&["gpt-5", "gpt-5-codex-mini"]),
            &env(&[]),
        );
        assert_eq!(resolved.primary_agent, "gpt-5");
        assert_eq!(resolved.sub_agent, "gpt-5-codex-mini");
        assert!(resolved.warnings.is_empty());
    }

    #[test]
    fn missing_model_falls_back_down_the_builtin_list() {
        let requested = RequestedModels {
            primary: "gpt-6".to_string(),
            sub: "gpt-5-codex-mini".to_string(),
        };
        let resolved = resolve_runtime_models(
            &requested,
            &catalog(&["gpt-5", "gpt-5-codex-mini"]),
            &env(&[]),
        );
        assert_eq!(resolved.primary_agent, "gpt-5");
        assert_eq!(resolved.warnings.len(), 1);
        assert!(resolved.warnings[0].contains("gpt-6"));
        assert!(resolved.warnings[0].contains("gpt-5"));
        assert!(resolved.warnings[0].contains("primary"));
    }

    #[test]
    fn env_fallback_wins_over_the_builtin_list() {
        let requested = RequestedModels {
            primary: "gpt-6".to_string(),
            sub: "gpt-6-mini".to_string(),
        };
        let resolved = resolve_runtime_models(
            &requested,
            &catalog(&["gpt-5", "house-model", "gemini-2.5-flash"]),
            &env(&[(ENV_FALLBACK_PRIMARY, "house-model")]),
        );
        assert_eq!(resolved.primary_agent, "house-model");
        // Sub had no env fallback, so the list applies.
        assert_eq!(resolved.sub_agent, "gemini-2.5-flash");
        assert_eq!(resolved.warnings.len(), 2);
    }

    #[test]
    fn unknown_everything_takes_the_first_advertised_model() {
        let requested = RequestedModels {
            primary: "mystery".to_string(),
            sub: "enigma".to_string(),
        };
        let resolved =
            resolve_runtime_models(&requested, &catalog(&["llama-maverick"]), &env(&[]));
        assert_eq!(resolved.primary_agent, "llama-maverick");
        assert_eq!(resolved.sub_agent, "llama-maverick");
        assert_eq!(resolved.warnings.len(), 2);
    }

    #[test]
    fn resolution_is_deterministic() {
        let requested = RequestedModels {
            primary: "gpt-6".to_string(),
            sub: "gpt-6-mini".to_string(),
        };
        let available = catalog(&["gpt-5.1", "gpt-5.1-codex-mini"]);
        let first = resolve_runtime_models(&requested, &available, &env(&[]));
        let second = resolve_runtime_models(&requested, &available, &env(&[]));
        assert_eq!(first, second);
    }
}
