//! The recursive agent turn loop and its `llm_query` bridge.
//!
//! One agent = one REPL session driven by one model. Each turn asks the model
//! for code, executes it in the agent's sandbox, and feeds the (truncated)
//! output back as the next user message. When sandboxed code calls
//! `llm_query`, the turn is suspended inside the sandbox while a child agent
//! runs the same loop one level deeper; the child's final value returns as an
//! ordinary Python value. The tree shares one usage accumulator, one event
//! sink, and one resolved model pair.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::Mutex;

use crate::budget::BudgetCaps;
use crate::budget::UsageTotals;
use crate::client::ChatClient;
use crate::client::CodeGenerator;
use crate::client::Message;
use crate::config::DriverConfig;
use crate::error::Result;
use crate::error::RlmError;
use crate::events::EventSink;
use crate::events::RunLogger;
use crate::prompts::MAX_DEPTH_MESSAGE;
use crate::prompts::NO_CODE_FEEDBACK;
use crate::prompts::SEED_CODE;
use crate::prompts::seed_user_message;
use crate::provider::Env;
use crate::provider::RequestedModels;
use crate::provider::RuntimeModels;
use crate::provider::resolve_model_names;
use crate::provider::resolve_proxy_client_config;
use crate::sandbox::LlmCallback;
use crate::sandbox::Sandbox;

/// Clip `text` to its last `limit` characters.
///
/// Counts char units, cuts at a char boundary, and is idempotent:
/// re-clipping clipped text is a no-op.
pub fn truncate_tail(text: &str, limit: usize) -> &str {
    let chars = text.chars().count();
    if chars <= limit {
        return text;
    }
    let cut = text
        .char_indices()
        .nth(chars - limit)
        .map_or(text.len(), |(index, _)| index);
    &text[cut..]
}

/// Decorate captured output for the model's observation message.
pub fn render_output(text: &str, limit: usize) -> String {
    if text.is_empty() {
        return "[EMPTY OUTPUT]".to_string();
    }
    if text.chars().count() > limit {
        format!(
            "[TRUNCATED: Last {limit} chars shown].. {}",
            truncate_tail(text, limit)
        )
    } else {
        format!("[FULL OUTPUT SHOWN]... {text}")
    }
}

/// State shared by every agent in one invocation tree.
pub struct AgentTree {
    pub config: DriverConfig,
    pub requested: RequestedModels,
    pub generator: Arc<dyn CodeGenerator>,
    pub totals: Arc<UsageTotals>,
    pub sink: Arc<EventSink>,
}

/// Drive one agent at `depth` over `context` until it produces a final value.
///
/// When `models` is absent (the top-level call), the generator's preflight
/// resolves the pair once; descendants reuse it so a single invocation tree
/// sees a single model pair.
pub async fn subagent(
    tree: Arc<AgentTree>,
    context: String,
    depth: u32,
    parent_run_id: Option<String>,
    models: Option<RuntimeModels>,
) -> Result<Value> {
    let models = match models {
        Some(models) => models,
        None => {
            let resolved = tree.generator.preflight(&tree.requested).await?;
            for warning in &resolved.warnings {
                tracing::warn!("{warning}");
            }
            resolved
        }
    };

    let logger = RunLogger::start(Arc::clone(&tree.sink), depth, parent_run_id, &context);
    let sandbox = Sandbox::new()
        .map_err(|err| RlmError::Runtime(format!("failed to initialize sandbox: {err}")))?;
    let sandbox = Arc::new(Mutex::new(sandbox));

    let outcome = drive(&tree, &sandbox, &logger, &models, &context, depth).await;
    if let Err(err) = &outcome {
        logger.error(&err.to_string());
    }
    // The sandbox drops here on every path: return, budget abort, exhaustion,
    // or a propagated failure.
    outcome
}

async fn drive(
    tree: &Arc<AgentTree>,
    sandbox: &Arc<Mutex<Sandbox>>,
    logger: &RunLogger,
    models: &RuntimeModels,
    context: &str,
    depth: u32,
) -> Result<Value> {
    {
        let mut guard = sandbox.lock().await;
        guard.bind_str("context", context).map_err(sandbox_failure)?;
        let bridge = RecursionBridge {
            tree: Arc::clone(tree),
            models: models.clone(),
            parent_run_id: logger.run_id().to_string(),
            depth,
            handle: Handle::current(),
        };
        guard
            .bind_llm_query(Arc::new(bridge))
            .map_err(sandbox_failure)?;
    }

    let seed_output = execute(sandbox, SEED_CODE).await?;
    logger.seed(SEED_CODE, &seed_output);
    let mut messages = vec![Message::user(seed_user_message(
        tree.config.truncate_len,
        SEED_CODE,
        &seed_output,
    ))];

    let model = if depth == 0 {
        &models.primary_agent
    } else {
        &models.sub_agent
    };

    for _call in 0..tree.config.max_calls_per_subagent {
        let turn = tree.generator.generate_code(&messages, model).await?;
        let reasoning = turn.message.get("reasoning").cloned();
        messages.push(Message::assistant_raw(turn.message.clone()));
        tree.totals.track(&turn.usage)?;

        if !turn.success {
            logger.code_generated("", reasoning, &turn.usage);
            messages.push(Message::user(NO_CODE_FEEDBACK));
            continue;
        }

        let captured = execute(sandbox, &turn.code).await?;

        let final_value = {
            let guard = sandbox.lock().await;
            guard.read_final().map_err(sandbox_failure)?
        };
        if let Some(value) = final_value {
            logger.code_generated(&turn.code, reasoning, &turn.usage);
            logger.final_result(&value);
            return Ok(value);
        }

        let rendered = render_output(&captured, tree.config.truncate_len);
        let has_error = captured.contains("Error");
        logger.execution_result(&turn.code, &rendered, has_error, reasoning, &turn.usage);
        messages.push(Message::user(format!("Output: \n{rendered}")));
    }

    Err(RlmError::Runtime(
        "Did not finish the function stack before subagent died".to_string(),
    ))
}

/// Run one code block on the blocking pool.
///
/// Python may re-enter the driver through `llm_query` while this turn is
/// suspended here; the child tree runs to completion before `run` returns.
async fn execute(sandbox: &Arc<Mutex<Sandbox>>, code: &str) -> Result<String> {
    let sandbox = Arc::clone(sandbox);
    let code = code.to_string();
    tokio::task::spawn_blocking(move || {
        let mut guard = sandbox.blocking_lock();
        guard.clear_stdout();
        guard.run(&code)?;
        Ok::<String, anyhow::Error>(guard.take_stdout())
    })
    .await
    .map_err(|err| RlmError::Runtime(format!("sandbox execution aborted: {err}")))?
    .map_err(sandbox_failure)
}

fn sandbox_failure(err: anyhow::Error) -> RlmError {
    RlmError::Runtime(format!("sandbox failure: {err}"))
}

/// The `llm_query` implementation installed into each agent's sandbox.
struct RecursionBridge {
    tree: Arc<AgentTree>,
    models: RuntimeModels,
    parent_run_id: String,
    depth: u32,
    handle: Handle,
}

impl LlmCallback for RecursionBridge {
    fn call(&self, context: &str) -> anyhow::Result<Value> {
        if self.depth >= self.tree.config.max_depth {
            anyhow::bail!("{MAX_DEPTH_MESSAGE}");
        }
        let tree = Arc::clone(&self.tree);
        let context = context.to_string();
        self.handle
            .block_on(subagent(
                tree,
                context,
                self.depth + 1,
                Some(self.parent_run_id.clone()),
                Some(self.models.clone()),
            ))
            .map_err(anyhow::Error::new)
    }
}

/// What the top-level caller gets back: the final value (if any), the event
/// log location (if one was written), and the failure (if any).
#[derive(Debug)]
pub struct RunOutcome {
    pub final_result: Option<Value>,
    pub log_file: Option<PathBuf>,
    pub error: Option<RlmError>,
}

/// Top-level handle for one invocation tree.
pub struct Driver {
    tree: Arc<AgentTree>,
}

impl Driver {
    pub fn new(
        config: DriverConfig,
        requested: RequestedModels,
        generator: Arc<dyn CodeGenerator>,
        sink: Arc<EventSink>,
    ) -> Self {
        let caps = BudgetCaps {
            max_prompt_tokens: config.max_prompt_tokens,
            max_completion_tokens: config.max_completion_tokens,
        };
        Self {
            tree: Arc::new(AgentTree {
                config,
                requested,
                generator,
                totals: Arc::new(UsageTotals::new(caps)),
                sink,
            }),
        }
    }

    /// Wire a driver to the live proxy endpoint described by the environment.
    pub fn from_env(config: DriverConfig, env: &Env, sink: Arc<EventSink>) -> Result<Self> {
        let proxy = resolve_proxy_client_config(env)?;
        let requested = resolve_model_names(&config, env);
        let generator = Arc::new(ChatClient::new(proxy, env.clone()));
        Ok(Self::new(config, requested, generator, sink))
    }

    /// Run one top-level invocation to completion. Failures come back inside
    /// the outcome with the log flushed; nothing escapes this boundary.
    pub async fn run(&self, context: &str) -> RunOutcome {
        self.tree.totals.reset();
        let result = subagent(Arc::clone(&self.tree), context.to_string(), 0, None, None).await;
        self.tree.sink.flush();
        let log_file = self.tree.sink.log_file();
        match result {
            Ok(value) => RunOutcome {
                final_result: Some(value),
                log_file,
                error: None,
            },
            Err(error) => RunOutcome {
                final_result: None,
                log_file,
                error: Some(error),
            },
        }
    }

    /// Accumulated usage across the whole tree so far.
    pub fn usage(&self) -> crate::usage::Usage {
        self.tree.totals.get()
    }

    /// Flush the event log. Used by interrupt handlers that abandon a run.
    pub fn flush(&self) {
        self.tree.sink.flush();
    }

    pub fn log_file(&self) -> Option<PathBuf> {
        self.tree.sink.log_file()
    }
}
