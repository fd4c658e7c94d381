//! Recursive Language Model driver.
//!
//! Lets a chat model solve tasks against prompts too large for its context by
//! working inside a sandboxed Python REPL that holds the prompt as a value.
//! Inside the REPL the model can slice and search the prompt, and spawn
//! recursive sub-agents (`llm_query`) whose answers come back as bindings in
//! the parent's namespace instead of text in its chat history.

pub mod agent;
pub mod budget;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod extract;
pub mod prompts;
pub mod provider;
pub mod sandbox;
pub mod usage;

pub use agent::AgentTree;
pub use agent::Driver;
pub use agent::RunOutcome;
pub use agent::render_output;
pub use agent::subagent;
pub use agent::truncate_tail;
pub use budget::BudgetCaps;
pub use budget::UsageTotals;
pub use client::ChatClient;
pub use client::CodeGenerator;
pub use client::GeneratedTurn;
pub use client::Message;
pub use client::Role;
pub use config::DriverConfig;
pub use config::DriverConfigFile;
pub use error::RlmError;
pub use error::exit_code;
pub use error::redact_secrets;
pub use events::EventSink;
pub use events::EventType;
pub use events::LogEvent;
pub use events::RunLogger;
pub use extract::extract_repl_code;
pub use prompts::SYSTEM_PROMPT;
pub use provider::Env;
pub use provider::ProxyClientConfig;
pub use provider::RequestedModels;
pub use provider::RuntimeModels;
pub use provider::fetch_available_models;
pub use provider::resolve_model_names;
pub use provider::resolve_proxy_client_config;
pub use provider::resolve_runtime_models;
pub use sandbox::LlmCallback;
pub use sandbox::Sandbox;
pub use usage::Usage;
pub use usage::normalize_usage;
