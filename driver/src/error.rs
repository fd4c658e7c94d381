//! Error taxonomy for the RLM driver.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Errors that can occur while driving an RLM invocation.
///
/// Each variant maps to exactly one process exit code (see
/// [`RlmError::exit_code`]); the mapping is part of the CLI contract.
#[derive(Debug, Error)]
pub enum RlmError {
    /// Caller-supplied arguments were invalid.
    #[error("usage error: {0}")]
    Usage(String),

    /// Environment or configuration file is missing or malformed.
    #[error("configuration error: {0}")]
    Config(String),

    /// The proxy endpoint failed at the network or HTTP layer.
    #[error("proxy error: {0}")]
    Proxy(String),

    /// The provider's model catalog was unusable.
    #[error("model error: {0}")]
    Model(String),

    /// Budget exceeded, call limit exhausted, or an unknown mid-turn failure.
    /// The message is surfaced verbatim to the caller.
    #[error("{0}")]
    Runtime(String),

    /// The final result could not be persisted.
    #[error("output error: {0}")]
    Output(String),

    /// The run was cancelled before completion.
    #[error("interrupted")]
    Interrupted,

    /// A provider usage record was not an object.
    #[error("invalid usage record: {0}")]
    InvalidUsage(String),

    /// Anything that does not fit the categories above.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Process exit codes exposed through the CLI surface.
pub mod exit_code {
    pub const OK: i32 = 0;
    pub const GENERIC: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const PROXY: i32 = 4;
    pub const MODEL: i32 = 5;
    pub const RUNTIME: i32 = 6;
    pub const OUTPUT_WRITE: i32 = 7;
    pub const INTERRUPTED: i32 = 130;
}

impl RlmError {
    /// Exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => exit_code::USAGE,
            Self::Config(_) => exit_code::CONFIG,
            Self::Proxy(_) => exit_code::PROXY,
            Self::Model(_) => exit_code::MODEL,
            Self::Runtime(_) => exit_code::RUNTIME,
            Self::Output(_) => exit_code::OUTPUT_WRITE,
            Self::Interrupted => exit_code::INTERRUPTED,
            Self::InvalidUsage(_) | Self::Internal(_) => exit_code::GENERIC,
        }
    }
}

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, RlmError>;

static BEARER_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)bearer\s+[A-Za-z0-9._~+/=-]+").expect("bearer pattern compiles")
});

/// Strip credentials from a message before it reaches stderr or the event log.
///
/// Known secrets are replaced wholesale; anything shaped like a bearer token
/// is scrubbed as well in case a provider echoed the auth header back.
pub fn redact_secrets(message: &str, secrets: &[&str]) -> String {
    let mut redacted = message.to_string();
    for secret in secrets {
        if !secret.is_empty() {
            redacted = redacted.replace(secret, "[redacted]");
        }
    }
    BEARER_TOKEN
        .replace_all(&redacted, "Bearer [redacted]")
        .into_owned()
}
