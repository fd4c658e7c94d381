//! Extraction of executable code from model replies.

use std::sync::LazyLock;

use regex::Regex;

static REPL_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```repl(.*?)```").expect("fence pattern compiles"));

/// Pull every fenced `repl` block out of a model reply.
///
/// Blocks are trimmed and joined with newlines. Returns the combined code and
/// whether any code was found. No other fence language is recognized.
pub fn extract_repl_code(reply: &str) -> (String, bool) {
    let code = REPL_FENCE
        .captures_iter(reply)
        .map(|captures| captures[1].trim().to_string())
        .filter(|block| !block.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    let success = !code.is_empty();
    (code, success)
}
