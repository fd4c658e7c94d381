//! Fixed prompts and the seed program installed into every agent.

/// System prompt prepended to every chat-completion request. Never stored in
/// the conversation history.
pub const SYSTEM_PROMPT: &str = r#"You must answer a query whose context is too large to read in one pass.
You work inside a persistent Python REPL session that holds the context as a value.

Your REPL environment provides:
- `context`: a string variable containing the full prompt you were asked about.
- `llm_query(prompt)`: spawn a recursive sub-agent (a smaller copy of yourself) on a
  string you build, and get its final answer back as a Python value. Use it for
  semantic work over chunks: summarizing, extraction, cross-referencing.
- `FINAL(value)` and `FINAL_VAR(variable)`: declare your final answer and end the session.

Rules:
- Reply with Python code in a ```repl fenced block. Only ```repl blocks are executed.
- REPL variables persist across turns. Output is truncated, so print selectively.
- Inspect `context` in slices (for example `print(context[:2000])`) instead of all at once.
- Prefer cheap string operations (slicing, find, split, regex) to locate relevant regions,
  then delegate understanding of those regions to `llm_query`.
- When you can answer the query, call FINAL(answer) or FINAL_VAR(variable)."#;

/// Seed program executed before the first model turn: orient the model by
/// printing the context's type, length, and a bounded preview.
pub const SEED_CODE: &str = r#"print(f"Context type: {type(context).__name__}")
print(f"Context length: {len(context)}")
if len(context) <= 500:
    print(context)
else:
    print(context[:500])
    print("...")
    print(context[-500:])"#;

/// The synthetic step-0 user message: the truncation notice, the seed program
/// in a `repl` fence, and its captured output.
pub fn seed_user_message(truncate_len: usize, seed_code: &str, output: &str) -> String {
    format!(
        "Outputs will always be truncated to last {truncate_len} characters.\n\n```repl\n{seed_code}\n```\nOutput:\n{output}"
    )
}

/// Feedback appended when a reply contained no `repl` fence.
pub const NO_CODE_FEEDBACK: &str =
    "Error: We could not extract code because you may not have used repl block!";

/// Message raised out of `llm_query` when the recursion depth cap is hit; the
/// calling agent observes it as an Error line in its captured output.
pub const MAX_DEPTH_MESSAGE: &str =
    "MAXIMUM DEPTH REACHED: llm_query cannot spawn a deeper sub-agent here; answer with what you have";
