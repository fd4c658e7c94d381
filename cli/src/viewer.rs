//! Offline rendering of recorded event logs.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use chrono::DateTime;
use rlm_driver::{EventType, LogEvent, RlmError, Usage, exit_code};

use crate::cli::{ViewArgs, ViewMode};
use crate::fail;

pub fn run(args: &ViewArgs) -> i32 {
    let events = match load_events(&args.log_file) {
        Ok(events) => events,
        Err(err) => return fail(&err),
    };
    if events.is_empty() {
        eprintln!("rlm: {} holds no events", args.log_file.display());
        return exit_code::OK;
    }
    let rendered = match args.mode {
        ViewMode::Tree => render_tree(&events),
        ViewMode::Stats => render_stats(&events),
        ViewMode::Linear => render_linear(&events),
    };
    print!("{rendered}");
    exit_code::OK
}

fn load_events(path: &Path) -> Result<Vec<LogEvent>, RlmError> {
    let content = std::fs::read_to_string(path)
        .map_err(|err| RlmError::Usage(format!("cannot read {}: {err}", path.display())))?;
    let mut events = Vec::new();
    for (number, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(event) => events.push(event),
            Err(err) => {
                tracing::warn!("skipping malformed record on line {}: {err}", number + 1);
            }
        }
    }
    Ok(events)
}

fn short_id(run_id: &str) -> &str {
    run_id.get(..8).unwrap_or(run_id)
}

fn preview(text: &str, limit: usize) -> String {
    let flattened: String = text
        .chars()
        .map(|c| if c == '\n' { ' ' } else { c })
        .take(limit)
        .collect();
    if text.chars().count() > limit {
        format!("{flattened}…")
    } else {
        flattened
    }
}

fn describe(event: &LogEvent) -> String {
    match event.event_type {
        EventType::RunStart => {
            let query = event.query.as_deref().unwrap_or("");
            format!("run_start  \"{}\"", preview(query, 60))
        }
        EventType::CodeGenerated => {
            let code = event.code.as_deref().unwrap_or("");
            if code.is_empty() {
                "code_generated  (no repl block)".to_string()
            } else {
                format!("code_generated  {}", preview(code, 60))
            }
        }
        EventType::ExecutionResult => {
            let marker = if event.has_error == Some(true) { "!" } else { "" };
            format!(
                "execution_result{marker}  {}",
                preview(event.output.as_deref().unwrap_or(""), 60)
            )
        }
        EventType::FinalResult => {
            let result = event
                .result
                .as_ref()
                .map(|value| value.to_string())
                .unwrap_or_default();
            format!("final_result  {}", preview(&result, 60))
        }
        EventType::Error => format!("error  {}", preview(event.error.as_deref().unwrap_or(""), 80)),
    }
}

/// Agent tree via `parent_run_id` edges, each run with its step events.
fn render_tree(events: &[LogEvent]) -> String {
    let mut run_order: Vec<&str> = Vec::new();
    let mut children: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    let mut parents: BTreeMap<&str, Option<&str>> = BTreeMap::new();
    for event in events {
        if !run_order.contains(&event.run_id.as_str()) {
            run_order.push(&event.run_id);
            let parent = event.parent_run_id.as_deref();
            parents.insert(&event.run_id, parent);
            if let Some(parent) = parent {
                children.entry(parent).or_default().push(&event.run_id);
            }
        }
    }

    let mut out = String::new();
    for run_id in &run_order {
        // Roots: no parent, or the parent's events are missing from this log.
        let is_root = match parents.get(run_id) {
            Some(Some(parent)) => !run_order.contains(parent),
            _ => true,
        };
        if is_root {
            render_run(&mut out, events, &children, run_id, 0);
        }
    }
    out
}

fn render_run(
    out: &mut String,
    events: &[LogEvent],
    children: &BTreeMap<&str, Vec<&str>>,
    run_id: &str,
    indent: usize,
) {
    let pad = "  ".repeat(indent);
    let run: Vec<&LogEvent> = events
        .iter()
        .filter(|event| event.run_id == run_id)
        .collect();
    let Some(first) = run.first() else {
        return;
    };
    let _ = writeln!(
        out,
        "{pad}run {}  depth={}  {}",
        short_id(run_id),
        first.depth,
        describe(first)
    );
    for event in run.iter().skip(1) {
        let step = event
            .step
            .map(|step| format!("step {step}  "))
            .unwrap_or_default();
        let _ = writeln!(out, "{pad}  {step}{}", describe(event));
    }
    if let Some(kids) = children.get(run_id) {
        for kid in kids {
            render_run(out, events, children, kid, indent + 1);
        }
    }
}

/// Aggregate counters over the whole stream.
fn render_stats(events: &[LogEvent]) -> String {
    let mut runs: Vec<&str> = Vec::new();
    let mut max_depth = 0;
    let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    let mut usage = Usage::default();
    for event in events {
        if !runs.contains(&event.run_id.as_str()) {
            runs.push(&event.run_id);
        }
        max_depth = max_depth.max(event.depth);
        let key = match event.event_type {
            EventType::RunStart => "run_start",
            EventType::CodeGenerated => "code_generated",
            EventType::ExecutionResult => "execution_result",
            EventType::FinalResult => "final_result",
            EventType::Error => "error",
        };
        *counts.entry(key).or_default() += 1;
        if let Some(call_usage) = &event.usage {
            usage.absorb(call_usage);
        }
    }
    let wall_ms = events
        .iter()
        .map(|event| event.time)
        .max()
        .unwrap_or_default()
        - events
            .iter()
            .map(|event| event.time)
            .min()
            .unwrap_or_default();

    let mut out = String::new();
    let _ = writeln!(out, "events: {}", events.len());
    let _ = writeln!(out, "runs: {}  max depth: {max_depth}", runs.len());
    for (key, count) in &counts {
        let _ = writeln!(out, "  {key}: {count}");
    }
    let _ = writeln!(
        out,
        "tokens: prompt={} completion={} total={} (cached={} reasoning={})",
        usage.prompt_tokens,
        usage.completion_tokens,
        usage.total_tokens,
        usage.cached_tokens,
        usage.reasoning_tokens
    );
    let _ = writeln!(out, "cost: {:.6}", usage.cost);
    let _ = writeln!(out, "wall: {wall_ms} ms");
    out
}

/// One line per event, in stream order.
fn render_linear(events: &[LogEvent]) -> String {
    let mut out = String::new();
    for event in events {
        let time = DateTime::from_timestamp_millis(event.time)
            .map(|stamp| stamp.format("%H:%M:%S%.3f").to_string())
            .unwrap_or_else(|| event.time.to_string());
        let _ = writeln!(
            out,
            "{time}  d{}  {}  {}",
            event.depth,
            short_id(&event.run_id),
            describe(event)
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn event(value: serde_json::Value) -> LogEvent {
        serde_json::from_value(value).unwrap()
    }

    fn sample_stream() -> Vec<LogEvent> {
        vec![
            event(json!({
                "time": 1000, "run_id": "rootrootroot", "depth": 0,
                "event_type": "run_start", "query": "find the answer",
            })),
            event(json!({
                "time": 1010, "run_id": "rootrootroot", "depth": 0,
                "event_type": "execution_result", "step": 0,
                "code": "print(context)", "output": "Context type: str",
                "hasError": false,
                "usage": {"prompt_tokens": 0, "completion_tokens": 0, "total_tokens": 0,
                           "cached_tokens": 0, "reasoning_tokens": 0, "cost": 0.0},
            })),
            event(json!({
                "time": 1020, "run_id": "childchildchild", "depth": 1,
                "parent_run_id": "rootrootroot",
                "event_type": "run_start", "query": "summarize this part",
            })),
            event(json!({
                "time": 1030, "run_id": "childchildchild", "depth": 1,
                "parent_run_id": "rootrootroot",
                "event_type": "final_result", "step": 1, "result": "summary",
            })),
            event(json!({
                "time": 1040, "run_id": "rootrootroot", "depth": 0,
                "event_type": "final_result", "step": 2, "result": "summary",
                "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15,
                           "cached_tokens": 0, "reasoning_tokens": 0, "cost": 0.5},
            })),
        ]
    }

    #[test]
    fn tree_nests_children_under_their_parent() {
        let rendered = render_tree(&sample_stream());
        let root_line = rendered
            .lines()
            .position(|line| line.starts_with("run rootroot"))
            .unwrap();
        let child_line = rendered
            .lines()
            .position(|line| line.trim_start().starts_with("run childchi"))
            .unwrap();
        assert!(child_line > root_line);
        // The child run is indented one level below the root.
        assert!(rendered.lines().nth(child_line).unwrap().starts_with("  run"));
    }

    #[test]
    fn stats_sum_usage_and_count_runs() {
        let rendered = render_stats(&sample_stream());
        assert!(rendered.contains("runs: 2  max depth: 1"));
        assert!(rendered.contains("tokens: prompt=12 completion=3 total=15"));
        assert!(rendered.contains("wall: 40 ms"));
        assert!(rendered.contains("run_start: 2"));
    }

    #[test]
    fn linear_lists_every_event_in_order() {
        let rendered = render_linear(&sample_stream());
        assert_eq!(rendered.lines().count(), 5);
        assert!(rendered.lines().next().unwrap().contains("run_start"));
        assert!(rendered.lines().last().unwrap().contains("final_result"));
    }

    #[test]
    fn previews_flatten_newlines_and_mark_truncation() {
        assert_eq!(preview("one\ntwo", 60), "one two");
        let long = "z".repeat(80);
        let clipped = preview(&long, 60);
        assert!(clipped.ends_with('…'));
        assert_eq!(clipped.chars().count(), 61);
    }
}
