//! Append-only JSONL event stream shared by every agent of an invocation.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::usage::Usage;

/// Event kinds recorded in the stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RunStart,
    CodeGenerated,
    ExecutionResult,
    FinalResult,
    Error,
}

/// One record of the event stream.
///
/// For any `run_id`, records appear in non-decreasing `step` order;
/// `run_start` precedes all others for that run and `final_result`, when
/// present, is last.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogEvent {
    /// Milliseconds since the Unix epoch.
    pub time: i64,
    pub run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<String>,
    pub depth: u32,
    pub event_type: EventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(rename = "hasError", skip_serializing_if = "Option::is_none")]
    pub has_error: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Default)]
struct SinkState {
    file: Option<File>,
    path: Option<PathBuf>,
    closed: bool,
}

/// Shared append-only sink.
///
/// The file is created lazily on the first write; once created its path is
/// stable for the rest of the invocation. A record is written as one
/// pre-serialized line so partial records never appear.
#[derive(Debug)]
pub struct EventSink {
    dir: PathBuf,
    prefix: Option<String>,
    state: Mutex<SinkState>,
}

impl EventSink {
    pub fn new(dir: impl Into<PathBuf>, prefix: Option<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix,
            state: Mutex::new(SinkState::default()),
        }
    }

    /// Append one event. Logging failures are reported but never abort a run.
    pub fn append(&self, event: &LogEvent) {
        let mut line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!("failed to serialize log event: {err}");
                return;
            }
        };
        line.push('\n');

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return;
        }
        if state.file.is_none() {
            match self.open() {
                Ok((file, path)) => {
                    state.file = Some(file);
                    state.path = Some(path);
                }
                Err(err) => {
                    tracing::warn!("failed to open event log: {err}");
                    state.closed = true;
                    return;
                }
            }
        }
        if let Some(file) = state.file.as_mut()
            && let Err(err) = file.write_all(line.as_bytes())
        {
            tracing::warn!("failed to write event log: {err}");
        }
    }

    fn open(&self) -> std::io::Result<(File, PathBuf)> {
        std::fs::create_dir_all(&self.dir)?;
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let name = match &self.prefix {
            Some(prefix) => format!("{prefix}_{timestamp}.jsonl"),
            None => format!("rlm_{timestamp}.jsonl"),
        };
        let path = self.dir.join(name);
        let file = File::create(&path)?;
        Ok((file, path))
    }

    /// Path of the log file, once the first record has been written.
    pub fn log_file(&self) -> Option<PathBuf> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .path
            .clone()
    }

    /// Flush and close the sink. Further appends are dropped.
    pub fn flush(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(mut file) = state.file.take()
            && let Err(err) = file.flush()
        {
            tracing::warn!("failed to flush event log: {err}");
        }
        state.closed = true;
    }
}

/// Per-agent view of the sink: owns the run id and the step ordering.
#[derive(Debug)]
pub struct RunLogger {
    sink: Arc<EventSink>,
    run_id: String,
    parent_run_id: Option<String>,
    depth: u32,
    step: AtomicU32,
}

impl RunLogger {
    /// Assign a fresh run id and write the `run_start` record.
    pub fn start(
        sink: Arc<EventSink>,
        depth: u32,
        parent_run_id: Option<String>,
        query: &str,
    ) -> Self {
        let logger = Self {
            sink,
            run_id: Uuid::new_v4().simple().to_string(),
            parent_run_id,
            depth,
            step: AtomicU32::new(0),
        };
        let mut event = logger.base(EventType::RunStart);
        event.query = Some(query.to_string());
        logger.sink.append(&event);
        logger
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    fn base(&self, event_type: EventType) -> LogEvent {
        LogEvent {
            time: Utc::now().timestamp_millis(),
            run_id: self.run_id.clone(),
            parent_run_id: self.parent_run_id.clone(),
            depth: self.depth,
            event_type,
            step: None,
            code: None,
            output: None,
            has_error: None,
            reasoning: None,
            usage: None,
            query: None,
            result: None,
            error: None,
        }
    }

    fn next_step(&self) -> u32 {
        self.step.fetch_add(1, Ordering::SeqCst)
    }

    /// Step 0: the seed program and its captured output.
    pub fn seed(&self, code: &str, output: &str) {
        let mut event = self.base(EventType::ExecutionResult);
        event.step = Some(self.next_step());
        event.code = Some(code.to_string());
        event.output = Some(output.to_string());
        event.has_error = Some(false);
        event.usage = Some(Usage::default());
        self.sink.append(&event);
    }

    /// A model turn that produced code but no observable output (extraction
    /// failure or a terminating turn).
    pub fn code_generated(&self, code: &str, reasoning: Option<Value>, usage: &Usage) {
        let mut event = self.base(EventType::CodeGenerated);
        event.step = Some(self.next_step());
        event.code = Some(code.to_string());
        event.reasoning = reasoning;
        event.usage = Some(usage.clone());
        self.sink.append(&event);
    }

    /// A full turn: code, rendered output, and the call's usage.
    pub fn execution_result(
        &self,
        code: &str,
        output: &str,
        has_error: bool,
        reasoning: Option<Value>,
        usage: &Usage,
    ) {
        let mut event = self.base(EventType::ExecutionResult);
        event.step = Some(self.next_step());
        event.code = Some(code.to_string());
        event.output = Some(output.to_string());
        event.has_error = Some(has_error);
        event.reasoning = reasoning;
        event.usage = Some(usage.clone());
        self.sink.append(&event);
    }

    /// The agent's final value. Last record for this run.
    pub fn final_result(&self, result: &Value) {
        let mut event = self.base(EventType::FinalResult);
        event.step = Some(self.next_step());
        event.result = Some(result.clone());
        self.sink.append(&event);
    }

    /// A failure that ends this run.
    pub fn error(&self, message: &str) {
        let mut event = self.base(EventType::Error);
        event.step = Some(self.next_step());
        event.error = Some(message.to_string());
        self.sink.append(&event);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    fn read_events(sink: &EventSink) -> Vec<LogEvent> {
        let path = sink.log_file().expect("log file created");
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn sink_opens_lazily_and_path_stays_stable() {
        let dir = TempDir::new().unwrap();
        let sink = EventSink::new(dir.path(), Some("trial".to_string()));
        assert_eq!(sink.log_file(), None);

        let logger = RunLogger::start(Arc::new(sink), 0, None, "q");
        let sink = logger.sink.clone();
        let path = sink.log_file().expect("opened on first write");
        logger.seed("print(1)", "1\n");
        assert_eq!(sink.log_file(), Some(path.clone()));
        assert!(
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("trial_") && name.ends_with(".jsonl"))
        );
    }

    #[test]
    fn events_round_trip_through_jsonl() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(EventSink::new(dir.path(), None));
        let logger = RunLogger::start(Arc::clone(&sink), 1, Some("parent".to_string()), "the query");
        logger.execution_result(
            "print('x')",
            "[FULL OUTPUT SHOWN]... x",
            false,
            Some(json!({"summary": "thinking"})),
            &Usage {
                prompt_tokens: 3,
                completion_tokens: 1,
                total_tokens: 4,
                ..Usage::default()
            },
        );
        logger.final_result(&json!("done"));

        let events = read_events(&sink);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event_type, EventType::RunStart);
        assert_eq!(events[0].query.as_deref(), Some("the query"));
        assert_eq!(events[0].parent_run_id.as_deref(), Some("parent"));
        assert_eq!(events[0].depth, 1);
        assert_eq!(events[1].event_type, EventType::ExecutionResult);
        assert_eq!(events[1].step, Some(0));
        assert_eq!(events[1].has_error, Some(false));
        assert_eq!(events[1].reasoning, Some(json!({"summary": "thinking"})));
        assert_eq!(events[1].usage.as_ref().unwrap().total_tokens, 4);
        assert_eq!(events[2].event_type, EventType::FinalResult);
        assert_eq!(events[2].result, Some(json!("done")));
        // Every record of one run carries the same id.
        assert!(events.iter().all(|event| event.run_id == events[0].run_id));
    }

    #[test]
    fn steps_are_monotone_and_run_start_comes_first() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(EventSink::new(dir.path(), None));
        let logger = RunLogger::start(Arc::clone(&sink), 0, None, "q");
        logger.seed("seed", "out");
        logger.code_generated("", None, &Usage::default());
        logger.execution_result("code", "out", true, None, &Usage::default());

        let events = read_events(&sink);
        assert_eq!(events[0].event_type, EventType::RunStart);
        assert_eq!(events[0].step, None);
        let steps: Vec<u32> = events.iter().filter_map(|event| event.step).collect();
        assert_eq!(steps, vec![0, 1, 2]);
    }

    #[test]
    fn flush_closes_the_sink() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(EventSink::new(dir.path(), None));
        let logger = RunLogger::start(Arc::clone(&sink), 0, None, "q");
        sink.flush();
        logger.seed("seed", "dropped");
        let path = sink.log_file().expect("path survives flush");
        let contents = std::fs::read_to_string(path).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[test]
    fn serialized_records_omit_absent_fields() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(EventSink::new(dir.path(), None));
        let logger = RunLogger::start(Arc::clone(&sink), 0, None, "q");
        drop(logger);
        let path = sink.log_file().unwrap();
        let line = std::fs::read_to_string(path).unwrap();
        assert!(!line.contains("parent_run_id"));
        assert!(!line.contains("hasError"));
        assert!(line.contains("\"event_type\":\"run_start\""));
    }
}
