//! Embedded Python sandbox hosting one agent's REPL session.
//!
//! The sandbox keeps one persistent global namespace per agent, captures
//! everything printed into an adapter-owned buffer, and exposes a single host
//! callable (`llm_query`) through which sandboxed code reaches back into the
//! driver. Exceptions raised by sandboxed code never propagate to the host;
//! they are appended to the captured output as an `Error:` line and become
//! part of the normal turn feedback.

use std::ffi::CString;
use std::sync::Arc;

use anyhow::Result;
use anyhow::anyhow;
use pyo3::IntoPyObjectExt;
use pyo3::exceptions::PyRuntimeError;
use pyo3::prelude::*;
use pyo3::types::PyDict;
use pyo3::types::PyList;
use serde_json::Value;

/// Name of the Python global the agent loop polls for termination.
pub const FINAL_RESULT_GLOBAL: &str = "__final_result__";

/// Host callback reachable from sandboxed code as `llm_query(...)`.
///
/// Implementations run a child agent to completion and hand its final value
/// back into the Python runtime.
pub trait LlmCallback: Send + Sync {
    fn call(&self, context: &str) -> Result<Value>;
}

#[pyclass]
struct LlmQueryHandler {
    callback: Arc<dyn LlmCallback>,
}

#[pymethods]
impl LlmQueryHandler {
    fn call(&self, py: Python<'_>, context: String) -> PyResult<Py<PyAny>> {
        let value = py
            .detach(|| self.callback.call(&context))
            .map_err(|err| PyRuntimeError::new_err(err.to_string()))?;
        value_to_py(py, &value)
    }
}

pub struct Sandbox {
    globals: Py<PyDict>,
    stdout: String,
}

impl Sandbox {
    /// Create a fresh interpreter namespace with the host helper functions
    /// (`FINAL`, `FINAL_VAR`, `llm_query`) installed.
    pub fn new() -> Result<Self> {
        Python::attach(|py| {
            let globals = PyDict::new(py);
            let helpers = CString::new(HELPERS_CODE)?;
            py.run(helpers.as_c_str(), Some(&globals), Some(&globals))?;
            globals.set_item(FINAL_RESULT_GLOBAL, py.None())?;
            Ok(Self {
                globals: globals.unbind(),
                stdout: String::new(),
            })
        })
    }

    /// Install a host string into the Python globals.
    pub fn bind_str(&mut self, name: &str, value: &str) -> Result<()> {
        Python::attach(|py| {
            let globals = self.globals.bind(py);
            globals.set_item(name, value)?;
            Ok(())
        })
    }

    /// Wire the `llm_query` builtin to a host callback.
    pub fn bind_llm_query(&mut self, callback: Arc<dyn LlmCallback>) -> Result<()> {
        Python::attach(|py| {
            let globals = self.globals.bind(py);
            let handler = Py::new(py, LlmQueryHandler { callback })?;
            globals.set_item("_llm_handler", handler)?;
            Ok(())
        })
    }

    /// Execute `code` in the persistent namespace.
    ///
    /// Captured stdout/stderr is appended to the adapter's buffer. If the code
    /// raises, the exception text is appended as `"\nError: <msg>"` instead of
    /// propagating; `run` only fails when the interpreter itself misbehaves.
    pub fn run(&mut self, code: &str) -> Result<()> {
        let (output, error) = Python::attach(|py| -> Result<(String, Option<String>)> {
            let globals = self.globals.bind(py);
            globals.set_item("_code", code)?;
            let wrapper = CString::new(CAPTURE_CODE)?;
            py.run(wrapper.as_c_str(), Some(globals), Some(globals))?;
            let output = globals
                .get_item("_output")?
                .ok_or_else(|| anyhow!("missing _output"))?
                .extract::<String>()?;
            let error = globals
                .get_item("_error")?
                .and_then(|item| item.extract::<Option<String>>().ok())
                .flatten();
            let _ = globals.del_item("_code");
            let _ = globals.del_item("_output");
            let _ = globals.del_item("_error");
            Ok((output, error))
        })?;
        self.stdout.push_str(&output);
        if let Some(error) = error {
            self.stdout.push_str("\nError: ");
            self.stdout.push_str(&error);
        }
        Ok(())
    }

    /// Return and clear the accumulated stdout buffer.
    pub fn take_stdout(&mut self) -> String {
        std::mem::take(&mut self.stdout)
    }

    pub fn clear_stdout(&mut self) {
        self.stdout.clear();
    }

    /// Read `__final_result__`. Unset and Python `None` are both the
    /// no-result sentinel; anything else is converted to the host's native
    /// representation (JSON where possible, `str()` otherwise).
    pub fn read_final(&self) -> Result<Option<Value>> {
        Python::attach(|py| {
            let globals = self.globals.bind(py);
            let Some(object) = globals.get_item(FINAL_RESULT_GLOBAL)? else {
                return Ok(None);
            };
            if object.is_none() {
                return Ok(None);
            }
            let json = py.import("json")?;
            match json.call_method1("dumps", (&object,)) {
                Ok(encoded) => {
                    let encoded: String = encoded.extract()?;
                    Ok(Some(serde_json::from_str(&encoded)?))
                }
                Err(_) => {
                    let rendered: String = object.str()?.extract()?;
                    Ok(Some(Value::String(rendered)))
                }
            }
        })
    }
}

fn value_to_py(py: Python<'_>, value: &Value) -> PyResult<Py<PyAny>> {
    match value {
        Value::Null => Ok(py.None()),
        Value::Bool(flag) => flag.into_py_any(py),
        Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                int.into_py_any(py)
            } else if let Some(uint) = number.as_u64() {
                uint.into_py_any(py)
            } else {
                number.as_f64().unwrap_or(f64::NAN).into_py_any(py)
            }
        }
        Value::String(text) => text.into_py_any(py),
        Value::Array(items) => {
            let list = PyList::empty(py);
            for item in items {
                list.append(value_to_py(py, item)?)?;
            }
            list.into_py_any(py)
        }
        Value::Object(map) => {
            let dict = PyDict::new(py);
            for (key, item) in map {
                dict.set_item(key, value_to_py(py, item)?)?;
            }
            dict.into_py_any(py)
        }
    }
}

const HELPERS_CODE: &str = r#"def FINAL(value):
    global __final_result__
    __final_result__ = value
    return value


def FINAL_VAR(value):
    global __final_result__
    __final_result__ = value
    return value


def llm_query(context):
    handler = globals().get("_llm_handler")
    if handler is None:
        raise RuntimeError("llm_query is not configured")
    return handler.call(str(context))
"#;

const CAPTURE_CODE: &str = r#"import io
import sys

_buf = io.StringIO()
_old_stdout = sys.stdout
_old_stderr = sys.stderr
sys.stdout = _buf
sys.stderr = _buf
_error = None
try:
    exec(_code, globals())
except BaseException as _exc:
    _error = str(_exc) or type(_exc).__name__
finally:
    sys.stdout = _old_stdout
    sys.stderr = _old_stderr
_output = _buf.getvalue()
del _buf
"#;

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn captures_prints_and_persists_globals_across_runs() {
        let mut sandbox = Sandbox::new().unwrap();
        sandbox.run("x = 21\nprint('first')").unwrap();
        sandbox.run("print(x * 2)").unwrap();
        assert_eq!(sandbox.take_stdout(), "first\n42\n");
        // The buffer was drained.
        assert_eq!(sandbox.take_stdout(), "");
    }

    #[test]
    fn exceptions_append_an_error_line_instead_of_propagating() {
        let mut sandbox = Sandbox::new().unwrap();
        sandbox.run("print('before')\nraise ValueError('boom')").unwrap();
        let output = sandbox.take_stdout();
        assert_eq!(output, "before\n\nError: boom");
    }

    #[test]
    fn bound_context_is_visible_to_python() {
        let mut sandbox = Sandbox::new().unwrap();
        sandbox.bind_str("context", "hello world").unwrap();
        sandbox.run("print(len(context))").unwrap();
        assert_eq!(sandbox.take_stdout(), "11\n");
    }

    #[test]
    fn final_result_defaults_to_the_unset_sentinel() {
        let mut sandbox = Sandbox::new().unwrap();
        assert_eq!(sandbox.read_final().unwrap(), None);
        // Assigning None keeps the sentinel: FINAL(None) does not terminate.
        sandbox.run("FINAL(None)").unwrap();
        assert_eq!(sandbox.read_final().unwrap(), None);
    }

    #[test]
    fn final_converts_to_native_json_values() {
        let mut sandbox = Sandbox::new().unwrap();
        sandbox.run("FINAL({'answer': [1, 2, 3], 'ok': True})").unwrap();
        assert_eq!(
            sandbox.read_final().unwrap(),
            Some(json!({"answer": [1, 2, 3], "ok": true}))
        );
    }

    #[test]
    fn unserializable_final_falls_back_to_str() {
        let mut sandbox = Sandbox::new().unwrap();
        sandbox.run("FINAL({1, 2} - {2})").unwrap();
        assert_eq!(sandbox.read_final().unwrap(), Some(json!("{1}")));
    }

    #[test]
    fn final_var_behaves_like_final() {
        let mut sandbox = Sandbox::new().unwrap();
        sandbox.run("answer = 'via variable'\nFINAL_VAR(answer)").unwrap();
        assert_eq!(sandbox.read_final().unwrap(), Some(json!("via variable")));
    }

    #[test]
    fn unconfigured_llm_query_reports_through_the_output_channel() {
        let mut sandbox = Sandbox::new().unwrap();
        sandbox.run("llm_query('anything')").unwrap();
        assert!(sandbox.take_stdout().contains("Error: llm_query is not configured"));
    }

    #[test]
    fn llm_query_round_trips_through_the_host_callback() {
        struct Echo;
        impl LlmCallback for Echo {
            fn call(&self, context: &str) -> Result<Value> {
                Ok(json!(format!("echo: {context}")))
            }
        }

        let mut sandbox = Sandbox::new().unwrap();
        sandbox.bind_llm_query(Arc::new(Echo)).unwrap();
        sandbox.run("print(llm_query('ping'))").unwrap();
        assert_eq!(sandbox.take_stdout(), "echo: ping\n");
    }

    #[test]
    fn host_callback_errors_surface_as_error_lines() {
        struct Refuse;
        impl LlmCallback for Refuse {
            fn call(&self, _context: &str) -> Result<Value> {
                Err(anyhow!("MAXIMUM DEPTH REACHED"))
            }
        }

        let mut sandbox = Sandbox::new().unwrap();
        sandbox.bind_llm_query(Arc::new(Refuse)).unwrap();
        sandbox.run("llm_query('too deep')").unwrap();
        assert!(sandbox.take_stdout().contains("Error: MAXIMUM DEPTH REACHED"));
    }
}
