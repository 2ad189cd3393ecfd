//! Trace records: the persisted ground truth for one benchmark sample.
//!
//! A trace file carries the recorded loop iterations or branch decisions for
//! one code sample, plus the method input the trace was produced with. The
//! same file feeds both the annotation step and the input section of the
//! prompt.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

/// One sample's trace file, as written by the tracer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TraceRecord {
    /// Method under test, when the sample is a single method
    #[serde(default)]
    pub name: Option<String>,
    /// Recorded input; `{"raw_input": "..."}` when no structured input exists
    #[serde(default)]
    pub input: Option<Value>,
    #[serde(default)]
    loops: Option<Map<String, Value>>,
    #[serde(default)]
    branches: Option<BranchTrace>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct BranchTrace {
    #[serde(default)]
    decisions: Vec<BranchDecision>,
}

#[derive(Debug, Clone, Deserialize)]
struct BranchDecision {
    /// Kept loose so one malformed decision does not reject the record
    #[serde(default)]
    line: Option<Value>,
}

impl BranchDecision {
    /// The decision's 1-based source line, if it is a positive integer.
    fn line(&self) -> Option<u32> {
        self.line
            .as_ref()
            .and_then(Value::as_u64)
            .and_then(|line| u32::try_from(line).ok())
            .filter(|&line| line > 0)
    }
}

/// Raw loop entry inside `loops`.
#[derive(Debug, Clone, Default, Deserialize)]
struct LoopTrace {
    #[serde(default)]
    loop_var: Option<String>,
    #[serde(default)]
    control_var: Option<String>,
    #[serde(default)]
    control_vars: Option<Value>,
    #[serde(default)]
    line: Option<i64>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    iterations: Vec<Iteration>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Iteration {
    #[serde(default)]
    loop_variables: Option<Map<String, Value>>,
    #[serde(default)]
    control_variable: Option<Value>,
    #[serde(default)]
    control_variables: Option<Map<String, Value>>,
}

impl Iteration {
    fn has_loop_value(&self) -> bool {
        self.loop_variables
            .as_ref()
            .is_some_and(|vars| vars.values().any(|v| !v.is_null()))
    }

    fn has_control_value(&self) -> bool {
        let single = match &self.control_variable {
            Some(Value::Object(obj)) => obj.get("value").is_some_and(|v| !v.is_null()),
            Some(Value::Null) | None => false,
            Some(_) => true,
        };
        single
            || self
                .control_variables
                .as_ref()
                .is_some_and(|vars| vars.values().any(|v| !v.is_null()))
    }
}

/// A loop worth annotating, normalized from its trace entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopDescriptor {
    /// Key of the loop in the trace record
    pub id: String,
    /// Declared loop variable, possibly a combined name such as `k, v`
    pub loop_var: Option<String>,
    /// Individual per-iteration variable names, in recorded order
    pub loop_vars: Vec<String>,
    pub control_var: Option<String>,
    /// Source line in the original file (-1 when unknown)
    pub line: i64,
    /// Source text of the loop header
    pub code: String,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn first_control_var(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Array(items) => items.first().and_then(Value::as_str).map(str::to_string),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

impl TraceRecord {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Loops that have at least one iteration with a recorded value and a
    /// variable to ask about. Entries that fail to parse are skipped.
    pub fn loops(&self) -> Vec<LoopDescriptor> {
        let Some(loops) = &self.loops else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for (id, raw) in loops {
            let entry: LoopTrace = match serde_json::from_value(raw.clone()) {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::debug!(loop_id = %id, error = %err, "Ignoring malformed loop entry");
                    continue;
                }
            };

            let loop_var = non_empty(entry.loop_var);
            let control_var = non_empty(entry.control_var)
                .or_else(|| non_empty(first_control_var(entry.control_vars.as_ref())));

            let mut loop_vars: Vec<String> = Vec::new();
            let mut has_valid_iteration = false;
            for iteration in &entry.iterations {
                if loop_vars.is_empty() {
                    if let Some(vars) = &iteration.loop_variables {
                        loop_vars = vars.keys().cloned().collect();
                    }
                }
                if iteration.has_loop_value() || iteration.has_control_value() {
                    has_valid_iteration = true;
                    break;
                }
            }

            if !has_valid_iteration || (loop_var.is_none() && control_var.is_none()) {
                continue;
            }

            out.push(LoopDescriptor {
                id: id.clone(),
                loop_var,
                loop_vars,
                control_var,
                line: entry.line.unwrap_or(-1),
                code: entry.code.unwrap_or_default(),
            });
        }
        out
    }

    /// Unique branch decision lines (1-based, ascending).
    pub fn branch_lines(&self) -> BTreeSet<u32> {
        self.branches
            .iter()
            .flat_map(|b| b.decisions.iter())
            .filter_map(|d| {
                let line = d.line();
                if line.is_none() {
                    tracing::warn!(line = ?d.line, "Skipping branch decision without a usable line");
                }
                line
            })
            .collect()
    }
}

/// Identifier of a sample, derived from its trace file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SampleId(String);

impl SampleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// `foo.json` -> `foo`. Returns `None` for anything that is not a `.json` file.
    pub fn from_trace_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        name.strip_suffix(".json").map(Self::new)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the source file this sample's trace was recorded from.
    ///
    /// `ClassEval_<N>@<Class>.<method>` drops everything up to `@`;
    /// `sample_<X>` becomes `cruxeval_<X>`; everything else maps 1:1.
    pub fn source_file_name(&self) -> String {
        let mut base = self.0.as_str();
        if base.starts_with("ClassEval_") {
            if let Some((_, rest)) = base.split_once('@') {
                base = rest;
            }
        }
        let base = match base.strip_prefix("sample_") {
            Some(rest) => format!("cruxeval_{rest}"),
            None => base.to_string(),
        };
        format!("{base}.py")
    }
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
