//! Prompt preparation: trace + source -> annotated source -> prompt.
//!
//! Each sample is independent. A sample that cannot be prepared (missing
//! source file, malformed trace, nothing to annotate) is logged and counted,
//! and the batch moves on.

use crate::annotate::{annotate_branches, annotate_loops, AnnotatedSource};
use crate::config::Config;
use crate::dataset;
use crate::prompt::{assemble, describe_input, PromptParts, Task, TemplateFamily, Templates};
use crate::sanitize::{normalize_newlines, strip_comments_and_docstrings, strip_with_line_map};
use crate::store::{ArtifactKey, ArtifactStore, DirStore};
use crate::trace::{SampleId, TraceRecord};
use anyhow::Result;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SampleError {
    #[error("failed to read trace {path}: {source}")]
    ReadTrace {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("trace {path} is not valid JSON: {source}")]
    ParseTrace {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("code file not found at {0}")]
    MissingSource(PathBuf),
    #[error("failed to read code file {path}: {source}")]
    ReadSource {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no {0} constructs with recorded values")]
    NoConstructs(Task),
    #[error("failed to read example template {path}: {source}")]
    Template {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write output for {sample}: {source}")]
    Write {
        sample: SampleId,
        #[source]
        source: io::Error,
    },
}

/// Output of preparing one sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedSample {
    /// Cleaned, annotated source with a trailing newline
    pub annotated: String,
    pub prompt: String,
    pub matched: usize,
    pub unmatched: usize,
}

/// Turns trace records into prompts for one task.
#[derive(Debug)]
pub struct Preparer {
    task: Task,
    code_dir: PathBuf,
    templates: Templates,
    line_numbers: bool,
}

impl Preparer {
    pub fn new(task: Task, code_dir: impl Into<PathBuf>, templates: Templates) -> Self {
        Self {
            task,
            code_dir: code_dir.into(),
            templates,
            line_numbers: true,
        }
    }

    pub fn with_line_numbers(mut self, line_numbers: bool) -> Self {
        self.line_numbers = line_numbers;
        self
    }

    pub fn source_path(&self, id: &SampleId) -> PathBuf {
        self.code_dir.join(id.source_file_name())
    }

    /// Read the trace and its source file, then prepare.
    pub fn prepare_file(
        &mut self,
        id: &SampleId,
        trace_path: &Path,
    ) -> Result<PreparedSample, SampleError> {
        let text = fs::read_to_string(trace_path).map_err(|source| SampleError::ReadTrace {
            path: trace_path.to_path_buf(),
            source,
        })?;
        let record = TraceRecord::from_json(&text).map_err(|source| SampleError::ParseTrace {
            path: trace_path.to_path_buf(),
            source,
        })?;

        let code_path = self.source_path(id);
        if !code_path.is_file() {
            return Err(SampleError::MissingSource(code_path));
        }
        let source = fs::read_to_string(&code_path).map_err(|source| SampleError::ReadSource {
            path: code_path.clone(),
            source,
        })?;

        self.prepare(id, &record, &source)
    }

    pub fn prepare(
        &mut self,
        id: &SampleId,
        record: &TraceRecord,
        source: &str,
    ) -> Result<PreparedSample, SampleError> {
        let source = normalize_newlines(source);
        let annotated = self.annotate(record, &source)?;
        if annotated.matched == 0 {
            tracing::warn!(sample = %id, "No construct could be located; prompt has no markers");
        }
        let annotated_text = format!("{}\n", annotated.text());

        let task = self.task;
        let template_path = self
            .templates
            .path_for(task, TemplateFamily::for_sample(id));
        let example = self
            .templates
            .example(task, id)
            .map_err(|source| SampleError::Template {
                path: template_path,
                source,
            })?;
        let input = describe_input(record);
        let prompt = assemble(&PromptParts {
            task,
            example,
            source: &annotated_text,
            input: &input,
            line_numbers: self.line_numbers,
        });

        Ok(PreparedSample {
            annotated: annotated_text,
            prompt,
            matched: annotated.matched,
            unmatched: annotated.unmatched,
        })
    }

    fn annotate(&self, record: &TraceRecord, source: &str) -> Result<AnnotatedSource, SampleError> {
        match self.task {
            Task::Loop => {
                let loops = record.loops();
                if loops.is_empty() {
                    return Err(SampleError::NoConstructs(self.task));
                }
                let cleaned = strip_comments_and_docstrings(source);
                Ok(annotate_loops(&cleaned, &loops))
            }
            Task::Branch => {
                let lines = record.branch_lines();
                if lines.is_empty() {
                    return Err(SampleError::NoConstructs(self.task));
                }
                let cleaned = strip_with_line_map(source);
                Ok(annotate_branches(&cleaned, &lines))
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PrepareOptions {
    /// Difficulty splits to process; all of them when empty
    pub difficulties: Vec<String>,
    /// Regenerate prompts that already exist
    pub overwrite: bool,
    pub line_numbers: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrepareSummary {
    pub written: usize,
    pub skipped_existing: usize,
    pub failed: usize,
}

/// Prepare every trace of `task` under the configured dataset root.
pub fn run_prepare(config: &Config, task: Task, options: &PrepareOptions) -> Result<PrepareSummary> {
    let trace_root = config.paths.dataset_root.join(task.dataset_dir());
    let entries = dataset::scan(&trace_root, "json", &options.difficulties)?;

    let mut preparer = Preparer::new(
        task,
        config.code_dir(),
        Templates::new(&config.paths.templates_root),
    )
    .with_line_numbers(options.line_numbers);
    let mut prompts = DirStore::new(config.paths.prompts_root.join(task.prompt_dir()));
    let mut intermediate = DirStore::new(config.paths.prompts_root.join(task.intermediate_dir()));

    tracing::info!(task = %task, samples = entries.len(), root = %trace_root.display(), "Preparing prompts");
    let summary = prepare_entries(&mut preparer, &entries, &mut prompts, &mut intermediate, options.overwrite);
    tracing::info!(
        task = %task,
        written = summary.written,
        skipped = summary.skipped_existing,
        failed = summary.failed,
        "Prompt preparation finished"
    );
    Ok(summary)
}

/// Store-agnostic batch loop behind [`run_prepare`].
pub fn prepare_entries<P, I>(
    preparer: &mut Preparer,
    entries: &[dataset::Entry],
    prompts: &mut P,
    intermediate: &mut I,
    overwrite: bool,
) -> PrepareSummary
where
    P: ArtifactStore,
    I: ArtifactStore,
{
    let mut summary = PrepareSummary::default();
    for entry in entries {
        let key = ArtifactKey::new(&entry.difficulty, entry.id.clone());
        if !overwrite && prompts.contains(&key) {
            summary.skipped_existing += 1;
            continue;
        }

        let result = preparer
            .prepare_file(&entry.id, &entry.path)
            .and_then(|prepared| {
                intermediate
                    .write(&key, &prepared.annotated)
                    .and_then(|()| prompts.write(&key, &prepared.prompt))
                    .map_err(|source| SampleError::Write {
                        sample: entry.id.clone(),
                        source,
                    })?;
                Ok(prepared)
            });

        match result {
            Ok(prepared) => {
                tracing::debug!(
                    sample = %entry.id,
                    difficulty = %entry.difficulty,
                    matched = prepared.matched,
                    unmatched = prepared.unmatched,
                    "Prompt written"
                );
                summary.written += 1;
            }
            Err(err) => {
                tracing::warn!(sample = %entry.id, difficulty = %entry.difficulty, "Skipping: {err}");
                summary.failed += 1;
            }
        }
    }
    summary
}
