//! Prompt assembly: instructions, worked example, annotated source, input.

use crate::trace::{SampleId, TraceRecord};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;

/// Which runtime property the prompt asks the model to predict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Task {
    /// Variable states across loop iterations
    Loop,
    /// Whether each branch is taken
    Branch,
}

impl Task {
    /// Directory name under the dataset root holding this task's traces.
    pub fn dataset_dir(&self) -> &'static str {
        match self {
            Task::Loop => "loop",
            Task::Branch => "branch",
        }
    }

    /// Directory name used for prompts, templates and results.
    pub fn prompt_dir(&self) -> &'static str {
        match self {
            Task::Loop => "loop_prediction",
            Task::Branch => "branch_prediction",
        }
    }

    pub fn intermediate_dir(&self) -> String {
        format!("{}-intermediate", self.prompt_dir())
    }

    pub fn instruction(&self) -> &'static str {
        match self {
            Task::Loop => LOOP_INSTRUCTION,
            Task::Branch => BRANCH_INSTRUCTION,
        }
    }

    fn closing(&self) -> &'static str {
        match self {
            Task::Loop => "Complete the loop annotations in the code with variable states.",
            Task::Branch => "Complete the branch annotations in the code with branch decisions.",
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dataset_dir())
    }
}

const LOOP_INSTRUCTION: &str = "\
You will be given:
1. A Python code snippet wrapped in [PYTHON] ... [/PYTHON]. Loop headers carry markers in comments of the form ## [STATE]{VARIABLE_NAME}=??[/STATE].
2. A method input wrapped in [INPUT] ... [/INPUT].
Your task is to replace every \"??\" between [STATE] and [/STATE] with your prediction of the states that variable takes in that loop.

Detailed Instructions:
* Replace ?? with a list.
* Markers appear on for loops, while loops and comprehensions.
* If a variable keeps the same value for K iterations, repeat that value K times in its state.
* Determine variable states by tracing the code step by step. Wrap your reasoning in [THOUGHT] ... [/THOUGHT]
* Output the fully annotated code (with ?? replaced) wrapped in [ANSWER] ... [/ANSWER]
* Do not remove, reorder, or add any code lines.
* Preserve the original line numbers exactly as they appear in the [PYTHON] ... [/PYTHON] block.
";

const BRANCH_INSTRUCTION: &str = "\
You will be given:
1. A Python code snippet wrapped in [PYTHON] ... [/PYTHON]. Branch conditions carry markers in comments of the form ## [BRANCH]taken=??[/BRANCH].
2. A method input wrapped in [INPUT] ... [/INPUT].
Your task is to replace every \"??\" between [BRANCH] and [/BRANCH] with your prediction of whether that branch is taken.

Detailed Instructions:
* Replace ?? with a list of True/False values, one per evaluation of the condition, in execution order.
* Use an empty list [] if the condition is never evaluated.
* Determine branch decisions by tracing the code step by step. Wrap your reasoning in [THOUGHT] ... [/THOUGHT]
* Output the fully annotated code (with ?? replaced) wrapped in [ANSWER] ... [/ANSWER]
* Do not remove, reorder, or add any code lines.
* Preserve the original line numbers exactly as they appear in the [PYTHON] ... [/PYTHON] block.
";

/// Worked-example family, chosen from the sample id prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateFamily {
    HumanEvalCruxEval,
    Avatar,
    ClassEval,
    SweBench,
}

/// Prefix -> family. Anything unlisted uses [`TemplateFamily::SweBench`].
const FAMILY_PREFIXES: &[(&str, TemplateFamily)] = &[
    ("HumanEval", TemplateFamily::HumanEvalCruxEval),
    ("sample", TemplateFamily::HumanEvalCruxEval),
    ("atcoder", TemplateFamily::Avatar),
    ("codeforces", TemplateFamily::Avatar),
    ("ClassEval", TemplateFamily::ClassEval),
];

impl TemplateFamily {
    pub fn for_sample(id: &SampleId) -> Self {
        FAMILY_PREFIXES
            .iter()
            .find(|(prefix, _)| id.as_str().starts_with(prefix))
            .map(|(_, family)| *family)
            .unwrap_or(TemplateFamily::SweBench)
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            TemplateFamily::HumanEvalCruxEval => "humaneval_cruxeval.txt",
            TemplateFamily::Avatar => "avatar.txt",
            TemplateFamily::ClassEval => "classeval.txt",
            TemplateFamily::SweBench => "swebench.txt",
        }
    }
}

/// Worked examples on disk, read once per (task, family).
#[derive(Debug)]
pub struct Templates {
    root: PathBuf,
    cache: HashMap<(Task, TemplateFamily), String>,
}

impl Templates {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: HashMap::new(),
        }
    }

    pub fn path_for(&self, task: Task, family: TemplateFamily) -> PathBuf {
        self.root.join(task.prompt_dir()).join(family.file_name())
    }

    pub fn example(&mut self, task: Task, id: &SampleId) -> io::Result<&str> {
        let family = TemplateFamily::for_sample(id);
        if !self.cache.contains_key(&(task, family)) {
            let text = fs::read_to_string(self.path_for(task, family))?;
            self.cache.insert((task, family), text);
        }
        Ok(self
            .cache
            .get(&(task, family))
            .map(String::as_str)
            .unwrap_or_default())
    }
}

fn to_pretty_json(value: &Value) -> String {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    if value.serialize(&mut ser).is_err() {
        return value.to_string();
    }
    String::from_utf8(buf).unwrap_or_else(|_| value.to_string())
}

/// Natural-language rendering of the recorded method input.
pub fn describe_input(record: &TraceRecord) -> String {
    let input = record.input.clone().unwrap_or(Value::Null);
    if let Some(name) = record.name.as_deref().filter(|n| !n.is_empty()) {
        return format!(
            "The input to the method ```{name}``` is: \n {}",
            to_pretty_json(&input)
        );
    }
    let raw = match input.get("raw_input") {
        Some(Value::String(raw)) => raw.clone(),
        Some(other) => other.to_string(),
        None => to_pretty_json(&input),
    };
    format!("The input is: \n {raw}")
}

/// Prefix each line with its 1-based number.
pub fn number_lines(text: &str) -> String {
    text.lines()
        .enumerate()
        .map(|(idx, line)| format!("{} {}", idx + 1, line.trim_end()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Everything that goes into one prompt.
#[derive(Debug, Clone, Copy)]
pub struct PromptParts<'a> {
    pub task: Task,
    pub example: &'a str,
    pub source: &'a str,
    pub input: &'a str,
    pub line_numbers: bool,
}

pub fn assemble(parts: &PromptParts<'_>) -> String {
    let source = if parts.line_numbers {
        number_lines(parts.source)
    } else {
        parts.source.trim_end_matches('\n').to_string()
    };
    format!(
        "{instruction}\nPlease follow the format in the example below:\n\n{example}\n\n[PYTHON]\n{source}\n[/PYTHON]\n\n[INPUT]\n{input}\n[/INPUT]\n\n{closing}\n",
        instruction = parts.task.instruction(),
        example = parts.example.trim_end(),
        input = parts.input,
        closing = parts.task.closing(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_template_family_table() {
        let cases = [
            ("HumanEval_3", TemplateFamily::HumanEvalCruxEval),
            ("sample_12", TemplateFamily::HumanEvalCruxEval),
            ("atcoder_ABC123_A", TemplateFamily::Avatar),
            ("codeforces_99_B", TemplateFamily::Avatar),
            ("ClassEval_4@Stack.push", TemplateFamily::ClassEval),
            ("django__django-1234@views.get", TemplateFamily::SweBench),
            ("", TemplateFamily::SweBench),
        ];
        for (id, family) in cases {
            assert_eq!(TemplateFamily::for_sample(&SampleId::new(id)), family, "{id}");
        }
    }

    #[test]
    fn test_describe_input_with_method_name() {
        let record = TraceRecord::from_json(r#"{"name": "add", "input": {"a": 1, "b": [2]}}"#).unwrap();
        assert_eq!(
            describe_input(&record),
            "The input to the method ```add``` is: \n {\n    \"a\": 1,\n    \"b\": [\n        2\n    ]\n}"
        );
    }

    #[test]
    fn test_describe_input_raw_fallback() {
        let record = TraceRecord::from_json(r#"{"input": {"raw_input": "3\n1 2 3"}}"#).unwrap();
        assert_eq!(describe_input(&record), "The input is: \n 3\n1 2 3");
    }

    #[test]
    fn test_number_lines() {
        assert_eq!(number_lines("a  \n  b\n"), "1 a\n2   b");
    }

    #[test]
    fn test_assemble_layout() {
        let prompt = assemble(&PromptParts {
            task: Task::Loop,
            example: "EXAMPLE\n",
            source: "for i in x:## [STATE]i=??[/STATE]\n    pass",
            input: "The input is: \n 1",
            line_numbers: true,
        });
        assert!(prompt.starts_with(LOOP_INSTRUCTION));
        assert!(prompt.contains(
            "\nPlease follow the format in the example below:\n\nEXAMPLE\n\n[PYTHON]\n1 for i in x:## [STATE]i=??[/STATE]\n2     pass\n[/PYTHON]\n\n[INPUT]\nThe input is: \n 1\n[/INPUT]\n\n"
        ));
        assert!(prompt.ends_with("Complete the loop annotations in the code with variable states.\n"));
    }

    #[test]
    fn test_templates_are_cached_per_family() {
        let dir = TempDir::new().unwrap();
        let task_dir = dir.path().join("branch_prediction");
        fs::create_dir_all(&task_dir).unwrap();
        fs::write(task_dir.join("avatar.txt"), "avatar example").unwrap();

        let mut templates = Templates::new(dir.path());
        let id = SampleId::new("atcoder_1");
        assert_eq!(templates.example(Task::Branch, &id).unwrap(), "avatar example");

        fs::remove_file(task_dir.join("avatar.txt")).unwrap();
        assert_eq!(templates.example(Task::Branch, &id).unwrap(), "avatar example");
        assert!(templates
            .example(Task::Branch, &SampleId::new("ClassEval_1@A.b"))
            .is_err());
    }
}
