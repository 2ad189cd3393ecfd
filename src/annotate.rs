//! Placeholder injection.
//!
//! Markers are appended to the end of the line they describe, never on a line
//! of their own, so annotating never changes the line count.

use crate::locate::{locate_branch, locate_loop, LineIndex, LoopTarget};
use crate::sanitize::CleanedSource;
use crate::trace::LoopDescriptor;
use std::collections::{BTreeMap, BTreeSet};

/// Leader that turns a marker into a Python comment.
pub const MARKER_LEADER: &str = "## ";

pub const BRANCH_CLAUSE: &str = "[BRANCH]taken=??[/BRANCH]";

/// `[STATE]<name>=??[/STATE]`
pub fn state_clause(name: &str) -> String {
    format!("[STATE]{name}=??[/STATE]")
}

/// Marker for one loop: its iteration variables (or the combined declared
/// name when no per-iteration names were recorded), then the control
/// variable.
pub fn loop_marker(desc: &LoopDescriptor) -> String {
    let mut clauses: Vec<String> = if desc.loop_vars.is_empty() {
        desc.loop_var.iter().map(|v| state_clause(v)).collect()
    } else {
        desc.loop_vars.iter().map(|v| state_clause(v)).collect()
    };
    if let Some(control) = &desc.control_var {
        clauses.push(state_clause(control));
    }
    format!("{MARKER_LEADER}{}", clauses.join(" "))
}

/// Line suffixes keyed by cleaned line index. One suffix per line; the
/// first construct to claim a line keeps it.
#[derive(Debug, Clone, Default)]
pub struct Annotations {
    suffixes: BTreeMap<LineIndex, String>,
}

impl Annotations {
    /// Returns false when the line already carries a marker.
    pub fn attach(&mut self, line: LineIndex, suffix: impl Into<String>) -> bool {
        match self.suffixes.entry(line) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(suffix.into());
                true
            }
        }
    }

    /// Number of annotated lines.
    pub(crate) fn matched(&self) -> usize {
        self.suffixes.len()
    }

    /// Copy of `lines` with each annotated line's suffix appended in place.
    pub fn apply<S: AsRef<str>>(&self, lines: &[S]) -> Vec<String> {
        lines
            .iter()
            .enumerate()
            .map(|(idx, line)| match self.suffixes.get(&idx) {
                Some(suffix) => format!("{}{suffix}", line.as_ref()),
                None => line.as_ref().to_string(),
            })
            .collect()
    }
}

/// Annotated source plus bookkeeping for logs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotatedSource {
    pub lines: Vec<String>,
    pub matched: usize,
    pub unmatched: usize,
}

impl AnnotatedSource {
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

/// Attach a state marker to every loop that can be located. Loops that
/// cannot be found are left out.
pub fn annotate_loops(cleaned: &str, loops: &[LoopDescriptor]) -> AnnotatedSource {
    let lines: Vec<&str> = cleaned.split('\n').collect();
    let mut annotations = Annotations::default();
    let mut unmatched = 0;

    for desc in loops {
        match locate_loop(&lines, &LoopTarget::from(desc)) {
            Some(idx) => {
                if !annotations.attach(idx, loop_marker(desc)) {
                    tracing::debug!(loop_id = %desc.id, line = idx + 1, "Line already annotated");
                }
            }
            None => {
                tracing::debug!(loop_id = %desc.id, code = %desc.code, "Loop not found in cleaned source");
                unmatched += 1;
            }
        }
    }

    AnnotatedSource {
        matched: annotations.matched(),
        lines: annotations.apply(&lines),
        unmatched,
    }
}

/// Attach a branch marker to every decision line that survived stripping.
pub fn annotate_branches(cleaned: &CleanedSource, branch_lines: &BTreeSet<u32>) -> AnnotatedSource {
    let mut annotations = Annotations::default();
    let mut unmatched = 0;

    for &line in branch_lines {
        match locate_branch(cleaned, line) {
            Some(idx) => {
                annotations.attach(idx, format!(" {MARKER_LEADER}{BRANCH_CLAUSE}"));
            }
            None => {
                tracing::warn!(line, "Branch line was removed during cleaning; skipping");
                unmatched += 1;
            }
        }
    }

    AnnotatedSource {
        matched: annotations.matched(),
        lines: annotations.apply(cleaned.lines()),
        unmatched,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sanitize::strip_with_line_map;
    use crate::trace::TraceRecord;

    fn descriptor(loop_var: Option<&str>, loop_vars: &[&str], control: Option<&str>, code: &str) -> LoopDescriptor {
        LoopDescriptor {
            id: "L".to_string(),
            loop_var: loop_var.map(str::to_string),
            loop_vars: loop_vars.iter().map(|s| s.to_string()).collect(),
            control_var: control.map(str::to_string),
            line: 1,
            code: code.to_string(),
        }
    }

    #[test]
    fn test_single_loop_annotation() {
        let record = TraceRecord::from_json(
            r#"{"loops": {"0": {"loop_var": "i", "line": 2, "code": "for i in range(n):",
                "iterations": [{"loop_variables": {"i": 0}}]}}}"#,
        )
        .unwrap();
        let out = annotate_loops("def f(n):\nfor i in range(n):\n    pass", &record.loops());
        assert_eq!(out.lines[1], "for i in range(n):## [STATE]i=??[/STATE]");
        assert_eq!(out.matched, 1);
    }

    #[test]
    fn test_marker_prefers_iteration_names_then_control() {
        let desc = descriptor(Some("k, v"), &["k", "v"], Some("count"), "");
        assert_eq!(
            loop_marker(&desc),
            "## [STATE]k=??[/STATE] [STATE]v=??[/STATE] [STATE]count=??[/STATE]"
        );
        let desc = descriptor(Some("k, v"), &[], None, "");
        assert_eq!(loop_marker(&desc), "## [STATE]k, v=??[/STATE]");
    }

    #[test]
    fn test_annotation_preserves_line_count() {
        let cleaned = "xs = [1, 2]\nfor x in xs:\n    y = [z for z in range(x)]\n\nprint(y)";
        let loops = vec![
            descriptor(Some("x"), &["x"], None, "for x in xs:"),
            descriptor(Some("z"), &["z"], None, "[z for z in range(x)]"),
        ];
        let out = annotate_loops(cleaned, &loops);
        assert_eq!(out.lines.len(), cleaned.split('\n').count());
        assert_eq!(out.matched, 2);
        assert!(out.lines[2].ends_with("## [STATE]z=??[/STATE]"));
    }

    #[test]
    fn test_missing_loop_variable_adds_nothing() {
        let cleaned = "for i in range(3):\n    print(i)";
        let out = annotate_loops(cleaned, &[descriptor(Some("w"), &["w"], None, "while w:")]);
        assert_eq!(out.text(), cleaned);
        assert_eq!(out.matched, 0);
        assert_eq!(out.unmatched, 1);
    }

    #[test]
    fn test_first_loop_keeps_shared_line() {
        let cleaned = "for i in range(3):";
        let loops = vec![
            descriptor(Some("i"), &["i"], None, "for i in range(3):"),
            descriptor(None, &[], Some("i"), "for i in range(3):"),
        ];
        let out = annotate_loops(cleaned, &loops);
        assert_eq!(out.lines[0], "for i in range(3):## [STATE]i=??[/STATE]");
        assert_eq!(out.matched, 1);
    }

    #[test]
    fn test_branch_annotation_end_to_end() {
        let source = "def f(x):\n    # positive?\n    if x > 0:\n        return 1\n    return 0";
        let record =
            TraceRecord::from_json(r#"{"branches": {"decisions": [{"line": 3}, {"line": 2}]}}"#)
                .unwrap();
        let cleaned = strip_with_line_map(source);
        let out = annotate_branches(&cleaned, &record.branch_lines());

        assert_eq!(out.lines.len(), 4);
        assert_eq!(cleaned.cleaned_index(3), Some(1));
        assert_eq!(out.lines[1], "    if x > 0: ## [BRANCH]taken=??[/BRANCH]");
        assert!(out.lines[1].ends_with("## [BRANCH]taken=??[/BRANCH]"));
        assert_eq!(out.matched, 1);
        assert_eq!(out.unmatched, 1);
    }
}
