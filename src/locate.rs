//! Construct location in cleaned source.
//!
//! Loops are matched structurally because stripping shifts line numbers;
//! branch decisions are matched through the sanitizer's line map.
//!
//! The loop matcher is a heuristic and takes the first line that matches. A
//! comprehension earlier in the file that reuses the loop variable name wins
//! over the real loop further down; nesting depth and enclosing scope are not
//! considered. The last-resort header/line substring match is only tried on
//! lines that contain `for ` or `while `.

use crate::sanitize::CleanedSource;
use crate::trace::LoopDescriptor;

/// Zero-based index into cleaned source lines.
pub type LineIndex = usize;

/// The parts of a loop record the matcher looks at.
#[derive(Debug, Clone, Copy)]
pub struct LoopTarget<'a> {
    pub loop_var: Option<&'a str>,
    pub code: &'a str,
}

impl<'a> From<&'a LoopDescriptor> for LoopTarget<'a> {
    fn from(desc: &'a LoopDescriptor) -> Self {
        Self {
            loop_var: desc.loop_var.as_deref(),
            code: &desc.code,
        }
    }
}

fn is_loop_header(stripped: &str) -> bool {
    stripped.starts_with("for ") || stripped.starts_with("while ")
}

/// A line with an opening bracket that comes before a ` for `.
pub fn is_comprehension_line(line: &str) -> bool {
    let stripped = line.trim();
    let Some(for_pos) = stripped.find(" for ") else {
        return false;
    };
    ['[', '{', '(']
        .iter()
        .filter_map(|bracket| stripped.find(*bracket))
        .any(|bracket_pos| bracket_pos < for_pos)
}

fn mutual_substring(a: &str, b: &str) -> bool {
    !a.is_empty() && !b.is_empty() && (a.contains(b) || b.contains(a))
}

/// Match policy for a single candidate line, in priority order.
fn matches_line(line: &str, target: &LoopTarget<'_>) -> bool {
    let stripped = line.trim();
    if stripped.is_empty() {
        return false;
    }
    let header = target.code.trim();

    if is_loop_header(stripped) {
        if let Some(var) = target.loop_var {
            if stripped.contains(&format!("for {var} ")) || stripped.contains(&format!("for {var},"))
            {
                return true;
            }
        }
        if mutual_substring(stripped.trim_end_matches(':'), header.trim_end_matches(':')) {
            return true;
        }
    } else if is_comprehension_line(stripped) {
        if let Some(var) = target.loop_var {
            if stripped.contains(&format!(" for {var} in "))
                || stripped.contains(&format!(" for {var},"))
            {
                return true;
            }
        }
    }

    // Last resort, only on lines that look like they iterate at all.
    (stripped.contains("for ") || stripped.contains("while ")) && mutual_substring(stripped, header)
}

/// First cleaned line that holds the loop, if any.
pub fn locate_loop<S: AsRef<str>>(lines: &[S], target: &LoopTarget<'_>) -> Option<LineIndex> {
    lines
        .iter()
        .position(|line| matches_line(line.as_ref(), target))
}

/// Cleaned index of a branch decision recorded on a 1-based original line.
pub fn locate_branch(cleaned: &CleanedSource, original_line: u32) -> Option<LineIndex> {
    let line = usize::try_from(original_line).ok()?;
    let idx = cleaned.cleaned_index(line)?;
    cleaned
        .lines()
        .get(idx)
        .filter(|text| !text.trim().is_empty())
        .map(|_| idx)
}
