//! Comment and docstring stripping for Python snippets.
//!
//! A small lexer walks the whole source once, tracking string literals
//! (single, triple, prefixed, escaped), comments, bracket depth and logical
//! lines. From that scan two renderings are produced:
//!
//! - [`strip_comments_and_docstrings`] collapses blank runs and is used for
//!   loop prompts, where the locator matches constructs structurally.
//! - [`strip_with_line_map`] keeps blank lines and records where every
//!   surviving original line ended up, for branch prompts whose trace data
//!   refers to original line numbers.
//!
//! A docstring is a string literal that is the only token of its logical line
//! and either opens the module or directly follows a line ending in a
//! block-opening `:`. If the lexer cannot make sense of the input (an
//! unterminated string or bracket at EOF) the source is returned unchanged.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenizeError {
    #[error("unterminated string literal on line {0}")]
    UnterminatedString(usize),
    #[error("EOF inside triple-quoted string starting on line {0}")]
    UnterminatedTripleQuote(usize),
    #[error("EOF inside bracketed expression")]
    UnclosedBracket,
}

/// Source after stripping, with the original -> cleaned line mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanedSource {
    lines: Vec<String>,
    /// 1-based original line -> 0-based cleaned index
    line_map: BTreeMap<usize, usize>,
}

impl CleanedSource {
    fn identity(source: &str) -> Self {
        let lines: Vec<String> = split_lines(source).into_iter().map(str::to_string).collect();
        let line_map = (0..lines.len()).map(|idx| (idx + 1, idx)).collect();
        Self { lines, line_map }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Where a 1-based original line ended up, if it survived stripping.
    pub fn cleaned_index(&self, original_line: usize) -> Option<usize> {
        self.line_map.get(&original_line).copied()
    }
}

/// Result of lexing a whole snippet.
#[derive(Debug, Default)]
struct Scan {
    /// 0-based line -> byte column where a comment starts
    comments: HashMap<usize, usize>,
    docstring_lines: BTreeSet<usize>,
    /// Lines that sit inside (or close) a multi-line string literal
    string_body_lines: BTreeSet<usize>,
}

/// Per-logical-line bookkeeping for docstring detection.
#[derive(Debug, Default)]
struct LogicalLine {
    tokens: usize,
    first_string: Option<(usize, usize)>,
    ends_with_colon: bool,
}

struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: usize,
    line_start: usize,
    depth: usize,
    continued: bool,
    current: LogicalLine,
    seen_statement: bool,
    prev_opens_block: bool,
    scan: Scan,
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

fn is_string_prefix(ident: &[u8]) -> bool {
    matches!(
        ident.to_ascii_lowercase().as_slice(),
        b"r" | b"u" | b"b" | b"f" | b"br" | b"rb" | b"fr" | b"rf"
    )
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            src: source.as_bytes(),
            pos: 0,
            line: 0,
            line_start: 0,
            depth: 0,
            continued: false,
            current: LogicalLine::default(),
            seen_statement: false,
            prev_opens_block: false,
            scan: Scan::default(),
        }
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn newline(&mut self) {
        self.line += 1;
        self.line_start = self.pos + 1;
    }

    fn push_token(&mut self, colon: bool) {
        self.current.tokens += 1;
        self.current.ends_with_colon = colon;
    }

    fn end_logical_line(&mut self) {
        let line = std::mem::take(&mut self.current);
        if line.tokens == 0 {
            return;
        }
        if line.tokens == 1 && (!self.seen_statement || self.prev_opens_block) {
            if let Some((start, end)) = line.first_string {
                self.scan.docstring_lines.extend(start..=end);
                for idx in start + 1..=end {
                    self.scan.string_body_lines.remove(&idx);
                }
            }
        }
        self.seen_statement = true;
        self.prev_opens_block = line.ends_with_colon;
    }

    fn run(mut self) -> Result<Scan, TokenizeError> {
        while let Some(b) = self.peek(0) {
            match b {
                b'\n' => {
                    if self.depth == 0 && !self.continued {
                        self.end_logical_line();
                    }
                    self.continued = false;
                    self.newline();
                    self.pos += 1;
                }
                b'#' => {
                    self.scan
                        .comments
                        .insert(self.line, self.pos - self.line_start);
                    while self.peek(0).is_some_and(|c| c != b'\n') {
                        self.pos += 1;
                    }
                }
                b'\\' => {
                    let next = match self.peek(1) {
                        Some(b'\r') => self.peek(2),
                        other => other,
                    };
                    if next == Some(b'\n') {
                        self.continued = true;
                    }
                    self.pos += 1;
                }
                b'\'' | b'"' => self.string()?,
                b'(' | b'[' | b'{' => {
                    self.depth += 1;
                    self.push_token(false);
                    self.pos += 1;
                }
                b')' | b']' | b'}' => {
                    self.depth = self.depth.saturating_sub(1);
                    self.push_token(false);
                    self.pos += 1;
                }
                b':' => {
                    if self.peek(1) == Some(b'=') {
                        self.push_token(false);
                        self.pos += 2;
                    } else {
                        let opens_block = self.depth == 0;
                        self.push_token(opens_block);
                        self.pos += 1;
                    }
                }
                b' ' | b'\t' | b'\r' | b'\x0c' => self.pos += 1,
                _ if is_ident_byte(b) => {
                    let start = self.pos;
                    while self.peek(0).is_some_and(is_ident_byte) {
                        self.pos += 1;
                    }
                    let ident = &self.src[start..self.pos];
                    if matches!(self.peek(0), Some(b'\'' | b'"')) && is_string_prefix(ident) {
                        self.string()?;
                    } else {
                        self.push_token(false);
                    }
                }
                _ => {
                    self.push_token(false);
                    self.pos += 1;
                }
            }
        }

        if self.depth > 0 {
            return Err(TokenizeError::UnclosedBracket);
        }
        self.end_logical_line();
        Ok(self.scan)
    }

    /// Consume a string literal starting at the current quote.
    fn string(&mut self) -> Result<(), TokenizeError> {
        let quote = self.src[self.pos];
        let triple = self.peek(1) == Some(quote) && self.peek(2) == Some(quote);
        let start_line = self.line;
        self.pos += if triple { 3 } else { 1 };

        loop {
            let Some(b) = self.peek(0) else {
                return Err(if triple {
                    TokenizeError::UnterminatedTripleQuote(start_line + 1)
                } else {
                    TokenizeError::UnterminatedString(start_line + 1)
                });
            };
            match b {
                b'\\' => {
                    // An escaped newline still advances the line counter.
                    let newline_at = match (self.peek(1), self.peek(2)) {
                        (Some(b'\n'), _) => Some(1),
                        (Some(b'\r'), Some(b'\n')) => Some(2),
                        _ => None,
                    };
                    match newline_at {
                        Some(offset) => {
                            self.pos += offset;
                            self.newline();
                            self.pos += 1;
                        }
                        None => self.pos += 2,
                    }
                }
                b'\n' if !triple => return Err(TokenizeError::UnterminatedString(start_line + 1)),
                b'\n' => {
                    self.newline();
                    self.pos += 1;
                }
                _ if b == quote
                    && (!triple
                        || (self.peek(1) == Some(quote) && self.peek(2) == Some(quote))) =>
                {
                    self.pos += if triple { 3 } else { 1 };
                    break;
                }
                _ => self.pos += 1,
            }
        }

        let end_line = self.line;
        if end_line > start_line {
            self.scan.string_body_lines.extend(start_line + 1..=end_line);
        }
        // A prefix identifier and its literal form one token.
        if self.current.tokens == 0 {
            self.current.first_string = Some((start_line, end_line));
        }
        self.push_token(false);
        Ok(())
    }
}

fn scan(source: &str) -> Result<Scan, TokenizeError> {
    Lexer::new(source).run()
}

/// `split('\n')` without the phantom empty line after a trailing newline.
fn split_lines(source: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = source.split('\n').collect();
    if source.ends_with('\n') {
        lines.pop();
    }
    lines
}

fn cut_comment<'s>(line: &'s str, col: Option<usize>) -> Option<&'s str> {
    col.and_then(|col| line.get(..col)).map(str::trim_end)
}

/// Convert `\r\n` and lone `\r` line endings to `\n`.
pub fn normalize_newlines(source: &str) -> Cow<'_, str> {
    if !source.contains('\r') {
        return Cow::Borrowed(source);
    }
    Cow::Owned(source.replace("\r\n", "\n").replace('\r', "\n"))
}

/// Remove comments and docstrings, collapsing blank runs to one blank line
/// and trimming blank lines at either end.
pub fn strip_comments_and_docstrings(source: &str) -> String {
    let scan = match scan(source) {
        Ok(scan) => scan,
        Err(err) => {
            tracing::warn!(error = %err, "Tokenization failed; leaving source unmodified");
            return source.to_string();
        }
    };

    let mut out: Vec<&str> = Vec::new();
    for (idx, line) in split_lines(source).into_iter().enumerate() {
        if scan.docstring_lines.contains(&idx) {
            continue;
        }
        let kept = cut_comment(line, scan.comments.get(&idx).copied()).unwrap_or(line);
        if scan.string_body_lines.contains(&idx) || !kept.trim().is_empty() {
            out.push(kept);
        } else if out.last().is_some_and(|prev| !prev.trim().is_empty()) {
            out.push("");
        }
    }

    while out.last().is_some_and(|l| l.trim().is_empty()) {
        out.pop();
    }
    let leading = out.iter().take_while(|l| l.trim().is_empty()).count();
    out.drain(..leading);

    out.join("\n")
}

/// Remove comments and docstrings line-for-line, keeping blank lines and
/// recording where each surviving original line landed.
pub fn strip_with_line_map(source: &str) -> CleanedSource {
    let scan = match scan(source) {
        Ok(scan) => scan,
        Err(err) => {
            tracing::warn!(error = %err, "Tokenization failed; leaving source unmodified");
            return CleanedSource::identity(source);
        }
    };

    let mut cleaned = CleanedSource::default();
    for (idx, line) in split_lines(source).into_iter().enumerate() {
        if scan.docstring_lines.contains(&idx) {
            continue;
        }
        let comment = scan.comments.get(&idx).copied();
        let in_string = scan.string_body_lines.contains(&idx);
        let kept = match cut_comment(line, comment) {
            Some(code) => code,
            None if in_string => line,
            None => line.trim_end(),
        };
        if kept.trim().is_empty() && comment.is_some() && !in_string {
            continue;
        }
        let kept = if kept.trim().is_empty() && !in_string {
            ""
        } else {
            kept
        };
        cleaned.line_map.insert(idx + 1, cleaned.lines.len());
        cleaned.lines.push(kept.to_string());
    }
    cleaned
}
