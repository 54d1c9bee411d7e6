//! Statement completeness analyzer.
//!
//! Decides from raw source text whether a VBScript snippet looks finished
//! enough to execute. This is a keyword heuristic, not a parser: block
//! openers push onto a per-kind stack and closers pop it, so nesting and
//! repeated blocks of the same kind are tracked exactly, but code that is
//! not valid VBScript can still be misjudged.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Trailing marker that continues a statement on the next line.
pub const CONTINUATION_MARKER: char = '_';

/// Indent suggested per open block.
pub const INDENT_UNIT: &str = "  ";

/// Words, member accesses (leading dot) and statement separators.
static TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.?[A-Za-z_][A-Za-z0-9_]*|:").expect("valid token pattern"));

/// Verdict for a snippet, serialized the way front ends expect
/// (`{"status": "incomplete", "indent": "  "}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Completeness {
    Complete,
    Incomplete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        indent: Option<String>,
    },
}

impl Completeness {
    pub fn is_complete(&self) -> bool {
        matches!(self, Completeness::Complete)
    }

    pub fn indent(&self) -> Option<&str> {
        match self {
            Completeness::Incomplete { indent } => indent.as_deref(),
            Completeness::Complete => None,
        }
    }
}

/// Block-structured constructs tracked by the analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    If,
    For,
    Do,
    While,
    Sub,
    Function,
    Property,
    Class,
    Select,
    With,
}

impl BlockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::If => "if",
            BlockKind::For => "for",
            BlockKind::Do => "do",
            BlockKind::While => "while",
            BlockKind::Sub => "sub",
            BlockKind::Function => "function",
            BlockKind::Property => "property",
            BlockKind::Class => "class",
            BlockKind::Select => "select",
            BlockKind::With => "with",
        }
    }

    /// Kind closed by `End <word>`. `For`, `Do` and `While` close with
    /// `Next`, `Loop` and `Wend` instead.
    fn closed_by_end(word: &str) -> Option<Self> {
        match word {
            "if" => Some(BlockKind::If),
            "sub" => Some(BlockKind::Sub),
            "function" => Some(BlockKind::Function),
            "property" => Some(BlockKind::Property),
            "class" => Some(BlockKind::Class),
            "select" => Some(BlockKind::Select),
            "with" => Some(BlockKind::With),
            _ => None,
        }
    }
}

/// Open-block state after scanning a snippet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockScan {
    /// Blocks still open, innermost last
    pub open: Vec<BlockKind>,
    /// A closer appeared with no matching innermost opener
    pub unbalanced: bool,
}

impl BlockScan {
    pub fn is_balanced(&self) -> bool {
        self.open.is_empty() && !self.unbalanced
    }

    fn push(&mut self, kind: BlockKind) {
        self.open.push(kind);
    }

    fn pop(&mut self, kind: BlockKind) {
        if self.open.last() == Some(&kind) {
            self.open.pop();
        } else {
            self.unbalanced = true;
        }
    }

    /// Returns false when the rest of the line is a `Rem` comment.
    fn scan_statement(&mut self, words: &[String]) -> bool {
        if words.first().map(String::as_str) == Some("rem") {
            return false;
        }

        let ends_with_then = words.last().map(String::as_str) == Some("then");
        let mut i = 0;
        while i < words.len() {
            let next = words.get(i + 1).map(String::as_str);
            match words[i].as_str() {
                "end" => {
                    if let Some(kind) = next.and_then(BlockKind::closed_by_end) {
                        self.pop(kind);
                        i += 2;
                        continue;
                    }
                }
                // Exit Sub / Exit For / Exit Do ...
                "exit" => {
                    i += 2;
                    continue;
                }
                // On Error Resume Next
                "resume" => {
                    i += 2;
                    continue;
                }
                "sub" => self.push(BlockKind::Sub),
                "function" => self.push(BlockKind::Function),
                "property" => self.push(BlockKind::Property),
                "class" => self.push(BlockKind::Class),
                "with" => self.push(BlockKind::With),
                "select" => {
                    if next == Some("case") {
                        self.push(BlockKind::Select);
                        i += 2;
                        continue;
                    }
                }
                "for" => self.push(BlockKind::For),
                "next" => self.pop(BlockKind::For),
                "do" | "loop" => {
                    if words[i] == "do" {
                        self.push(BlockKind::Do);
                    } else {
                        self.pop(BlockKind::Do);
                    }
                    // Do While / Loop Until belong to the loop itself
                    if matches!(next, Some("while") | Some("until")) {
                        i += 2;
                        continue;
                    }
                }
                "while" => self.push(BlockKind::While),
                "wend" => self.pop(BlockKind::While),
                // Only the multi-line form opens a block
                "if" => {
                    if ends_with_then && i + 1 < words.len() {
                        self.push(BlockKind::If);
                    }
                }
                _ => {}
            }
            i += 1;
        }
        true
    }

    fn scan_line(&mut self, line: &str) {
        let stripped = blank_literals(line);
        let mut statement: Vec<String> = Vec::new();
        for token in TOKEN.find_iter(&stripped) {
            let token = token.as_str();
            if token == ":" {
                if !self.scan_statement(&statement) {
                    return;
                }
                statement.clear();
            } else if !token.starts_with('.') {
                statement.push(token.to_ascii_lowercase());
            }
        }
        self.scan_statement(&statement);
    }
}

/// Scan every logical line of `code` and report the open blocks.
pub fn scan_blocks(code: &str) -> BlockScan {
    let mut scan = BlockScan::default();
    for line in logical_lines(code) {
        scan.scan_line(&line);
    }
    scan
}

/// Decide whether `code` is ready to execute.
///
/// A trailing continuation marker always means incomplete (no indent). A
/// blank final line always means complete, which lets the user force
/// submission of a snippet the heuristic disagrees with.
pub fn analyze(code: &str) -> Completeness {
    if code.trim().ends_with(CONTINUATION_MARKER) {
        return Completeness::Incomplete { indent: None };
    }

    match code.lines().last() {
        None => return Completeness::Complete,
        Some(last) if last.trim().is_empty() => return Completeness::Complete,
        Some(_) => {}
    }

    let scan = scan_blocks(code);
    if scan.is_balanced() {
        Completeness::Complete
    } else {
        Completeness::Incomplete {
            indent: Some(INDENT_UNIT.repeat(scan.open.len().max(1))),
        }
    }
}

/// Join physical lines ending in ` _` with their successor.
fn logical_lines(code: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut pending = String::new();
    for line in code.lines() {
        let trimmed = line.trim_end();
        let continued = trimmed
            .strip_suffix(CONTINUATION_MARKER)
            .filter(|head| head.ends_with(char::is_whitespace));
        match continued {
            Some(head) => pending.push_str(head),
            None => {
                pending.push_str(line);
                lines.push(std::mem::take(&mut pending));
            }
        }
    }
    if !pending.is_empty() {
        lines.push(pending);
    }
    lines
}

/// Replace string literal contents with spaces and drop `'` comments.
fn blank_literals(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_string = false;
    for ch in line.chars() {
        match ch {
            '"' => {
                in_string = !in_string;
                out.push(' ');
            }
            '\'' if !in_string => break,
            _ if in_string => out.push(' '),
            _ => out.push(ch),
        }
    }
    out
}
