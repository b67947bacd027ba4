//! Two-stage directive parser
//!
//! Stage one is a line-oriented block extractor. A block opens on a line
//! whose trimmed content is exactly the start delimiter and closes on a line
//! that is exactly the end delimiter. Only the first complete block in a turn
//! counts; a second start line before the end restarts accumulation.
//!
//! Stage two tokenizes the block content. Each line of the form
//! `<open> NAME [args] <close>` becomes a directive, other lines are ignored.
//!
//! Assistant and user turns use distinct wrappers:
//!
//! | Role | Block | Directive |
//! |------|-------|-----------|
//! | assistant | `(((RUNCODE)))` ... `(((/RUNCODE)))` | `(((NAME args)))` |
//! | user | `\|\|\|RUNCODE\|\|\|` ... `\|\|\|/RUNCODE\|\|\|` | `\|\|\|NAME args\|\|\|` |

use super::{DetectedCommands, DirectiveMatch, SemanticToken, SystemMessage};
use crate::types::Role;

/// Delimiters for one role's directive syntax
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Syntax {
    pub open: &'static str,
    pub close: &'static str,
    pub block_start: &'static str,
    pub block_end: &'static str,
}

pub const ASSISTANT_SYNTAX: Syntax = Syntax {
    open: "(((",
    close: ")))",
    block_start: "(((RUNCODE)))",
    block_end: "(((/RUNCODE)))",
};

pub const USER_SYNTAX: Syntax = Syntax {
    open: "|||",
    close: "|||",
    block_start: "|||RUNCODE|||",
    block_end: "|||/RUNCODE|||",
};

const SEMANTIC_OPEN: &str = "[[[";
const SEMANTIC_CLOSE: &str = "]]]";
const SYSTEM_OPEN: &str = "{{{SYSTEM}}}";
const SYSTEM_CLOSE: &str = "{{{/SYSTEM}}}";
const DEFANG: &str = ":::";

impl Syntax {
    pub fn for_role(role: Role) -> Self {
        match role {
            Role::Assistant => ASSISTANT_SYNTAX,
            Role::User => USER_SYNTAX,
        }
    }
}

/// Result of scanning text for a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockScan {
    /// No start delimiter line
    Absent,
    /// Started but never closed
    Unterminated,
    /// Closed with nothing inside
    Empty,
    /// Trimmed content of the first complete block
    Content(String),
}

/// Stage one: find the first complete block
pub fn extract_block(text: &str, syntax: Syntax) -> BlockScan {
    let mut current: Option<Vec<&str>> = None;

    for line in text.lines() {
        let trimmed = line.trim();

        if trimmed == syntax.block_start {
            if current.is_some() {
                tracing::debug!("Nested block start, restarting accumulation");
            }
            current = Some(Vec::new());
        } else if trimmed == syntax.block_end {
            if let Some(lines) = current.take() {
                let content = lines.join("\n").trim().to_string();
                return if content.is_empty() {
                    BlockScan::Empty
                } else {
                    BlockScan::Content(content)
                };
            }
        } else if let Some(lines) = current.as_mut() {
            lines.push(line);
        }
    }

    if current.is_some() {
        BlockScan::Unterminated
    } else {
        BlockScan::Absent
    }
}

/// Stage two: one directive per matching line
pub fn tokenize_directives(content: &str, syntax: Syntax) -> Vec<DirectiveMatch> {
    content
        .lines()
        .filter_map(|line| parse_directive_line(line.trim(), syntax))
        .collect()
}

fn parse_directive_line(line: &str, syntax: Syntax) -> Option<DirectiveMatch> {
    if line.len() < syntax.open.len() + syntax.close.len() {
        return None;
    }
    let inner = line
        .strip_prefix(syntax.open)?
        .strip_suffix(syntax.close)?
        .trim();

    let (name, args) = match inner.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (inner, ""),
    };

    let valid_name = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid_name {
        return None;
    }

    Some(DirectiveMatch::new(line, name, args))
}

/// Parse a role's directives out of a whole turn
pub fn parse_block_directives(text: &str, role: Role) -> (BlockScan, Vec<DirectiveMatch>) {
    let syntax = Syntax::for_role(role);
    let scan = extract_block(text, syntax);

    let directives = match &scan {
        BlockScan::Content(content) => tokenize_directives(content, syntax),
        BlockScan::Unterminated => {
            tracing::warn!(role = %role, "Unterminated command block discarded");
            Vec::new()
        }
        BlockScan::Empty => {
            tracing::debug!(role = %role, "Empty command block discarded");
            Vec::new()
        }
        BlockScan::Absent => Vec::new(),
    };

    (scan, directives)
}

/// Non-overlapping `open ... close` spans, returned as (raw, inner)
fn find_spans<'a>(text: &'a str, open: &str, close: &str) -> Vec<(&'a str, &'a str)> {
    let mut spans = Vec::new();
    let mut rest = text;
    let mut offset = 0;

    while let Some(start) = rest.find(open) {
        let after_open = start + open.len();
        let Some(len) = rest[after_open..].find(close) else {
            break;
        };
        let end = after_open + len + close.len();
        spans.push((
            &text[offset + start..offset + end],
            &text[offset + after_open..offset + after_open + len],
        ));
        offset += end;
        rest = &text[offset..];
    }

    spans
}

/// Detect all directive structure in one turn's text
pub fn detect(text: &str, role: Role) -> DetectedCommands {
    let semantic_tokens = find_spans(text, SEMANTIC_OPEN, SEMANTIC_CLOSE)
        .into_iter()
        .filter(|(_, inner)| !inner.trim().is_empty())
        .map(|(raw, inner)| SemanticToken {
            raw: raw.to_string(),
            token: inner.trim().to_string(),
        })
        .collect();

    let system_messages: Vec<SystemMessage> = find_spans(text, SYSTEM_OPEN, SYSTEM_CLOSE)
        .into_iter()
        .map(|(raw, inner)| SystemMessage {
            raw: raw.to_string(),
            content: inner.trim().to_string(),
        })
        .collect();
    let is_system_message_content = !system_messages.is_empty();

    let mut detected = DetectedCommands {
        semantic_tokens,
        system_messages,
        is_system_message_content,
        ..Default::default()
    };

    // Recalled text is displayed inside system spans and must never re-trigger directives
    if is_system_message_content && role == Role::Assistant {
        return detected;
    }

    let (scan, directives) = parse_block_directives(text, role);
    detected.runcode_block_present = matches!(scan, BlockScan::Content(_) | BlockScan::Empty);
    match role {
        Role::Assistant => detected.llm_commands = directives,
        Role::User => detected.user_commands = directives,
    }

    detected
}

/// Soften directive delimiters so logged text cannot be re-executed
///
/// Each detected directive or system span loses one delimiter character on
/// each side; semantic tokens are kept verbatim.
pub fn sanitize_for_logging(text: &str, detected: &DetectedCommands) -> String {
    let mut raws: Vec<&str> = detected
        .llm_commands
        .iter()
        .chain(detected.user_commands.iter())
        .map(|d| d.raw.as_str())
        .chain(detected.system_messages.iter().map(|s| s.raw.as_str()))
        .filter(|raw| !raw.trim().is_empty())
        .collect();

    // Longest first so a raw string contained in another is not replaced early
    raws.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    raws.dedup();

    let mut sanitized = text.to_string();
    for raw in raws {
        let stripped = strip_one_delimiter(raw);
        if stripped != raw {
            sanitized = sanitized.replace(raw, stripped);
        }
    }
    sanitized
}

fn strip_one_delimiter(raw: &str) -> &str {
    let pairs = [("(((", ")))"), ("|||", "|||"), ("{{{", "}}}")];
    let wrapped = pairs
        .iter()
        .any(|(open, close)| raw.len() >= 6 && raw.starts_with(open) && raw.ends_with(close));

    if wrapped {
        &raw[1..raw.len() - 1]
    } else {
        raw
    }
}

/// Rewrite `(((X)))` and `|||X|||` as `:::X:::` so recalled content cannot execute
pub fn defang_for_recall(text: &str) -> String {
    let mut out = text.to_string();
    for (open, close) in [("(((", ")))"), ("|||", "|||")] {
        let spans: Vec<(String, String)> = find_spans(&out, open, close)
            .into_iter()
            .map(|(raw, inner)| (raw.to_string(), format!("{}{}{}", DEFANG, inner, DEFANG)))
            .collect();
        for (raw, replacement) in spans {
            out = out.replacen(&raw, &replacement, 1);
        }
    }
    out
}
