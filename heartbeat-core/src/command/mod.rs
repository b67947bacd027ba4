//! Embedded command protocol
//!
//! Assistant output can carry a delimited block of directives:
//!
//! ```text
//! (((RUNCODE)))
//! (((NOTIFY build finished)))
//! (((/RUNCODE)))
//! ```
//!
//! The protocol runs in three stages:
//! - [`parser`] extracts at most one block per role and tokenizes its directives
//! - [`queue`] deduplicates directives and tracks their state machine
//! - [`executor`] dispatches known verbs under the execution gate
//!
//! [`relay`] holds the two-tab relay registration that `SYSTEM_COMMAND
//! INIT_FURBY_MODE` arms.

pub mod executor;
pub mod parser;
pub mod queue;
pub mod relay;

pub use executor::{process_turn_commands, CommandReport};
pub use parser::{defang_for_recall, detect, sanitize_for_logging};
pub use queue::{
    BackgroundAction, Classification, Command, CommandQueue, CommandResult, CommandState,
    Resolution,
};
pub use relay::{RelayConfig, RelayForward, RelayState, Speaker};

use serde::{Deserialize, Serialize};

/// One directive invocation as written in turn text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectiveMatch {
    /// The directive exactly as it appeared, delimiters included
    pub raw: String,
    /// Verb, uppercased
    pub command: String,
    #[serde(default)]
    pub args: String,
}

impl DirectiveMatch {
    pub fn new(raw: impl Into<String>, command: &str, args: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            command: command.to_uppercase(),
            args: args.into(),
        }
    }

    pub fn is_system_command(&self) -> bool {
        self.command == executor::SYSTEM_COMMAND
    }
}

/// A `[[[token]]]` span
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticToken {
    pub raw: String,
    pub token: String,
}

/// A `{{{SYSTEM}}} ... {{{/SYSTEM}}}` span
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemMessage {
    pub raw: String,
    pub content: String,
}

/// Structure detected in one turn's text
///
/// The capture layer may send this pre-parsed; otherwise [`detect`] builds it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedCommands {
    #[serde(default)]
    pub llm_commands: Vec<DirectiveMatch>,
    #[serde(default)]
    pub user_commands: Vec<DirectiveMatch>,
    #[serde(default)]
    pub semantic_tokens: Vec<SemanticToken>,
    #[serde(default)]
    pub system_messages: Vec<SystemMessage>,
    /// Text carries injected system content and must not run directives
    #[serde(default)]
    pub is_system_message_content: bool,
    #[serde(default)]
    pub runcode_block_present: bool,
}

impl DetectedCommands {
    pub fn has_directives(&self) -> bool {
        !self.llm_commands.is_empty() || !self.user_commands.is_empty()
    }

    /// Semantic tokens in their bracketed form (`[[[rust]]]`), trimmed, in
    /// order of appearance and without duplicates
    pub fn token_list(&self) -> Vec<String> {
        let mut tokens: Vec<String> = Vec::new();
        for t in &self.semantic_tokens {
            if t.token.trim().is_empty() {
                continue;
            }
            let raw = t.raw.trim();
            if !tokens.iter().any(|seen| seen == raw) {
                tokens.push(raw.to_string());
            }
        }
        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive_match_normalizes_verb() {
        let d = DirectiveMatch::new("(((notify hi)))", "notify", "hi");
        assert_eq!(d.command, "NOTIFY");
        assert!(!d.is_system_command());
        assert!(DirectiveMatch::new("", "system_command", "").is_system_command());
    }

    #[test]
    fn test_detected_commands_from_capture_layer() {
        let json = r#"{
            "llmCommands": [{"raw": "(((ECHO a)))", "command": "ECHO", "args": "a"}],
            "semanticTokens": [
                {"raw": "[[[x]]]", "token": "x"},
                {"raw": " [[[x]]]", "token": "x"},
                {"raw": "[[[ x ]]]", "token": " x "},
                {"raw": "[[[ ]]]", "token": " "}
            ],
            "isSystemMessageContent": false
        }"#;
        let d: DetectedCommands = serde_json::from_str(json).unwrap();
        assert_eq!(d.llm_commands.len(), 1);
        assert!(d.user_commands.is_empty());
        assert!(d.has_directives());
        assert_eq!(d.token_list(), vec!["[[[x]]]", "[[[ x ]]]"]);
    }
}
