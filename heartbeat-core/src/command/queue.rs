//! Command queue and directive state machine
//!
//! ```text
//! queued -> in_process -> completed
//!                      -> completed_requires_background_action
//!                      -> completed_popup_unconfirmed
//!                      -> ignored_user_command
//!                      -> failed
//! ```
//!
//! Terminal states leave the queue as soon as they are reached; the resolved
//! [`Command`] is handed back to the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::DirectiveMatch;
use crate::types::Role;

/// Which syntax family a directive came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Llm,
    User,
    Semantic,
    System,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Llm => "llm",
            Classification::User => "user",
            Classification::Semantic => "semantic",
            Classification::System => "system",
        }
    }

    /// Only these classifications are ever dispatched
    pub fn is_dispatchable(&self) -> bool {
        matches!(self, Classification::Llm | Classification::User)
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandState {
    Queued,
    InProcess,
    Completed,
    CompletedRequiresBackgroundAction,
    CompletedPopupUnconfirmed,
    IgnoredUserCommand,
    Failed,
}

impl CommandState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandState::Queued => "queued",
            CommandState::InProcess => "in_process",
            CommandState::Completed => "completed",
            CommandState::CompletedRequiresBackgroundAction => {
                "completed_requires_background_action"
            }
            CommandState::CompletedPopupUnconfirmed => "completed_popup_unconfirmed",
            CommandState::IgnoredUserCommand => "ignored_user_command",
            CommandState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            CommandState::Queued | CommandState::InProcess => false,
            CommandState::Completed
            | CommandState::CompletedRequiresBackgroundAction
            | CommandState::CompletedPopupUnconfirmed
            | CommandState::IgnoredUserCommand
            | CommandState::Failed => true,
        }
    }
}

impl std::fmt::Display for CommandState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Work a completed directive hands to an external orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BackgroundAction {
    #[serde(rename_all = "camelCase")]
    PerformRecall {
        search_term: String,
        original_command_id: String,
    },
}

/// Payload attached to a resolved directive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandResult {
    /// Literal text to re-inject into the originating chat
    InjectText(String),
    Background(BackgroundAction),
}

/// Outcome of executing one directive; maps onto exactly one terminal state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Completed { inject_text: Option<String> },
    RequiresBackgroundAction(BackgroundAction),
    PopupUnconfirmed,
    IgnoredUserCommand,
    Failed(String),
}

/// One queued directive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub id: String,
    pub timestamp_detected: DateTime<Utc>,
    pub raw_command_string: String,
    /// Normalized verb
    pub parsed_command: String,
    pub args: String,
    pub source: Role,
    pub command_type: Classification,
    pub session_id: String,
    pub state: CommandState,
    pub execution_attempts: u32,
    pub result: Option<CommandResult>,
    pub error: Option<String>,
}

impl Command {
    /// Text to re-inject, if this directive produced any
    pub fn inject_text(&self) -> Option<&str> {
        match &self.result {
            Some(CommandResult::InjectText(text)) => Some(text),
            _ => None,
        }
    }

    pub fn background_action(&self) -> Option<&BackgroundAction> {
        match &self.result {
            Some(CommandResult::Background(action)) => Some(action),
            _ => None,
        }
    }

    fn apply(&mut self, resolution: Resolution) {
        match resolution {
            Resolution::Completed { inject_text } => {
                self.state = CommandState::Completed;
                self.result = inject_text.map(CommandResult::InjectText);
            }
            Resolution::RequiresBackgroundAction(action) => {
                self.state = CommandState::CompletedRequiresBackgroundAction;
                self.result = Some(CommandResult::Background(action));
            }
            Resolution::PopupUnconfirmed => {
                self.state = CommandState::CompletedPopupUnconfirmed;
            }
            Resolution::IgnoredUserCommand => {
                self.state = CommandState::IgnoredUserCommand;
            }
            Resolution::Failed(error) => {
                self.state = CommandState::Failed;
                self.error = Some(error);
            }
        }
    }
}

/// Pending directives, deduplicated by (raw, session, source)
#[derive(Debug, Default)]
pub struct CommandQueue {
    entries: Vec<Command>,
    counter: u64,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a directive, returning its id.
    ///
    /// Returns `None` when an identical directive from the same source and
    /// session is still queued or in process.
    pub fn enqueue(
        &mut self,
        directive: &DirectiveMatch,
        source: Role,
        classification: Classification,
        session_id: &str,
    ) -> Option<String> {
        let duplicate = self.entries.iter().any(|c| {
            c.raw_command_string == directive.raw
                && c.session_id == session_id
                && c.source == source
                && !c.state.is_terminal()
        });
        if duplicate {
            tracing::warn!(
                raw = %directive.raw,
                session_id,
                "Duplicate directive still pending, not queueing"
            );
            return None;
        }

        let now = Utc::now();
        self.counter += 1;
        let id = format!("cmd-{}-{}-{}", session_id, now.timestamp_millis(), self.counter);

        self.entries.push(Command {
            id: id.clone(),
            timestamp_detected: now,
            raw_command_string: directive.raw.clone(),
            parsed_command: directive.command.to_uppercase(),
            args: directive.args.clone(),
            source,
            command_type: classification,
            session_id: session_id.to_string(),
            state: CommandState::Queued,
            execution_attempts: 0,
            result: None,
            error: None,
        });

        tracing::debug!(command_id = %id, verb = %directive.command, "Directive queued");
        Some(id)
    }

    /// Move a queued directive to `in_process` and return a snapshot of it
    pub fn begin(&mut self, id: &str) -> Option<Command> {
        let command = self
            .entries
            .iter_mut()
            .find(|c| c.id == id && c.state == CommandState::Queued)?;
        command.state = CommandState::InProcess;
        command.execution_attempts += 1;
        Some(command.clone())
    }

    /// Apply a terminal resolution and remove the directive from the queue
    pub fn resolve(&mut self, id: &str, resolution: Resolution) -> Option<Command> {
        let index = self.entries.iter().position(|c| c.id == id)?;
        let mut command = self.entries.remove(index);
        command.apply(resolution);
        tracing::debug!(
            command_id = %command.id,
            state = %command.state,
            error = ?command.error,
            "Directive resolved"
        );
        Some(command)
    }

    pub fn get(&self, id: &str) -> Option<&Command> {
        self.entries.iter().find(|c| c.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
