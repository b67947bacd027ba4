//! Directive dispatch
//!
//! Known verbs: `NOTIFY`, `ECHO`, `RECALL` and `SYSTEM_COMMAND`. Only
//! assistant-sourced `llm` directives have side effects; user-sourced ones
//! are accepted and resolved as ignored.
//!
//! Gate rules for an assistant block:
//! - the block is processed only if the gate is armed or it contains a
//!   `SYSTEM_COMMAND`
//! - an ordinary directive runs only while the gate is armed at its turn
//! - if any ordinary directive ran, the gate is disarmed after the block
//! - `SYSTEM_COMMAND` never triggers that reset

use super::queue::{BackgroundAction, Classification, Command, Resolution};
use super::relay::RelayConfig;
use super::{DetectedCommands, DirectiveMatch};
use crate::context::RuntimeContext;
use crate::messaging::Messenger;
use crate::types::Role;

pub const NOTIFY: &str = "NOTIFY";
pub const ECHO: &str = "ECHO";
pub const RECALL: &str = "RECALL";
pub const SYSTEM_COMMAND: &str = "SYSTEM_COMMAND";

/// What happened to the directives of one turn
#[derive(Debug, Clone, Default)]
pub struct CommandReport {
    /// Resolved directives, in execution order
    pub resolved: Vec<Command>,
    /// Directives not run because the gate was off
    pub skipped: Vec<DirectiveMatch>,
    /// First inject text produced by the block
    pub inject_text: Option<String>,
    /// Background work handed back to the caller
    pub background: Vec<BackgroundAction>,
}

impl CommandReport {
    fn record(&mut self, command: Command) {
        if self.inject_text.is_none() {
            self.inject_text = command.inject_text().map(str::to_string);
        }
        if let Some(action) = command.background_action() {
            self.background.push(action.clone());
        }
        self.resolved.push(command);
    }
}

/// Process the directives detected in one turn
pub async fn process_turn_commands(
    ctx: &RuntimeContext,
    messenger: &dyn Messenger,
    detected: &DetectedCommands,
    role: Role,
    session_id: &str,
) -> CommandReport {
    let mut report = CommandReport::default();

    if detected.is_system_message_content {
        tracing::debug!(session_id, "System content, directives not processed");
        return report;
    }

    match role {
        Role::User => {
            let all = detected
                .user_commands
                .iter()
                .map(|d| (d, Classification::User))
                .chain(detected.llm_commands.iter().map(|d| (d, Classification::Llm)));
            for (directive, classification) in all {
                if let Some(cmd) =
                    run_directive(ctx, messenger, directive, role, classification, session_id).await
                {
                    report.record(cmd);
                }
            }
        }
        Role::Assistant => {
            let directives = &detected.llm_commands;
            if directives.is_empty() {
                return report;
            }

            let has_system_command = directives.iter().any(|d| d.is_system_command());
            if !ctx.command_gate() && !has_system_command {
                tracing::debug!(
                    session_id,
                    count = directives.len(),
                    "Command gate off, block not processed"
                );
                report.skipped = directives.clone();
                return report;
            }

            let mut ran_ordinary = false;
            for directive in directives {
                let is_system = directive.is_system_command();
                if !is_system && !ctx.command_gate() {
                    tracing::debug!(verb = %directive.command, "Command gate off, directive skipped");
                    report.skipped.push(directive.clone());
                    continue;
                }

                let resolved = run_directive(
                    ctx,
                    messenger,
                    directive,
                    role,
                    Classification::Llm,
                    session_id,
                )
                .await;

                if let Some(cmd) = resolved {
                    if !is_system {
                        ran_ordinary = true;
                    }
                    report.record(cmd);
                }
            }

            if ran_ordinary {
                ctx.set_command_gate(false);
            }
        }
    }

    report
}

/// Queue, run and resolve one directive. `None` if it was a pending duplicate.
async fn run_directive(
    ctx: &RuntimeContext,
    messenger: &dyn Messenger,
    directive: &DirectiveMatch,
    source: Role,
    classification: Classification,
    session_id: &str,
) -> Option<Command> {
    let command = ctx.with_commands(|q| {
        let id = q.enqueue(directive, source, classification, session_id)?;
        q.begin(&id)
    })?;

    let resolution = execute(ctx, messenger, &command).await;
    ctx.with_commands(|q| q.resolve(&command.id, resolution))
}

/// Execute an in-process directive
pub async fn execute(
    ctx: &RuntimeContext,
    messenger: &dyn Messenger,
    command: &Command,
) -> Resolution {
    if !command.command_type.is_dispatchable() {
        return Resolution::Failed(format!(
            "Unsupported command classification: {}",
            command.command_type
        ));
    }

    if command.source != Role::Assistant || command.command_type != Classification::Llm {
        tracing::debug!(
            command_id = %command.id,
            verb = %command.parsed_command,
            "User directive accepted and ignored"
        );
        return Resolution::IgnoredUserCommand;
    }

    match command.parsed_command.as_str() {
        NOTIFY => notify(messenger, command).await,
        ECHO => echo(command),
        RECALL => recall(command),
        SYSTEM_COMMAND => system_command(ctx, &command.args),
        other => {
            tracing::warn!(verb = other, "Unknown LLM command");
            Resolution::Failed("Unknown LLM command type".to_string())
        }
    }
}

async fn notify(messenger: &dyn Messenger, command: &Command) -> Resolution {
    let message = if command.args.trim().is_empty() {
        "[ASSISTANT] NOTIFY: Received command with no message.".to_string()
    } else {
        format!("[ASSISTANT] NOTIFY: {}", command.args.trim())
    };

    match messenger.request_popup(&message).await {
        Ok(Some(ack)) if ack.confirms_shown() => Resolution::Completed { inject_text: None },
        Ok(ack) => {
            tracing::debug!(command_id = %command.id, ack = ?ack, "Notification not confirmed");
            Resolution::PopupUnconfirmed
        }
        Err(e) => {
            tracing::warn!(command_id = %command.id, error = %e, "Notification request failed");
            Resolution::PopupUnconfirmed
        }
    }
}

fn echo(command: &Command) -> Resolution {
    let text = command.args.trim();
    if text.is_empty() {
        return Resolution::Failed("ECHO command missing arguments".to_string());
    }
    Resolution::Completed {
        inject_text: Some(text.to_string()),
    }
}

fn recall(command: &Command) -> Resolution {
    let term = strip_matching_quotes(command.args.trim()).trim().to_lowercase();
    if term.is_empty() {
        return Resolution::Failed("RECALL command missing search term".to_string());
    }
    Resolution::RequiresBackgroundAction(BackgroundAction::PerformRecall {
        search_term: term,
        original_command_id: command.id.clone(),
    })
}

fn strip_matching_quotes(s: &str) -> &str {
    for quote in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            return &s[1..s.len() - 1];
        }
    }
    s
}

fn system_command(ctx: &RuntimeContext, args: &str) -> Resolution {
    let args = args.trim();
    let mut tokens = args.split_whitespace();
    let sub = tokens.next().unwrap_or_default().to_uppercase();

    match sub.as_str() {
        "ACTIVATE_COMMAND_MODE" => {
            ctx.set_command_gate(true);
            Resolution::Completed { inject_text: None }
        }
        "DEACTIVATE_COMMAND_MODE" => {
            ctx.set_command_gate(false);
            Resolution::Completed { inject_text: None }
        }
        "SET_PROGRAMMING_MODE" => match tokens.next().map(str::to_uppercase).as_deref() {
            Some("ON") => {
                ctx.set_command_gate(true);
                Resolution::Completed { inject_text: None }
            }
            Some("OFF") => {
                ctx.set_command_gate(false);
                Resolution::Completed { inject_text: None }
            }
            _ => Resolution::Failed("Unknown SYSTEM_COMMAND arguments".to_string()),
        },
        "INIT_FURBY_MODE" => {
            let json = args
                .split_once(char::is_whitespace)
                .map(|(_, rest)| rest.trim())
                .unwrap_or_default();
            match RelayConfig::from_json(json) {
                Ok(config) => {
                    ctx.arm_relay(config);
                    Resolution::Completed { inject_text: None }
                }
                Err(e) => {
                    ctx.disarm_relay();
                    Resolution::Failed(format!("Invalid arguments for INIT_FURBY_MODE: {}", e))
                }
            }
        }
        "STOP_FURBY_MODE" => {
            ctx.disarm_relay();
            Resolution::Completed { inject_text: None }
        }
        _ => {
            tracing::warn!(args, "Unknown SYSTEM_COMMAND arguments");
            Resolution::Failed("Unknown SYSTEM_COMMAND arguments".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::parser::detect;
    use crate::command::CommandState;
    use crate::error::{Error, Result};
    use crate::messaging::{PopupAck, RuntimeMessage, TabAck, TabMessage};
    use crate::types::TabId;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct PopupStub {
        reply: Option<&'static str>,
        fail: bool,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Messenger for PopupStub {
        async fn broadcast(&self, _message: RuntimeMessage) -> Result<()> {
            Ok(())
        }

        async fn send_to_tab(&self, _tab_id: TabId, _message: TabMessage) -> Result<Option<TabAck>> {
            Ok(None)
        }

        async fn request_popup(&self, message: &str) -> Result<Option<PopupAck>> {
            self.seen.lock().push(message.to_string());
            if self.fail {
                return Err(Error::Messaging("no receiver".into()));
            }
            Ok(self.reply.map(|s| PopupAck { status: s.to_string() }))
        }
    }

    fn confirming() -> PopupStub {
        PopupStub {
            reply: Some("Notification shown"),
            ..Default::default()
        }
    }

    fn block(lines: &[&str]) -> String {
        let mut text = String::from("(((RUNCODE)))\n");
        for line in lines {
            text.push_str(line);
            text.push('\n');
        }
        text.push_str("(((/RUNCODE)))");
        text
    }

    async fn run(ctx: &RuntimeContext, messenger: &dyn Messenger, text: &str) -> CommandReport {
        let detected = detect(text, Role::Assistant);
        process_turn_commands(ctx, messenger, &detected, Role::Assistant, "s1").await
    }

    #[tokio::test]
    async fn test_gate_off_executes_nothing() {
        let ctx = RuntimeContext::new();
        let popup = confirming();

        let report = run(&ctx, &popup, &block(&["(((NOTIFY hi)))"])).await;

        assert!(report.resolved.is_empty());
        assert_eq!(report.skipped.len(), 1);
        assert!(popup.seen.lock().is_empty());
        assert!(ctx.with_commands(|q| q.is_empty()));
    }

    #[tokio::test]
    async fn test_gate_on_runs_notify_and_disarms() {
        let ctx = RuntimeContext::new();
        ctx.set_command_gate(true);
        let popup = confirming();

        let report = run(&ctx, &popup, &block(&["(((NOTIFY hi)))"])).await;

        assert_eq!(report.resolved.len(), 1);
        assert_eq!(report.resolved[0].state, CommandState::Completed);
        assert_eq!(popup.seen.lock()[0], "[ASSISTANT] NOTIFY: hi");
        assert!(!ctx.command_gate());
    }

    #[tokio::test]
    async fn test_notify_without_confirmation_is_unconfirmed() {
        let ctx = RuntimeContext::new();
        ctx.set_command_gate(true);
        let silent = PopupStub::default();
        let report = run(&ctx, &silent, &block(&["(((NOTIFY)))"])).await;
        assert_eq!(report.resolved[0].state, CommandState::CompletedPopupUnconfirmed);
        assert_eq!(
            silent.seen.lock()[0],
            "[ASSISTANT] NOTIFY: Received command with no message."
        );

        ctx.set_command_gate(true);
        let failing = PopupStub {
            fail: true,
            ..Default::default()
        };
        let report = run(&ctx, &failing, &block(&["(((NOTIFY hi)))"])).await;
        assert_eq!(report.resolved[0].state, CommandState::CompletedPopupUnconfirmed);
    }

    #[tokio::test]
    async fn test_activate_then_echo_in_one_block() {
        let ctx = RuntimeContext::new();
        let popup = confirming();

        let report = run(
            &ctx,
            &popup,
            &block(&[
                "(((SYSTEM_COMMAND ACTIVATE_COMMAND_MODE)))",
                "(((ECHO hello)))",
            ]),
        )
        .await;

        assert_eq!(report.resolved.len(), 2);
        assert_eq!(report.inject_text.as_deref(), Some("hello"));
        assert!(!ctx.command_gate());
    }

    #[tokio::test]
    async fn test_system_command_alone_keeps_gate_armed() {
        let ctx = RuntimeContext::new();
        let popup = confirming();

        run(&ctx, &popup, &block(&["(((SYSTEM_COMMAND SET_PROGRAMMING_MODE on)))"])).await;
        assert!(ctx.command_gate());

        run(&ctx, &popup, &block(&["(((SYSTEM_COMMAND DEACTIVATE_COMMAND_MODE)))"])).await;
        assert!(!ctx.command_gate());
    }

    #[tokio::test]
    async fn test_directive_before_activation_is_skipped() {
        let ctx = RuntimeContext::new();
        let popup = confirming();

        let report = run(
            &ctx,
            &popup,
            &block(&["(((ECHO early)))", "(((SYSTEM_COMMAND ACTIVATE_COMMAND_MODE)))"]),
        )
        .await;

        assert_eq!(report.skipped.len(), 1);
        assert!(report.inject_text.is_none());
        // No ordinary directive ran, so the gate stays armed
        assert!(ctx.command_gate());
    }

    #[tokio::test]
    async fn test_echo_and_unknown_failures() {
        let ctx = RuntimeContext::new();
        ctx.set_command_gate(true);
        let popup = confirming();

        let report = run(&ctx, &popup, &block(&["(((ECHO)))", "(((DANCE now)))"])).await;
        assert_eq!(report.resolved.len(), 2);
        assert!(report.skipped.is_empty());
        assert_eq!(report.resolved[0].state, CommandState::Failed);
        assert_eq!(
            report.resolved[0].error.as_deref(),
            Some("ECHO command missing arguments")
        );
        assert_eq!(
            report.resolved[1].error.as_deref(),
            Some("Unknown LLM command type")
        );
        // Both ran under the same arming; the gate resets after the block
        assert!(!ctx.command_gate());
    }

    #[tokio::test]
    async fn test_recall_hands_off() {
        let ctx = RuntimeContext::new();
        ctx.set_command_gate(true);
        let popup = confirming();

        let report = run(&ctx, &popup, &block(&["(((RECALL \"Rust Traits\")))"])).await;

        let cmd = &report.resolved[0];
        assert_eq!(cmd.state, CommandState::CompletedRequiresBackgroundAction);
        assert_eq!(
            report.background,
            vec![BackgroundAction::PerformRecall {
                search_term: "rust traits".into(),
                original_command_id: cmd.id.clone(),
            }]
        );
        assert!(ctx.with_commands(|q| q.is_empty()));
    }

    #[tokio::test]
    async fn test_relay_init_and_stop() {
        let ctx = RuntimeContext::new();
        let popup = confirming();

        run(
            &ctx,
            &popup,
            &block(&[r#"(((SYSTEM_COMMAND INIT_FURBY_MODE {"alphaTabId":"7","bravoTabId":"9"})))"#]),
        )
        .await;
        let relay = ctx.relay().unwrap();
        assert_eq!((relay.alpha_tab_id, relay.bravo_tab_id), (7, 9));

        run(&ctx, &popup, &block(&["(((SYSTEM_COMMAND STOP_FURBY_MODE)))"])).await;
        assert!(ctx.relay().is_none());

        let report = run(
            &ctx,
            &popup,
            &block(&[r#"(((SYSTEM_COMMAND INIT_FURBY_MODE {"alphaTabId":7})))"#]),
        )
        .await;
        assert_eq!(report.resolved[0].state, CommandState::Failed);
        assert!(ctx.relay().is_none());
    }

    #[tokio::test]
    async fn test_unknown_system_sub_action() {
        let ctx = RuntimeContext::new();
        let popup = confirming();
        let report = run(&ctx, &popup, &block(&["(((SYSTEM_COMMAND REBOOT)))"])).await;
        assert_eq!(
            report.resolved[0].error.as_deref(),
            Some("Unknown SYSTEM_COMMAND arguments")
        );
    }

    #[tokio::test]
    async fn test_user_directives_are_ignored() {
        let ctx = RuntimeContext::new();
        let popup = confirming();
        let detected = detect("|||RUNCODE|||\n|||NOTIFY hi|||\n|||/RUNCODE|||", Role::User);

        let report = process_turn_commands(&ctx, &popup, &detected, Role::User, "s1").await;

        assert_eq!(report.resolved.len(), 1);
        assert_eq!(report.resolved[0].state, CommandState::IgnoredUserCommand);
        assert!(popup.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_system_content_is_skipped() {
        let ctx = RuntimeContext::new();
        ctx.set_command_gate(true);
        let popup = confirming();
        let detected = DetectedCommands {
            llm_commands: vec![DirectiveMatch::new("(((ECHO x)))", "ECHO", "x")],
            is_system_message_content: true,
            ..Default::default()
        };

        let report =
            process_turn_commands(&ctx, &popup, &detected, Role::Assistant, "s1").await;
        assert!(report.resolved.is_empty());
        assert!(ctx.command_gate());
    }

    #[test]
    fn test_strip_matching_quotes() {
        assert_eq!(strip_matching_quotes("\"a b\""), "a b");
        assert_eq!(strip_matching_quotes("'a'"), "a");
        assert_eq!(strip_matching_quotes("\"a'"), "\"a'");
        assert_eq!(strip_matching_quotes("\""), "\"");
    }
}
