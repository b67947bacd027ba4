//! Exchange pairing
//!
//! A user turn is buffered per session until the assistant answers; the pair
//! then becomes one immutable [`ExchangeChunk`]. Only one user turn is held
//! per session: a newer one replaces an unconsumed older one. An assistant
//! turn with nothing buffered is dropped.

use chrono::{DateTime, Utc};

use crate::command::{sanitize_for_logging, DetectedCommands};
use crate::config::SessionConfig;
use crate::context::RuntimeContext;
use crate::stacker;
use crate::types::{
    new_chunk_id, CaptureMetadata, ExchangeChunk, ProjectState, Role, Session, TabInfo, TurnEvent,
    TurnText,
};

/// One side of a future exchange, as captured
#[derive(Debug, Clone, PartialEq)]
pub struct TurnPayload {
    pub role: Role,
    pub full_text: String,
    pub platform: Option<String>,
    pub model_approx: Option<String>,
    pub detected: DetectedCommands,
    pub raw_source_details: Option<serde_json::Value>,
    pub tab: TabInfo,
    /// When the engine received the turn
    pub received_at: DateTime<Utc>,
    pub assistant_response_start: Option<DateTime<Utc>>,
}

impl TurnPayload {
    pub fn from_event(event: &TurnEvent, detected: DetectedCommands, received_at: DateTime<Utc>) -> Self {
        Self {
            role: event.role,
            full_text: event.full_text.clone(),
            platform: event.platform.clone(),
            model_approx: event.model_approx.clone(),
            detected,
            raw_source_details: event.raw_source_details.clone(),
            tab: event.tab.clone(),
            received_at,
            assistant_response_start: event.timestamp_assistant_response_start,
        }
    }

    fn turn_text(&self) -> TurnText {
        TurnText {
            text: sanitize_for_logging(&self.full_text, &self.detected),
            raw_text: self.full_text.clone(),
            raw_source_details: self.raw_source_details.clone(),
        }
    }
}

/// Result of feeding one turn to the pairing stage
#[derive(Debug, Clone, PartialEq)]
pub enum PairingOutcome {
    /// User turn held; `replaced` when an unconsumed turn was discarded
    Buffered { replaced: bool },
    /// Assistant turn without a buffered user turn
    Dropped,
    /// The target session does not exist
    SessionMissing,
    Committed {
        chunk: Box<ExchangeChunk>,
        window_changed: bool,
    },
}

/// Assemble the exchange that follows the session's last committed one
pub fn build_chunk(
    session: &Session,
    user: &TurnPayload,
    assistant: &TurnPayload,
    config: &SessionConfig,
    completed_at: DateTime<Utc>,
) -> ExchangeChunk {
    let provider = assistant
        .platform
        .clone()
        .or_else(|| user.platform.clone())
        .unwrap_or_else(|| "unknown_llm".to_string());

    let mut tokens = user.detected.token_list();
    for token in assistant.detected.token_list() {
        if !tokens.contains(&token) {
            tokens.push(token);
        }
    }

    ExchangeChunk {
        chunk_id: new_chunk_id(),
        conversation_id: session.id.clone(),
        parent_chunk_id: session.last_chunk().map(|c| c.chunk_id.clone()),
        timestamp_user_prompt: user.received_at,
        timestamp_assistant_response_start: assistant.assistant_response_start,
        timestamp_assistant_response_complete: completed_at,
        source_llm_model_approx: assistant
            .model_approx
            .clone()
            .or_else(|| user.model_approx.clone()),
        turn_in_conversation: session.log_entries.len() as u32 + 1,
        chunk_type: "exchange".to_string(),
        user_input: user.turn_text(),
        assistant_response: assistant.turn_text(),
        extension_capture_metadata: CaptureMetadata {
            extension_version: config.extension_version.clone(),
            capture_method: format!("DOM_observer_{}_ids", provider),
            tab_id_at_capture: Some(assistant.tab.tab_id),
            window_id_at_capture: assistant.tab.window_id.or(user.tab.window_id),
            browser_name_at_capture: config.browser_name.clone(),
            url_at_capture: [&assistant.tab.url, &user.tab.url]
                .into_iter()
                .find(|u| !u.is_empty())
                .cloned(),
        },
        data_origin_app: format!("Heartbeat-v{}", config.extension_version),
        initial_semantic_tokens: tokens,
        notes: None,
        custom_fields: None,
        source_llm_provider: provider,
    }
}

/// Feed one turn for `session_id` into the pairing stage.
///
/// A committed chunk is appended to the session's log and graduated through
/// its rolling window. Persisting, broadcasting and forwarding are left to
/// the caller.
pub fn on_turn(
    ctx: &RuntimeContext,
    state: &mut ProjectState,
    session_id: &str,
    payload: TurnPayload,
    config: &SessionConfig,
) -> PairingOutcome {
    if state.session(session_id).is_none() {
        tracing::error!(session_id, role = %payload.role, "Session missing at pairing time");
        return PairingOutcome::SessionMissing;
    }

    match payload.role {
        Role::User => {
            let replaced = ctx.set_pending(session_id, payload).is_some();
            if replaced {
                tracing::debug!(session_id, "Unconsumed user turn replaced");
            }
            tracing::debug!(session_id, "User turn buffered");
            PairingOutcome::Buffered { replaced }
        }
        Role::Assistant => {
            let Some(user) = ctx.take_pending(session_id) else {
                tracing::warn!(
                    session_id,
                    tab_id = payload.tab.tab_id,
                    "Assistant turn without pending user turn, dropped"
                );
                return PairingOutcome::Dropped;
            };

            let Some(session) = state.session_mut(session_id) else {
                return PairingOutcome::SessionMissing;
            };

            let now = Utc::now();
            let chunk = build_chunk(session, &user, &payload, config, now);
            session.log_entries.push(chunk.clone());
            session.metadata.last_activity_at = now;

            let window_changed = stacker::on_committed_chunk(
                session,
                chunk.clone(),
                config.rolling_window,
                config.processing_buffer,
            );

            tracing::info!(
                session_id,
                chunk_id = %chunk.chunk_id,
                turn = chunk.turn_in_conversation,
                window_changed,
                "Exchange committed"
            );

            PairingOutcome::Committed {
                chunk: Box::new(chunk),
                window_changed,
            }
        }
    }
}
