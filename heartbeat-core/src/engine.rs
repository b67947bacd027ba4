//! Turn and tab event processing
//!
//! The [`Engine`] is the single entry point for everything the capture layer
//! reports: tab lifecycle events, page freshness, and chat turns. Each
//! handler loads the project state, mutates it, persists it, and notifies
//! listeners. Failures of the store or of any outbound collaborator are
//! logged and never abort a handler.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use crate::collector::{CollectorClient, ExchangeSink, NullSink, RecallBackend, RecallResponse};
use crate::command::{
    defang_for_recall, detect, process_turn_commands, BackgroundAction, CommandReport,
    CommandState, RelayForward,
};
use crate::config::{Config, SessionConfig};
use crate::context::{RuntimeContext, TabStatus};
use crate::error::{Error, Result};
use crate::format;
use crate::messaging::{Messenger, RuntimeMessage, TabAck, TabMessage};
use crate::pairing::{self, PairingOutcome, TurnPayload};
use crate::platform::PlatformRegistry;
use crate::session::{self, Decision, ResolveOptions, ResolveOutcome, SessionLogs, SessionSummary};
use crate::store::StateStore;
use crate::types::{
    ProjectState, Role, SessionStatus, TabId, TabInfo, TurnEvent, UserSettings,
};

/// Platform recorded when neither the turn nor its url names one
const UNKNOWN_PLATFORM: &str = "unknown";

/// Reply to a page freshness report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageContext {
    pub current_session_id: Option<String>,
    pub associated_url: Option<String>,
}

/// What happened to one recall hand-off
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecallOutcome {
    pub command_id: String,
    pub search_term: String,
    pub display_text: String,
    pub follow_up_sent: bool,
    /// `Completed` when the tab confirmed the display, `Failed` otherwise
    pub state: CommandState,
    pub error: Option<String>,
}

/// Everything one turn caused
#[derive(Debug, Clone, Default)]
pub struct TurnReport {
    /// Why the turn was rejected before any processing
    pub rejected: Option<String>,
    pub session_id: Option<String>,
    pub relayed: Option<RelayForward>,
    pub commands: CommandReport,
    pub pairing: Option<PairingOutcome>,
    pub recalls: Vec<RecallOutcome>,
}

impl TurnReport {
    fn rejected(reason: &str) -> Self {
        Self {
            rejected: Some(reason.to_string()),
            ..Default::default()
        }
    }

    pub fn is_rejected(&self) -> bool {
        self.rejected.is_some()
    }
}

/// The reconciliation engine
pub struct Engine {
    pub(crate) session_config: SessionConfig,
    pub(crate) user_defaults: UserSettings,
    pub(crate) registry: PlatformRegistry,
    pub(crate) ctx: Arc<RuntimeContext>,
    pub(crate) store: Arc<dyn StateStore>,
    pub(crate) messenger: Arc<dyn Messenger>,
    pub(crate) sink: Arc<dyn ExchangeSink>,
    pub(crate) recall: Option<Arc<dyn RecallBackend>>,
}

impl Engine {
    /// Engine with default settings, no logging backend and no recall backend
    pub fn new(store: Arc<dyn StateStore>, messenger: Arc<dyn Messenger>) -> Self {
        Self {
            session_config: SessionConfig::default(),
            user_defaults: UserSettings::default(),
            registry: PlatformRegistry::builtin(),
            ctx: Arc::new(RuntimeContext::new()),
            store,
            messenger,
            sink: Arc::new(NullSink),
            recall: None,
        }
    }

    /// Engine wired from configuration.
    ///
    /// When the collector is enabled, the same client forwards exchanges and
    /// answers recall queries.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn StateStore>,
        messenger: Arc<dyn Messenger>,
    ) -> Result<Self> {
        let mut engine = Self::new(store, messenger)
            .with_session_config(config.session.clone())
            .with_user_defaults(config.user.clone());

        if config.collector.is_ready() {
            let client = Arc::new(CollectorClient::new(config.collector.clone())?);
            tracing::info!(url = %client.daily_log_url(), "Collector enabled");
            engine.sink = client.clone();
            engine.recall = Some(client as Arc<dyn RecallBackend>);
        }

        Ok(engine)
    }

    pub fn with_session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    pub fn with_user_defaults(mut self, defaults: UserSettings) -> Self {
        self.user_defaults = defaults;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ExchangeSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_recall(mut self, recall: Arc<dyn RecallBackend>) -> Self {
        self.recall = Some(recall);
        self
    }

    pub fn context(&self) -> &Arc<RuntimeContext> {
        &self.ctx
    }

    /// Drop all volatile state
    pub fn reset_runtime(&self) {
        self.ctx.reset();
    }

    // ============================================
    // Persistence and outbound messages
    // ============================================

    /// Load the project state; a failing store yields an empty aggregate
    pub async fn load_state(&self) -> ProjectState {
        match self.store.load(&self.user_defaults).await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load project state, using empty state");
                ProjectState::with_settings(self.user_defaults.clone())
            }
        }
    }

    /// Persist the project state, returning whether it was written
    pub async fn persist(&self, state: &ProjectState) -> bool {
        match self.store.save(state).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to persist project state");
                false
            }
        }
    }

    async fn broadcast(&self, message: RuntimeMessage) {
        if let Err(e) = self.messenger.broadcast(message).await {
            tracing::warn!(error = %e, "Broadcast failed");
        }
    }

    async fn send_to_tab(&self, tab_id: TabId, message: TabMessage) -> Option<TabAck> {
        match self.messenger.send_to_tab(tab_id, message).await {
            Ok(ack) => ack,
            Err(e) => {
                tracing::warn!(tab_id, error = %e, "Message to tab failed");
                None
            }
        }
    }

    async fn push_context(&self, tab: &TabInfo, session_id: Option<String>) {
        let message = TabMessage::SessionContext {
            current_session_id: session_id,
            associated_url: Some(tab.url.clone()),
        };
        self.send_to_tab(tab.tab_id, message).await;
    }

    // ============================================
    // Session lifecycle
    // ============================================

    /// Create a session, bind its tab, persist and notify.
    ///
    /// With `set_as_global_current` the new session replaces the current one;
    /// otherwise it exists on its own and the global current is untouched.
    pub async fn start_session(
        &self,
        state: &mut ProjectState,
        platform: &str,
        tab: Option<&TabInfo>,
        set_as_global_current: bool,
    ) -> String {
        let now = Utc::now();
        let id = session::create_session(state, platform, tab, now);
        if let Some(tab) = tab {
            self.ctx.bind_tab(tab.tab_id, &id);
        }

        let notice = if set_as_global_current {
            session::promote(state, &id, now)
        } else {
            Some(RuntimeMessage::SessionChanged {
                new_session_id: state.current_session_id.clone(),
                previous_session_id: state.previous_session_id.clone(),
                logs_cleared: false,
            })
        };

        self.persist(state).await;

        if let Some(notice) = notice {
            self.broadcast(notice).await;
        }
        if let Some(tab) = tab {
            self.push_context(tab, Some(id.clone())).await;
        }

        id
    }

    async fn promote_and_notify(&self, state: &mut ProjectState, session_id: &str) {
        if let Some(notice) = session::promote(state, session_id, Utc::now()) {
            self.broadcast(notice).await;
        }
    }

    // ============================================
    // Tab events
    // ============================================

    /// A tab became the focused one. Never creates a session.
    pub async fn on_tab_activated(&self, tab: &TabInfo) -> ResolveOutcome {
        self.handle_tab(tab, true).await
    }

    /// A tab finished navigating. Only load-complete updates are processed;
    /// a background tab on an unseen thread gets its own session.
    pub async fn on_tab_updated(
        &self,
        tab: &TabInfo,
        is_active: bool,
        load_complete: bool,
    ) -> Option<ResolveOutcome> {
        if !load_complete || tab.url.is_empty() {
            return None;
        }
        Some(self.handle_tab(tab, is_active).await)
    }

    /// A tab closed. Unknown tabs are fine.
    pub fn on_tab_removed(&self, tab_id: TabId) {
        self.ctx.forget_tab(tab_id);
    }

    async fn handle_tab(&self, tab: &TabInfo, becoming_active: bool) -> ResolveOutcome {
        let mut state = self.load_state().await;
        let options = ResolveOptions {
            create_if_not_found: !becoming_active,
        };
        let outcome = self.resolve(&mut state, tab, options).await;

        let mut context_push: Option<Option<String>> = None;
        match (&outcome.decision, outcome.session_id.as_deref()) {
            (Decision::Created, Some(id)) => {
                // The session stays distinct unless its tab takes focus
                if becoming_active {
                    self.promote_and_notify(&mut state, id).await;
                    context_push = Some(Some(id.to_string()));
                }
            }
            (decision, Some(id)) if decision.is_match() => {
                if becoming_active {
                    self.promote_and_notify(&mut state, id).await;
                }
                if let Some(session) = state.session_mut(id) {
                    session.touch_active(Utc::now());
                }
                context_push = Some(Some(id.to_string()));
            }
            (Decision::FreshAwaitsInteraction, _) => {
                context_push = Some(state.valid_current_session_id().map(str::to_string));
            }
            _ => {
                if becoming_active && outcome.platform.is_some() {
                    if let Some(current) = state.valid_current_session_id() {
                        context_push = Some(Some(current.to_string()));
                    }
                }
            }
        }

        self.persist(&state).await;

        if let (Some(session_id), Some(_)) = (context_push, &outcome.platform) {
            self.push_context(tab, session_id).await;
        }

        tracing::debug!(
            tab_id = tab.tab_id,
            decision = outcome.decision.as_str(),
            session_id = ?outcome.session_id,
            becoming_active,
            "Tab handled"
        );
        outcome
    }

    /// The page in a tab reported whether it is a fresh, untouched chat.
    ///
    /// Returns the session the page should provisionally report against.
    pub async fn on_page_freshness(&self, tab: &TabInfo, is_fresh: bool) -> PageContext {
        self.ctx.set_freshness(tab.tab_id, is_fresh);

        let mut state = self.load_state().await;
        let platform = self.registry.classify(&tab.url);

        let current_session_id = match &platform {
            Some(p) if p.is_specific_chat => state
                .sessions
                .values()
                .find(|s| {
                    s.matches_origin(&tab.url, &p.platform_id)
                        && s.metadata.status == SessionStatus::Active
                })
                .map(|s| s.id.clone()),
            Some(p) if is_fresh => match state.valid_current_session_id() {
                Some(id) => Some(id.to_string()),
                None => {
                    tracing::info!(tab_id = tab.tab_id, "No current session for fresh page, starting one");
                    Some(self.start_session(&mut state, &p.platform_id, Some(tab), true).await)
                }
            },
            _ => state.valid_current_session_id().map(str::to_string),
        };

        PageContext {
            current_session_id,
            associated_url: Some(tab.url.clone()),
        }
    }

    /// Resolve the focused tab at startup and make sure a current session exists
    pub async fn startup(&self, active_tab: Option<&TabInfo>) -> Option<String> {
        let mut state = self.load_state().await;

        if let Some(tab) = active_tab {
            let options = ResolveOptions {
                create_if_not_found: true,
            };
            let outcome = self.resolve(&mut state, tab, options).await;
            if let Some(id) = outcome.session_id.as_deref() {
                self.promote_and_notify(&mut state, id).await;
            }
        }

        if state.valid_current_session_id().is_none() {
            tracing::info!("No valid current session at startup, starting default session");
            self.start_session(&mut state, UNKNOWN_PLATFORM, None, true).await;
        } else {
            self.persist(&state).await;
        }

        state.current_session_id.clone()
    }

    // ============================================
    // Turns
    // ============================================

    fn turn_platform(&self, event: &TurnEvent) -> String {
        event
            .platform
            .clone()
            .filter(|p| !p.is_empty())
            .or_else(|| self.registry.classify(&event.tab.url).map(|p| p.platform_id))
            .unwrap_or_else(|| UNKNOWN_PLATFORM.to_string())
    }

    /// Pick the session a turn belongs to, creating one when needed
    async fn route_turn(&self, state: &mut ProjectState, event: &TurnEvent, platform: &str) -> String {
        let tab = &event.tab;

        if event.role == Role::User
            && self.ctx.tab_status(tab.tab_id) == Some(TabStatus::FreshAwaitingInteraction)
        {
            tracing::info!(tab_id = tab.tab_id, "First interaction on fresh page, starting session");
            let id = self.start_session(state, platform, Some(tab), true).await;
            self.ctx.set_tab_status(tab.tab_id, TabStatus::SessionAssigned);
            return id;
        }

        if let Some(id) = self
            .ctx
            .tab_session(tab.tab_id)
            .filter(|id| state.sessions.contains_key(id))
        {
            return id;
        }

        if let Some(id) = state.valid_current_session_id() {
            return id.to_string();
        }

        tracing::error!(tab_id = tab.tab_id, role = %event.role, "No session for turn, starting failsafe session");
        let id = self.start_session(state, platform, Some(tab), true).await;
        self.ctx.set_tab_status(tab.tab_id, TabStatus::SessionAssigned);
        id
    }

    /// Process one chat turn end to end
    pub async fn on_turn(&self, event: TurnEvent) -> TurnReport {
        if event.full_text.trim().is_empty() {
            tracing::warn!(tab_id = event.tab.tab_id, role = %event.role, "Turn without text rejected");
            return TurnReport::rejected("turn has no text");
        }

        let mut state = self.load_state().await;
        let platform = self.turn_platform(&event);
        let session_id = self.route_turn(&mut state, &event, &platform).await;
        let tab = event.tab.clone();

        let mut report = TurnReport {
            session_id: Some(session_id.clone()),
            ..Default::default()
        };

        let detected = event
            .detected_commands
            .clone()
            .unwrap_or_else(|| detect(&event.full_text, event.role));

        // Relay
        if event.role == Role::Assistant {
            if let Some(hop) = self.ctx.relay_route(tab.tab_id, &event.full_text) {
                let message = TabMessage::InsertPrompt {
                    prompt: hop.prompt.clone(),
                    auto_submit: true,
                };
                if let Err(e) = self.messenger.send_to_tab(hop.target_tab_id, message).await {
                    tracing::warn!(target_tab_id = hop.target_tab_id, error = %e, "Relay forward failed");
                    self.ctx.disarm_relay();
                }
                report.relayed = Some(hop);
            }
        }

        // Commands
        report.commands = process_turn_commands(
            &self.ctx,
            self.messenger.as_ref(),
            &detected,
            event.role,
            &session_id,
        )
        .await;

        if let Some(text) = report.commands.inject_text.clone() {
            let message = TabMessage::InsertPrompt {
                prompt: text,
                auto_submit: false,
            };
            self.send_to_tab(tab.tab_id, message).await;
        }

        // Pairing
        let payload = TurnPayload::from_event(&event, detected, Utc::now());
        let outcome = pairing::on_turn(
            &self.ctx,
            &mut state,
            &session_id,
            payload,
            &self.session_config,
        );

        self.persist(&state).await;

        if let PairingOutcome::Committed { chunk, .. } = &outcome {
            self.broadcast(RuntimeMessage::LogCommitted {
                entry: chunk.clone(),
                current_session_id: state.current_session_id.clone(),
                actual_session_id_logged_to: session_id.clone(),
            })
            .await;

            if let Err(e) = self.sink.forward(chunk).await {
                tracing::warn!(chunk_id = %chunk.chunk_id, error = %e, "Forwarding exchange failed");
            }
        }
        report.pairing = Some(outcome);

        // Recall
        for action in report.commands.background.clone() {
            let BackgroundAction::PerformRecall {
                search_term,
                original_command_id,
            } = action;

            match &self.recall {
                Some(backend) => {
                    let outcome = self
                        .orchestrate_recall(backend.as_ref(), tab.tab_id, &search_term, &original_command_id)
                        .await;
                    report.recalls.push(outcome);
                }
                None => tracing::info!(
                    command_id = %original_command_id,
                    search_term = %search_term,
                    "Recall handed off"
                ),
            }
        }

        report
    }

    /// Fulfil a RECALL: query, display in the tab, then prompt for a follow-up
    async fn orchestrate_recall(
        &self,
        backend: &dyn RecallBackend,
        tab_id: TabId,
        search_term: &str,
        command_id: &str,
    ) -> RecallOutcome {
        let response = backend.recall(search_term).await;
        if let Err(e) = &response {
            tracing::warn!(search_term, error = %e, "Recall query failed");
        }

        let display_text = recall_display_text(search_term, &response);
        let ack = self
            .send_to_tab(
                tab_id,
                TabMessage::DisplayInChat {
                    text: display_text.clone(),
                },
            )
            .await;
        let displayed = ack.is_some_and(|a| a.confirms_displayed());

        let mut follow_up_sent = false;
        if displayed {
            if let Ok(response) = &response {
                if let Some(results) = response.usable_results() {
                    let query = response.query.as_deref().unwrap_or(search_term);
                    let message = TabMessage::InsertPrompt {
                        prompt: recall_follow_up_prompt(query, results),
                        auto_submit: true,
                    };
                    follow_up_sent = self.messenger.send_to_tab(tab_id, message).await.is_ok();
                }
            }
        }

        let (state, error) = if displayed {
            (CommandState::Completed, None)
        } else {
            (
                CommandState::Failed,
                Some("DOM display failed or no recall results for AI prompt".to_string()),
            )
        };

        tracing::info!(
            command_id,
            search_term,
            state = %state,
            follow_up_sent,
            "Recall resolved"
        );

        RecallOutcome {
            command_id: command_id.to_string(),
            search_term: search_term.to_string(),
            display_text,
            follow_up_sent,
            state,
            error,
        }
    }

    // ============================================
    // Administration
    // ============================================

    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        session::list_sessions(&self.load_state().await)
    }

    pub async fn session_logs(&self) -> SessionLogs {
        session::session_logs(&self.load_state().await)
    }

    /// Make a session the global current one
    pub async fn set_active_session(&self, session_id: &str) -> Result<()> {
        let mut state = self.load_state().await;
        if state.session(session_id).is_none() {
            return Err(Error::SessionNotFound(session_id.to_string()));
        }

        self.promote_and_notify(&mut state, session_id).await;
        if let Some(session) = state.session_mut(session_id) {
            session.touch_active(Utc::now());
        }
        self.persist(&state).await;
        Ok(())
    }

    /// Delete a session and everything volatile that points at it
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        let mut state = self.load_state().await;
        let was_current = state.current_session_id.as_deref() == Some(session_id);

        if session::delete_session(&mut state, session_id).is_none() {
            return Err(Error::SessionNotFound(session_id.to_string()));
        }
        self.ctx.unbind_session(session_id);
        self.ctx.take_pending(session_id);

        self.persist(&state).await;

        if was_current {
            self.broadcast(RuntimeMessage::SessionChanged {
                new_session_id: state.current_session_id.clone(),
                previous_session_id: state.previous_session_id.clone(),
                logs_cleared: true,
            })
            .await;
        }
        Ok(())
    }

    /// Start a new global session bound to `tab`
    pub async fn force_new_session_for_tab(&self, tab: &TabInfo) -> String {
        let mut state = self.load_state().await;
        let platform = self
            .registry
            .classify(&tab.url)
            .map(|p| p.platform_id)
            .unwrap_or_else(|| UNKNOWN_PLATFORM.to_string());
        let id = self.start_session(&mut state, &platform, Some(tab), true).await;
        self.ctx.set_tab_status(tab.tab_id, TabStatus::SessionAssigned);
        id
    }

    /// Plain-text transcript of one session
    pub async fn export_session(&self, session_id: &str) -> Result<String> {
        let state = self.load_state().await;
        let session = state
            .session(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
        Ok(format::export_session(session, &state.user_settings))
    }
}

/// Text shown in the chat after a recall query
pub fn recall_display_text(search_term: &str, response: &Result<RecallResponse>) -> String {
    let body = match response {
        Ok(r) => match (r.status.as_deref(), r.results_for_injection.as_deref()) {
            (Some(RecallResponse::NO_MATCHES), _) => format!(
                "No information found in Stacker for \"{}\". Please use your own knowledge.",
                search_term
            ),
            (Some(RecallResponse::NO_DATA), _) => format!(
                "Stacker logs not loaded on server. Could not recall \"{}\".",
                search_term
            ),
            (_, Some(results)) if !results.is_empty() => defang_for_recall(results),
            _ => format!(
                "Could not retrieve information for \"{}\" from server Stacker.",
                search_term
            ),
        },
        Err(e) => format!(
            "Error recalling information for \"{}\": {}",
            search_term, e
        ),
    };
    format!("{{{{{{SYSTEM}}}}}} {} {{{{{{/SYSTEM}}}}}}", body)
}

/// Prompt submitted after recalled context was displayed
pub fn recall_follow_up_prompt(query: &str, results: &str) -> String {
    format!(
        "System Task for Gemini (following a user recall on \"{}\"): Based on the following recalled context that was just displayed to the user, please provide a relevant follow-up comment or question.\n\nRecalled Context:\n\"{}\"",
        query,
        defang_for_recall(results)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recall_display_variants() {
        let ok = Ok(RecallResponse {
            status: Some("success".into()),
            query: Some("rust".into()),
            results_for_injection: Some("Rust is (((NOTIFY x)))".into()),
        });
        assert_eq!(
            recall_display_text("rust", &ok),
            "{{{SYSTEM}}} Rust is :::NOTIFY x::: {{{/SYSTEM}}}"
        );

        let none = Ok(RecallResponse {
            status: Some(RecallResponse::NO_MATCHES.into()),
            ..Default::default()
        });
        assert_eq!(
            recall_display_text("rust", &none),
            "{{{SYSTEM}}} No information found in Stacker for \"rust\". Please use your own knowledge. {{{/SYSTEM}}}"
        );

        let no_data = Ok(RecallResponse {
            status: Some(RecallResponse::NO_DATA.into()),
            ..Default::default()
        });
        assert!(recall_display_text("rust", &no_data).contains("Stacker logs not loaded on server"));

        let empty = Ok(RecallResponse::default());
        assert!(recall_display_text("rust", &empty).contains("Could not retrieve information for \"rust\""));

        let err: Result<RecallResponse> = Err(Error::Collector("HTTP error! status: 500".into()));
        assert!(recall_display_text("rust", &err).contains("Error recalling information for \"rust\""));
    }

    #[test]
    fn test_follow_up_prompt() {
        let prompt = recall_follow_up_prompt("rust", "ownership");
        assert!(prompt.starts_with("System Task for Gemini (following a user recall on \"rust\")"));
        assert!(prompt.ends_with("Recalled Context:\n\"ownership\""));
    }
}
