//! Session lifecycle
//!
//! State transitions on the persisted aggregate. Nothing here persists or
//! notifies; the [`Engine`](crate::Engine) does that around these calls.

pub mod resolver;

pub use resolver::{Decision, ResolveOptions, ResolveOutcome};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::messaging::RuntimeMessage;
use crate::types::{
    new_session_id, ExchangeChunk, ProjectState, Session, SessionMetadata, SessionStatus, TabInfo,
    UserSettings,
};

/// Number of previous-session chunks shown while the current one is empty
pub const CONTINUITY_CHUNKS: usize = 3;

/// Insert a fresh active session and return its id. Global current is untouched.
pub fn create_session(
    state: &mut ProjectState,
    platform: &str,
    tab: Option<&TabInfo>,
    now: DateTime<Utc>,
) -> String {
    let id = new_session_id();
    let session = Session::new(id.clone(), platform, tab, now);
    tracing::info!(
        session_id = %id,
        platform,
        tab_id = ?tab.map(|t| t.tab_id),
        "Session created"
    );
    state.sessions.insert(id.clone(), session);
    id
}

/// Make `session_id` the global current session.
///
/// The outgoing current session is marked inactive and stamped ended.
/// Returns the notification to broadcast, or `None` when nothing changed.
pub fn promote(
    state: &mut ProjectState,
    session_id: &str,
    now: DateTime<Utc>,
) -> Option<RuntimeMessage> {
    if !state.sessions.contains_key(session_id) {
        tracing::error!(session_id, "Cannot promote unknown session");
        return None;
    }
    if state.current_session_id.as_deref() == Some(session_id) {
        return None;
    }

    let old = state.current_session_id.take();
    if let Some(old_session) = old.as_deref().and_then(|id| state.sessions.get_mut(id)) {
        old_session.metadata.status = SessionStatus::Inactive;
        old_session.metadata.ended_at = Some(now);
    }

    state.previous_session_id = old;
    state.current_session_id = Some(session_id.to_string());

    tracing::info!(
        session_id,
        previous = ?state.previous_session_id,
        "Global current session changed"
    );

    Some(RuntimeMessage::SessionChanged {
        new_session_id: state.current_session_id.clone(),
        previous_session_id: state.previous_session_id.clone(),
        logs_cleared: true,
    })
}

/// Remove a session. Returns the removed session, or `None` if it was unknown.
///
/// When the current session is removed, current falls back to the most
/// recently started remaining session, or none.
pub fn delete_session(state: &mut ProjectState, session_id: &str) -> Option<Session> {
    let removed = state.sessions.remove(session_id)?;

    if state.previous_session_id.as_deref() == Some(session_id) {
        state.previous_session_id = None;
    }

    if state.current_session_id.as_deref() == Some(session_id) {
        state.current_session_id = state.most_recently_started().map(str::to_string);
        tracing::info!(
            deleted = session_id,
            current = ?state.current_session_id,
            "Current session deleted, reassigned"
        );
    } else {
        tracing::info!(session_id, "Session deleted");
    }

    Some(removed)
}

// ============================================
// Read models
// ============================================

/// One row of the session list
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub platform: String,
    pub log_count: usize,
    pub status: SessionStatus,
    pub is_current: bool,
}

/// Summaries of all sessions, most recently started first
pub fn list_sessions(state: &ProjectState) -> Vec<SessionSummary> {
    let current = state.current_session_id.as_deref();
    let mut summaries: Vec<SessionSummary> = state
        .sessions
        .values()
        .map(|s| SessionSummary {
            id: s.id.clone(),
            title: s.metadata.title.clone(),
            started_at: s.metadata.started_at,
            last_activity_at: s.metadata.last_activity_at,
            platform: s.metadata.platform.clone(),
            log_count: s.log_entries.len(),
            status: s.metadata.status,
            is_current: current == Some(s.id.as_str()),
        })
        .collect();

    summaries.sort_by(|a, b| b.started_at.cmp(&a.started_at).then_with(|| b.id.cmp(&a.id)));
    summaries
}

/// What the popup shows for the current session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionLogs {
    pub session_id: Option<String>,
    pub title: Option<String>,
    pub metadata: Option<SessionMetadata>,
    pub entries: Vec<ExchangeChunk>,
    /// Entries come from the previous session because the current one is empty
    pub continuity: bool,
    pub user_settings: UserSettings,
}

pub fn session_logs(state: &ProjectState) -> SessionLogs {
    let current = state.current_session();
    let mut logs = SessionLogs {
        session_id: current.map(|s| s.id.clone()),
        title: current.map(|s| s.metadata.title.clone()),
        metadata: current.map(|s| s.metadata.clone()),
        entries: current.map(|s| s.log_entries.clone()).unwrap_or_default(),
        continuity: false,
        user_settings: state.user_settings.clone(),
    };

    if logs.entries.is_empty() {
        let previous = state
            .previous_session_id
            .as_deref()
            .and_then(|id| state.session(id));
        if let Some(previous) = previous.filter(|p| !p.log_entries.is_empty()) {
            let start = previous.log_entries.len().saturating_sub(CONTINUITY_CHUNKS);
            logs.entries = previous.log_entries[start..].to_vec();
            logs.continuity = true;
        }
    }

    logs
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn add(state: &mut ProjectState, minutes_ago: i64) -> String {
        create_session(state, "manual", None, Utc::now() - Duration::minutes(minutes_ago))
    }

    #[test]
    fn test_create_does_not_touch_current() {
        let mut state = ProjectState::default();
        let tab = TabInfo::new(4, "https://chatgpt.com/c/abc");
        let id = create_session(&mut state, "chatgpt-interface", Some(&tab), Utc::now());

        assert!(state.current_session_id.is_none());
        let session = state.session(&id).unwrap();
        assert_eq!(session.id, id);
        assert_eq!(session.metadata.initial_tab_id, Some(4));
    }

    #[test]
    fn test_promote_retires_old_current() {
        let mut state = ProjectState::default();
        let a = add(&mut state, 10);
        let b = add(&mut state, 5);

        let msg = promote(&mut state, &a, Utc::now()).unwrap();
        assert_eq!(
            msg,
            RuntimeMessage::SessionChanged {
                new_session_id: Some(a.clone()),
                previous_session_id: None,
                logs_cleared: true,
            }
        );

        promote(&mut state, &b, Utc::now()).unwrap();
        assert_eq!(state.current_session_id.as_deref(), Some(b.as_str()));
        assert_eq!(state.previous_session_id.as_deref(), Some(a.as_str()));
        let old = state.session(&a).unwrap();
        assert_eq!(old.metadata.status, SessionStatus::Inactive);
        assert!(old.metadata.ended_at.is_some());

        // Already current, or unknown: no change
        assert!(promote(&mut state, &b, Utc::now()).is_none());
        assert!(promote(&mut state, "ghost", Utc::now()).is_none());
        assert_eq!(state.current_session_id.as_deref(), Some(b.as_str()));
    }

    #[test]
    fn test_delete_current_falls_back_to_latest_started() {
        let mut state = ProjectState::default();
        let oldest = add(&mut state, 30);
        let newest = add(&mut state, 1);
        let middle = add(&mut state, 10);
        promote(&mut state, &middle, Utc::now());

        assert!(delete_session(&mut state, &middle).is_some());
        assert_eq!(state.current_session_id.as_deref(), Some(newest.as_str()));
        assert!(state.is_consistent());

        assert!(delete_session(&mut state, &newest).is_some());
        assert_eq!(state.current_session_id.as_deref(), Some(oldest.as_str()));

        assert!(delete_session(&mut state, &oldest).is_some());
        assert!(state.current_session_id.is_none());
        assert!(state.is_consistent());

        assert!(delete_session(&mut state, "ghost").is_none());
    }

    #[test]
    fn test_delete_non_current_keeps_current() {
        let mut state = ProjectState::default();
        let a = add(&mut state, 10);
        let b = add(&mut state, 5);
        promote(&mut state, &a, Utc::now());
        promote(&mut state, &b, Utc::now());

        delete_session(&mut state, &a);
        assert_eq!(state.current_session_id.as_deref(), Some(b.as_str()));
        assert!(state.previous_session_id.is_none());
    }

    #[test]
    fn test_list_sessions_newest_first() {
        let mut state = ProjectState::default();
        let old = add(&mut state, 10);
        let new = add(&mut state, 1);
        promote(&mut state, &old, Utc::now());

        let list = list_sessions(&state);
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, new);
        assert!(list[1].is_current);
        assert_eq!(list[1].log_count, 0);
    }

    #[test]
    fn test_session_logs_continuity() {
        let mut state = ProjectState::default();
        let a = add(&mut state, 10);
        promote(&mut state, &a, Utc::now());

        let empty = session_logs(&state);
        assert_eq!(empty.session_id.as_deref(), Some(a.as_str()));
        assert!(empty.entries.is_empty());
        assert!(!empty.continuity);

        // Give the first session five chunks, then move on
        for n in 0..5 {
            let chunk = sample_chunk(&a, n);
            state.session_mut(&a).unwrap().log_entries.push(chunk);
        }
        let b = add(&mut state, 1);
        promote(&mut state, &b, Utc::now());

        let logs = session_logs(&state);
        assert_eq!(logs.session_id.as_deref(), Some(b.as_str()));
        assert!(logs.continuity);
        let turns: Vec<u32> = logs.entries.iter().map(|c| c.turn_in_conversation).collect();
        assert_eq!(turns, vec![3, 4, 5]);
    }

    fn sample_chunk(session_id: &str, n: u32) -> ExchangeChunk {
        use crate::types::{CaptureMetadata, TurnText};
        let text = |t: &str| TurnText {
            text: t.into(),
            raw_text: t.into(),
            raw_source_details: None,
        };
        ExchangeChunk {
            chunk_id: format!("chunk-{}", n),
            conversation_id: session_id.into(),
            parent_chunk_id: None,
            timestamp_user_prompt: Utc::now(),
            timestamp_assistant_response_start: None,
            timestamp_assistant_response_complete: Utc::now(),
            source_llm_provider: "manual".into(),
            source_llm_model_approx: None,
            turn_in_conversation: n + 1,
            chunk_type: "exchange".into(),
            user_input: text("q"),
            assistant_response: text("a"),
            extension_capture_metadata: CaptureMetadata {
                extension_version: "0".into(),
                capture_method: "test".into(),
                tab_id_at_capture: None,
                window_id_at_capture: None,
                browser_name_at_capture: "Unknown".into(),
                url_at_capture: None,
            },
            data_origin_app: "Heartbeat-v0".into(),
            initial_semantic_tokens: Vec::new(),
            notes: None,
            custom_fields: None,
        }
    }
}
