//! Core domain types for heartbeat
//!
//! These types make up the persisted aggregate ([`ProjectState`]) and the
//! turn events that arrive from the capture layer.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Session** | A logical conversation thread with ordered exchange chunks |
//! | **Exchange chunk** | One paired (user turn, assistant turn) record |
//! | **Turn** | One role-tagged message event from a browser tab |
//! | **Tab binding** | Volatile association of a browser tab with a session |
//!
//! Field names serialize exactly as the capture layer and the logging backend
//! expect them (`currentSessionId`, `chunk_id`, `conversationId`, ...), so a
//! persisted record can be shared with them unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::command::DetectedCommands;

/// Browser tab identifier
pub type TabId = i64;

/// Browser window identifier
pub type WindowId = i64;

/// Storage key of the persisted aggregate
pub const STATE_RECORD_KEY: &str = "projectYouData";

// ============================================
// Project state
// ============================================

/// Root aggregate persisted as one opaque record.
///
/// Invariant: a non-null `current_session_id` keys an existing [`Session`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectState {
    pub current_session_id: Option<String>,
    pub previous_session_id: Option<String>,
    #[serde(default)]
    pub user_settings: UserSettings,
    #[serde(default)]
    pub sessions: BTreeMap<String, Session>,
    /// Stored session entries that failed to decode, carried through saves verbatim
    #[serde(skip)]
    pub unreadable_sessions: BTreeMap<String, serde_json::Value>,
}

impl ProjectState {
    /// Empty aggregate carrying the given settings
    pub fn with_settings(user_settings: UserSettings) -> Self {
        Self {
            user_settings,
            ..Default::default()
        }
    }

    pub fn session(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn session_mut(&mut self, id: &str) -> Option<&mut Session> {
        self.sessions.get_mut(id)
    }

    /// The global current session, if it exists
    pub fn current_session(&self) -> Option<&Session> {
        self.current_session_id
            .as_deref()
            .and_then(|id| self.sessions.get(id))
    }

    /// Returns the current session id only when it keys an existing session
    pub fn valid_current_session_id(&self) -> Option<&str> {
        self.current_session().map(|s| s.id.as_str())
    }

    /// Whether the current-session invariant holds
    pub fn is_consistent(&self) -> bool {
        match &self.current_session_id {
            Some(id) => self.sessions.contains_key(id),
            None => true,
        }
    }

    /// Id of the most recently started session
    pub fn most_recently_started(&self) -> Option<&str> {
        self.sessions
            .values()
            .max_by(|a, b| {
                a.metadata
                    .started_at
                    .cmp(&b.metadata.started_at)
                    .then_with(|| a.id.cmp(&b.id))
            })
            .map(|s| s.id.as_str())
    }

    /// First session whose originating url and platform match
    pub fn find_by_origin(&self, url: &str, platform: &str) -> Option<&Session> {
        self.sessions.values().find(|s| s.matches_origin(url, platform))
    }
}

/// Persisted user preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    #[serde(default = "default_time_zone", alias = "preferred_time_zone")]
    pub preferred_time_zone: String,
    #[serde(default = "default_nickname")]
    pub nickname: String,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            preferred_time_zone: default_time_zone(),
            nickname: default_nickname(),
        }
    }
}

fn default_time_zone() -> String {
    "America/Los_Angeles".to_string()
}

fn default_nickname() -> String {
    "User".to_string()
}

// ============================================
// Sessions
// ============================================

/// Whether a session is the tracked foreground task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    #[default]
    Inactive,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Inactive => "inactive",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub started_at: DateTime<Utc>,
    /// Missing in records written by older capture layers; see [`Session::fill_missing_metadata`]
    #[serde(default)]
    pub last_activity_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default = "default_platform")]
    pub platform: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub initiating_url: Option<String>,
    #[serde(default)]
    pub initial_tab_id: Option<TabId>,
    #[serde(default)]
    pub status: SessionStatus,
}

fn default_platform() -> String {
    "unknown".to_string()
}

/// A logical conversation thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(default)]
    pub id: String,
    pub metadata: SessionMetadata,
    /// Committed exchanges in completion order
    #[serde(default)]
    pub log_entries: Vec<ExchangeChunk>,
    /// Exchanges waiting to graduate into the rolling window
    #[serde(default)]
    pub stacker_processing_buffer: Vec<ExchangeChunk>,
    /// Rolling window, most recent first
    #[serde(default)]
    pub stacker_chunks: Vec<ExchangeChunk>,
}

impl Session {
    /// Create a fresh, active session with empty buffers
    pub fn new(id: String, platform: &str, tab: Option<&TabInfo>, now: DateTime<Utc>) -> Self {
        let host = tab.and_then(|t| url_host(&t.url));
        let title = session_title(&id, platform, host);

        Self {
            metadata: SessionMetadata {
                started_at: now,
                last_activity_at: now,
                ended_at: None,
                platform: platform.to_string(),
                title,
                initiating_url: tab.map(|t| t.url.clone()),
                initial_tab_id: tab.map(|t| t.tab_id),
                status: SessionStatus::Active,
            },
            id,
            log_entries: Vec::new(),
            stacker_processing_buffer: Vec::new(),
            stacker_chunks: Vec::new(),
        }
    }

    /// Fill metadata fields a partial record left at their defaults.
    ///
    /// Returns whether anything changed.
    pub fn fill_missing_metadata(&mut self) -> bool {
        let mut changed = false;
        let meta = &mut self.metadata;
        if meta.last_activity_at < meta.started_at {
            meta.last_activity_at = meta.started_at;
            changed = true;
        }
        if meta.title.is_empty() {
            let host = meta.initiating_url.as_deref().and_then(url_host);
            let title = session_title(&self.id, &meta.platform, host);
            meta.title = title;
            changed = true;
        }
        changed
    }

    pub fn matches_origin(&self, url: &str, platform: &str) -> bool {
        self.metadata.initiating_url.as_deref() == Some(url) && self.metadata.platform == platform
    }

    pub fn last_chunk(&self) -> Option<&ExchangeChunk> {
        self.log_entries.last()
    }

    /// Mark the session active and bump its activity timestamp
    pub fn touch_active(&mut self, now: DateTime<Utc>) {
        self.metadata.status = SessionStatus::Active;
        self.metadata.last_activity_at = now;
    }
}

fn session_title(id: &str, platform: &str, host: Option<&str>) -> String {
    match host {
        Some(host) => format!("Session for {} ({})", host, platform),
        None => format!(
            "Session {} ({})",
            id.chars().take(12).collect::<String>(),
            platform
        ),
    }
}

/// Generate an opaque, time-ordered session id
pub fn new_session_id() -> String {
    format!(
        "session-{}-{}",
        Utc::now().timestamp_millis(),
        random_suffix(5)
    )
}

/// Generate an opaque, time-ordered chunk id
pub fn new_chunk_id() -> String {
    format!(
        "chunk-{}-{}",
        Utc::now().timestamp_millis(),
        random_suffix(9)
    )
}

fn random_suffix(len: usize) -> String {
    uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(len)
        .collect()
}

/// Host part of an http(s) URL
fn url_host(url: &str) -> Option<&str> {
    let rest = url.split_once("://").map(|(_, rest)| rest)?;
    let host = rest.split(['/', '?', '#']).next()?;
    let host = host.rsplit_once('@').map(|(_, h)| h).unwrap_or(host);
    (!host.is_empty()).then_some(host)
}

// ============================================
// Tabs and turns
// ============================================

/// Identity of a browser tab at the time of an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    pub tab_id: TabId,
    #[serde(default)]
    pub window_id: Option<WindowId>,
    pub url: String,
}

impl TabInfo {
    pub fn new(tab_id: TabId, url: impl Into<String>) -> Self {
        Self {
            tab_id,
            window_id: None,
            url: url.into(),
        }
    }
}

/// Author of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            _ => Err(format!("unknown role: {}", s)),
        }
    }
}

/// One raw turn event from the capture layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnEvent {
    pub role: Role,
    pub full_text: String,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default, alias = "model_approx")]
    pub model_approx: Option<String>,
    /// Structure pre-parsed by the capture layer; detected here when absent
    #[serde(default)]
    pub detected_commands: Option<DetectedCommands>,
    #[serde(default, alias = "raw_source_details")]
    pub raw_source_details: Option<serde_json::Value>,
    pub tab: TabInfo,
    #[serde(default, alias = "timestamp_assistant_response_start")]
    pub timestamp_assistant_response_start: Option<DateTime<Utc>>,
}

impl TurnEvent {
    pub fn new(role: Role, full_text: impl Into<String>, tab: TabInfo) -> Self {
        Self {
            role,
            full_text: full_text.into(),
            platform: None,
            model_approx: None,
            detected_commands: None,
            raw_source_details: None,
            tab,
            timestamp_assistant_response_start: None,
        }
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }
}

// ============================================
// Exchange chunks
// ============================================

/// One side of an exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnText {
    /// Text with directive delimiters softened for logging
    pub text: String,
    /// Text exactly as captured
    pub raw_text: String,
    pub raw_source_details: Option<serde_json::Value>,
}

/// Where and how an exchange was captured
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureMetadata {
    pub extension_version: String,
    pub capture_method: String,
    pub tab_id_at_capture: Option<TabId>,
    pub window_id_at_capture: Option<WindowId>,
    pub browser_name_at_capture: String,
    pub url_at_capture: Option<String>,
}

/// Atomic pairing of one user turn and one assistant turn. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeChunk {
    pub chunk_id: String,
    #[serde(rename = "conversationId")]
    pub conversation_id: String,
    pub parent_chunk_id: Option<String>,
    pub timestamp_user_prompt: DateTime<Utc>,
    pub timestamp_assistant_response_start: Option<DateTime<Utc>>,
    pub timestamp_assistant_response_complete: DateTime<Utc>,
    pub source_llm_provider: String,
    pub source_llm_model_approx: Option<String>,
    /// 1-based, contiguous within a session
    pub turn_in_conversation: u32,
    #[serde(rename = "type")]
    pub chunk_type: String,
    pub user_input: TurnText,
    pub assistant_response: TurnText,
    pub extension_capture_metadata: CaptureMetadata,
    pub data_origin_app: String,
    pub initial_semantic_tokens: Vec<String>,
    pub notes: Option<String>,
    pub custom_fields: Option<serde_json::Value>,
}
