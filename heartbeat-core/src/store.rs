//! Persistence abstraction for the project state
//!
//! The whole [`ProjectState`] aggregate is stored as one opaque JSON record.
//! Every state-touching operation is a read-modify-write over that record;
//! there is no field-level persistence and no version check, so two handlers
//! interleaving across a suspension point can lose each other's updates.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use crate::error::{Error, Result};
use crate::types::{ProjectState, Session, UserSettings, STATE_RECORD_KEY};

/// Async get/set over opaque string records
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Fetch a record, `None` when absent
    async fn get_record(&self, key: &str) -> Result<Option<String>>;

    /// Insert or replace a record
    async fn set_record(&self, key: &str, value: &str) -> Result<()>;

    /// Load the project state.
    ///
    /// Decoding is lenient: a session entry that cannot be read is skipped
    /// and logged while every other session loads, missing metadata fields
    /// take their defaults, and a dangling `currentSessionId` is cleared.
    /// Only an absent record, or a repair that dropped nothing, is written
    /// back; after a decode error the stored record is left untouched.
    async fn load(&self, defaults: &UserSettings) -> Result<ProjectState> {
        let raw = self.get_record(STATE_RECORD_KEY).await?;

        let decoded = decode_state(raw.as_deref(), defaults);
        if decoded.write_back {
            if let Err(e) = self.save(&decoded.state).await {
                tracing::warn!(error = %e, "Failed to write repaired project state");
            }
        }
        Ok(decoded.state)
    }

    /// Persist the whole project state
    async fn save(&self, state: &ProjectState) -> Result<()> {
        let json = encode_state(state)?;
        self.set_record(STATE_RECORD_KEY, &json).await
    }
}

/// Serialize the state, putting back session entries that failed to decode
pub(crate) fn encode_state(state: &ProjectState) -> Result<String> {
    if state.unreadable_sessions.is_empty() {
        return Ok(serde_json::to_string(state)?);
    }

    let mut value = serde_json::to_value(state)?;
    if let Some(Value::Object(sessions)) = value.get_mut("sessions") {
        for (key, raw) in &state.unreadable_sessions {
            sessions.entry(key.clone()).or_insert_with(|| raw.clone());
        }
    }
    Ok(serde_json::to_string(&value)?)
}

/// Result of decoding the stored record
pub(crate) struct DecodedState {
    pub state: ProjectState,
    /// Whether the decoded state should replace the stored record
    pub write_back: bool,
}

/// Decode a stored record one top-level field and one session at a time
pub(crate) fn decode_state(raw: Option<&str>, defaults: &UserSettings) -> DecodedState {
    let Some(raw) = raw else {
        tracing::info!("No stored project state, initializing");
        return DecodedState {
            state: ProjectState::with_settings(defaults.clone()),
            write_back: true,
        };
    };

    let mut record = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(record)) => record,
        other => {
            tracing::error!(
                error = ?other.err(),
                "Stored project state is not a JSON object, leaving it untouched"
            );
            return DecodedState {
                state: ProjectState::with_settings(defaults.clone()),
                write_back: false,
            };
        }
    };

    let mut repaired = false;
    let mut lost = false;

    let user_settings: UserSettings = match record.remove("userSettings") {
        Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Stored user settings are invalid, using defaults");
            lost = true;
            defaults.clone()
        }),
        None => {
            repaired = true;
            defaults.clone()
        }
    };

    let mut sessions = BTreeMap::new();
    let mut unreadable_sessions = BTreeMap::new();
    match record.remove("sessions") {
        Some(Value::Object(entries)) => {
            for (key, value) in entries {
                match Session::deserialize(&value) {
                    Ok(mut session) => {
                        // Sessions stored without an id field inherit their map key
                        if session.id != key {
                            session.id = key.clone();
                            repaired = true;
                        }
                        repaired |= session.fill_missing_metadata();
                        sessions.insert(key, session);
                    }
                    Err(e) => {
                        tracing::warn!(session_id = %key, error = %e, "Skipping unreadable session");
                        unreadable_sessions.insert(key, value);
                        lost = true;
                    }
                }
            }
        }
        Some(_) => {
            tracing::warn!("Stored sessions are not a map, ignoring them");
            lost = true;
        }
        None => repaired = true,
    }

    let mut state = ProjectState {
        current_session_id: optional_string(record.remove("currentSessionId")),
        previous_session_id: optional_string(record.remove("previousSessionId")),
        user_settings,
        sessions,
        unreadable_sessions,
    };

    if !state.is_consistent() {
        tracing::warn!(
            current_session_id = ?state.current_session_id,
            "Current session does not exist, clearing"
        );
        state.current_session_id = None;
        repaired = true;
    }

    DecodedState {
        state,
        write_back: repaired && !lost,
    }
}

fn optional_string(value: Option<Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

/// In-process store, used for tests and embedding
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, String>>,
    fail_writes: Mutex<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with a storage error
    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.lock() = fail;
    }

    /// Raw record contents, if any
    pub fn raw(&self, key: &str) -> Option<String> {
        self.records.lock().get(key).cloned()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get_record(&self, key: &str) -> Result<Option<String>> {
        Ok(self.records.lock().get(key).cloned())
    }

    async fn set_record(&self, key: &str, value: &str) -> Result<()> {
        if *self.fail_writes.lock() {
            return Err(Error::Storage(format!("write to {} rejected", key)));
        }
        self.records.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}
