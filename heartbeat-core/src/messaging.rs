//! Outbound messaging to the browser runtime
//!
//! The engine never talks to tabs or the popup directly. Everything goes
//! through a [`Messenger`], and every call site treats failures as
//! best-effort: the error is logged and the operation continues.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{ExchangeChunk, TabId};

/// Notification broadcast to every runtime listener
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum RuntimeMessage {
    /// The session set changed; `new_session_id` is the global current one
    #[serde(rename_all = "camelCase")]
    SessionChanged {
        new_session_id: Option<String>,
        previous_session_id: Option<String>,
        logs_cleared: bool,
    },
    /// An exchange was committed to a session
    #[serde(rename_all = "camelCase")]
    LogCommitted {
        entry: Box<ExchangeChunk>,
        current_session_id: Option<String>,
        actual_session_id_logged_to: String,
    },
}

/// Instruction sent to a single tab
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum TabMessage {
    /// Tell the page which session it is feeding
    #[serde(rename_all = "camelCase")]
    SessionContext {
        current_session_id: Option<String>,
        associated_url: Option<String>,
    },
    /// Place text in the chat input, optionally submitting it
    #[serde(rename_all = "camelCase")]
    InsertPrompt { prompt: String, auto_submit: bool },
    /// Render text inside the chat transcript
    DisplayInChat { text: String },
}

/// Acknowledgement returned by the popup for a notification request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopupAck {
    pub status: String,
}

impl PopupAck {
    /// Whether the popup confirmed the notification was shown
    pub fn confirms_shown(&self) -> bool {
        self.status.contains("Notification shown")
    }
}

/// Response returned by a tab's content script
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TabAck {
    #[serde(default)]
    pub status: String,
}

impl TabAck {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
        }
    }

    /// Whether the tab confirmed an in-chat display
    pub fn confirms_displayed(&self) -> bool {
        self.status.contains("displayed")
    }
}

/// Transport for outbound runtime messages
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Broadcast to all runtime listeners; nobody has to be listening
    async fn broadcast(&self, message: RuntimeMessage) -> Result<()>;

    /// Deliver a message to one tab, returning its response if it sent one
    async fn send_to_tab(&self, tab_id: TabId, message: TabMessage) -> Result<Option<TabAck>>;

    /// Ask the popup to show a notification. `None` when nothing answered.
    async fn request_popup(&self, message: &str) -> Result<Option<PopupAck>>;
}

/// Messenger that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMessenger;

#[async_trait]
impl Messenger for NullMessenger {
    async fn broadcast(&self, _message: RuntimeMessage) -> Result<()> {
        Ok(())
    }

    async fn send_to_tab(&self, _tab_id: TabId, _message: TabMessage) -> Result<Option<TabAck>> {
        Ok(None)
    }

    async fn request_popup(&self, _message: &str) -> Result<Option<PopupAck>> {
        Ok(None)
    }
}
