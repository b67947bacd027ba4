//! Two-tab relay mode
//!
//! While armed, an assistant turn from the tab whose turn it is gets wrapped
//! in a short framing prompt and submitted as new input to the other tab.
//! The speakers alternate; a turn from the wrong tab is not relayed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::TabId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Alpha,
    Bravo,
}

impl Speaker {
    pub fn other(self) -> Self {
        match self {
            Speaker::Alpha => Speaker::Bravo,
            Speaker::Bravo => Speaker::Alpha,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Speaker::Alpha => "Alpha",
            Speaker::Bravo => "Bravo",
        }
    }
}

impl std::str::FromStr for Speaker {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "alpha" => Ok(Speaker::Alpha),
            "bravo" => Ok(Speaker::Bravo),
            other => Err(format!("unknown speaker: {}", other)),
        }
    }
}

/// Arguments of `INIT_FURBY_MODE`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    pub alpha_tab_id: TabId,
    pub bravo_tab_id: TabId,
    pub first_speaker: Speaker,
}

impl RelayConfig {
    /// Parse `{"alphaTabId": .., "bravoTabId": .., "firstSpeaker"?: ..}`.
    ///
    /// Tab ids may be JSON numbers or numeric strings.
    pub fn from_json(json: &str) -> Result<Self, String> {
        let value: Value = serde_json::from_str(json).map_err(|e| e.to_string())?;
        let object = value
            .as_object()
            .ok_or_else(|| "expected a JSON object".to_string())?;

        let alpha_tab_id = tab_id_field(object.get("alphaTabId"), "alphaTabId")?;
        let bravo_tab_id = tab_id_field(object.get("bravoTabId"), "bravoTabId")?;

        let first_speaker = match object.get("firstSpeaker") {
            None | Some(Value::Null) => Speaker::Alpha,
            Some(Value::String(s)) => s.parse()?,
            Some(other) => return Err(format!("firstSpeaker must be a string, got {}", other)),
        };

        Ok(Self {
            alpha_tab_id,
            bravo_tab_id,
            first_speaker,
        })
    }
}

fn tab_id_field(value: Option<&Value>, name: &str) -> Result<TabId, String> {
    match value {
        None | Some(Value::Null) => Err(format!("INIT_FURBY_MODE requires {}", name)),
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| format!("{} is not an integer: {}", name, n)),
        Some(Value::String(s)) => s
            .trim()
            .parse::<TabId>()
            .map_err(|_| format!("{} is not numeric: {:?}", name, s)),
        Some(other) => Err(format!("{} is not numeric: {}", name, other)),
    }
}

/// An armed relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayState {
    pub alpha_tab_id: TabId,
    pub bravo_tab_id: TabId,
    pub next_speaker: Speaker,
}

/// A relay hop to perform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayForward {
    pub target_tab_id: TabId,
    pub prompt: String,
}

impl RelayState {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            alpha_tab_id: config.alpha_tab_id,
            bravo_tab_id: config.bravo_tab_id,
            next_speaker: config.first_speaker,
        }
    }

    fn tab_of(&self, speaker: Speaker) -> TabId {
        match speaker {
            Speaker::Alpha => self.alpha_tab_id,
            Speaker::Bravo => self.bravo_tab_id,
        }
    }

    /// Route an assistant turn from `sender`, flipping the next speaker when it relays
    pub fn route(&mut self, sender: TabId, text: &str) -> Option<RelayForward> {
        let speaker = self.next_speaker;
        if sender != self.tab_of(speaker) {
            if sender == self.alpha_tab_id || sender == self.bravo_tab_id {
                tracing::debug!(tab_id = sender, "Relay participant spoke out of turn");
            }
            return None;
        }

        let listener = speaker.other();
        self.next_speaker = listener;

        Some(RelayForward {
            target_tab_id: self.tab_of(listener),
            prompt: relay_prompt(listener, speaker, text),
        })
    }
}

fn relay_prompt(listener: Speaker, speaker: Speaker, text: &str) -> String {
    let speaker_name = format!("Furby {}", speaker.name());
    format!(
        "You are Furby {}, an advanced AI. You are in a discussion with {}. {} just said: \"{}\"\n\nWhat is your direct response to {}?",
        listener.name(),
        speaker_name,
        speaker_name,
        text,
        speaker_name
    )
}
