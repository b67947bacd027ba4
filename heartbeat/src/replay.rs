//! Replay of captured browser events
//!
//! Each line of a replay file is one JSON event, in the order the capture
//! layer reported it:
//!
//! ```text
//! {"event":"startup","activeTab":{"tabId":1,"url":"https://claude.ai/new"}}
//! {"event":"pageFreshness","tab":{"tabId":1,"url":"https://claude.ai/new"},"isFresh":true}
//! {"event":"tabActivated","tab":{"tabId":1,"url":"https://claude.ai/new"}}
//! {"event":"turn","role":"user","fullText":"hello","tab":{"tabId":1,"url":"https://claude.ai/new"}}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped.

use anyhow::{Context, Result};
use async_trait::async_trait;
use heartbeat_core::messaging::{PopupAck, TabAck};
use heartbeat_core::{Engine, Messenger, RuntimeMessage, TabId, TabInfo, TabMessage, TurnEvent};
use serde::Deserialize;
use std::path::Path;

/// One recorded browser event
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ReplayEvent {
    #[serde(rename_all = "camelCase")]
    Startup {
        #[serde(default)]
        active_tab: Option<TabInfo>,
    },
    TabActivated {
        tab: TabInfo,
    },
    #[serde(rename_all = "camelCase")]
    TabUpdated {
        tab: TabInfo,
        #[serde(default)]
        is_active: bool,
        #[serde(default = "default_true")]
        load_complete: bool,
    },
    #[serde(rename_all = "camelCase")]
    TabRemoved {
        tab_id: TabId,
    },
    #[serde(rename_all = "camelCase")]
    PageFreshness {
        tab: TabInfo,
        is_fresh: bool,
    },
    Turn(TurnEvent),
}

fn default_true() -> bool {
    true
}

/// Totals for one replay run
#[derive(Debug, Default)]
pub struct ReplaySummary {
    pub events: usize,
    pub turns: usize,
    pub rejected: usize,
    pub exchanges: usize,
    pub sessions_created: usize,
    pub commands_resolved: usize,
    pub relayed: usize,
}

/// Parse a replay file, failing on the first malformed line
pub fn parse_events(content: &str) -> Result<Vec<ReplayEvent>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let trimmed = line.trim();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
        .map(|(n, line)| {
            serde_json::from_str(line).with_context(|| format!("invalid event on line {}", n + 1))
        })
        .collect()
}

pub fn read_events(path: &Path) -> Result<Vec<ReplayEvent>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_events(&content)
}

/// Feed events to the engine in order
pub async fn replay(engine: &Engine, events: Vec<ReplayEvent>, verbose: bool) -> ReplaySummary {
    let mut summary = ReplaySummary::default();
    let sessions_before = engine.load_state().await.sessions.len();

    for event in events {
        summary.events += 1;
        match event {
            ReplayEvent::Startup { active_tab } => {
                let current = engine.startup(active_tab.as_ref()).await;
                if verbose {
                    println!("startup: current session {}", current.as_deref().unwrap_or("-"));
                }
            }
            ReplayEvent::TabActivated { tab } => {
                let outcome = engine.on_tab_activated(&tab).await;
                if verbose {
                    println!("tab {} activated: {}", tab.tab_id, outcome.decision);
                }
            }
            ReplayEvent::TabUpdated {
                tab,
                is_active,
                load_complete,
            } => {
                let outcome = engine.on_tab_updated(&tab, is_active, load_complete).await;
                if verbose {
                    if let Some(outcome) = outcome {
                        println!("tab {} updated: {}", tab.tab_id, outcome.decision);
                    }
                }
            }
            ReplayEvent::TabRemoved { tab_id } => engine.on_tab_removed(tab_id),
            ReplayEvent::PageFreshness { tab, is_fresh } => {
                engine.on_page_freshness(&tab, is_fresh).await;
            }
            ReplayEvent::Turn(turn) => {
                summary.turns += 1;
                let role = turn.role;
                let tab_id = turn.tab.tab_id;
                let report = engine.on_turn(turn).await;

                if report.is_rejected() {
                    summary.rejected += 1;
                }
                if matches!(
                    report.pairing,
                    Some(heartbeat_core::PairingOutcome::Committed { .. })
                ) {
                    summary.exchanges += 1;
                }
                if report.relayed.is_some() {
                    summary.relayed += 1;
                }
                summary.commands_resolved += report.commands.resolved.len();

                if verbose {
                    println!(
                        "{} turn on tab {} -> {} ({:?})",
                        role,
                        tab_id,
                        report.session_id.as_deref().unwrap_or("-"),
                        report.pairing
                    );
                }
            }
        }
    }

    let sessions_after = engine.load_state().await.sessions.len();
    summary.sessions_created = sessions_after.saturating_sub(sessions_before);
    summary
}

/// Messenger for offline runs: nothing is listening, optionally echo what would be sent
pub struct ConsoleMessenger {
    pub verbose: bool,
}

#[async_trait]
impl Messenger for ConsoleMessenger {
    async fn broadcast(&self, message: RuntimeMessage) -> heartbeat_core::Result<()> {
        if self.verbose {
            if let RuntimeMessage::SessionChanged { new_session_id, .. } = &message {
                println!("  session changed: {}", new_session_id.as_deref().unwrap_or("-"));
            }
        }
        Ok(())
    }

    async fn send_to_tab(
        &self,
        tab_id: TabId,
        message: TabMessage,
    ) -> heartbeat_core::Result<Option<TabAck>> {
        if self.verbose {
            match &message {
                TabMessage::InsertPrompt {
                    prompt,
                    auto_submit,
                } => println!("  -> tab {} prompt (submit: {}): {}", tab_id, auto_submit, prompt),
                TabMessage::DisplayInChat { text } => println!("  -> tab {} display: {}", tab_id, text),
                TabMessage::SessionContext { .. } => {}
            }
        }
        Ok(None)
    }

    async fn request_popup(&self, message: &str) -> heartbeat_core::Result<Option<PopupAck>> {
        if self.verbose {
            println!("  popup: {}", message);
        }
        Ok(None)
    }
}
