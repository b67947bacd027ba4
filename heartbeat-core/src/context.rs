//! Volatile runtime state
//!
//! Everything here lives only for the lifetime of the process and is rebuilt
//! from scratch on restart: tab associations, freshness reports, creation
//! locks, buffered user turns, the command queue, the execution gate and the
//! relay registration.
//!
//! Each field sits behind its own lock. A lock is only held for a
//! synchronous check-and-mutate and never across an `.await`.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

use crate::command::{CommandQueue, RelayConfig, RelayForward, RelayState};
use crate::pairing::TurnPayload;
use crate::types::TabId;

/// Per-tab resolution status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabStatus {
    NoLlm,
    SessionAssigned,
    FreshAwaitingInteraction,
    GenericNotFresh,
    FreshnessUnknown,
}

impl TabStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TabStatus::NoLlm => "no_llm",
            TabStatus::SessionAssigned => "session_assigned",
            TabStatus::FreshAwaitingInteraction => "fresh_awaiting_interaction",
            TabStatus::GenericNotFresh => "generic_not_fresh",
            TabStatus::FreshnessUnknown => "freshness_unknown",
        }
    }
}

/// Shared runtime state passed to every engine operation
#[derive(Debug, Default)]
pub struct RuntimeContext {
    tab_sessions: Mutex<HashMap<TabId, String>>,
    tab_freshness: Mutex<HashMap<TabId, bool>>,
    tab_status: Mutex<HashMap<TabId, TabStatus>>,
    creation_locks: Mutex<HashSet<(TabId, String)>>,
    pending_turns: Mutex<HashMap<String, TurnPayload>>,
    commands: Mutex<CommandQueue>,
    command_gate: Mutex<bool>,
    relay: Mutex<Option<RelayState>>,
}

impl RuntimeContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all volatile state
    pub fn reset(&self) {
        self.tab_sessions.lock().clear();
        self.tab_freshness.lock().clear();
        self.tab_status.lock().clear();
        self.creation_locks.lock().clear();
        self.pending_turns.lock().clear();
        self.commands.lock().clear();
        *self.command_gate.lock() = false;
        *self.relay.lock() = None;
        tracing::info!("Runtime context reset");
    }

    // ============================================
    // Tab associations
    // ============================================

    pub fn bind_tab(&self, tab_id: TabId, session_id: &str) {
        self.tab_sessions
            .lock()
            .insert(tab_id, session_id.to_string());
    }

    pub fn unbind_tab(&self, tab_id: TabId) -> Option<String> {
        self.tab_sessions.lock().remove(&tab_id)
    }

    pub fn tab_session(&self, tab_id: TabId) -> Option<String> {
        self.tab_sessions.lock().get(&tab_id).cloned()
    }

    /// Remove every binding that points at `session_id`
    pub fn unbind_session(&self, session_id: &str) {
        self.tab_sessions.lock().retain(|_, s| s != session_id);
    }

    pub fn set_freshness(&self, tab_id: TabId, is_fresh: bool) {
        self.tab_freshness.lock().insert(tab_id, is_fresh);
    }

    pub fn freshness(&self, tab_id: TabId) -> Option<bool> {
        self.tab_freshness.lock().get(&tab_id).copied()
    }

    pub fn clear_freshness(&self, tab_id: TabId) {
        self.tab_freshness.lock().remove(&tab_id);
    }

    pub fn set_tab_status(&self, tab_id: TabId, status: TabStatus) {
        self.tab_status.lock().insert(tab_id, status);
    }

    pub fn tab_status(&self, tab_id: TabId) -> Option<TabStatus> {
        self.tab_status.lock().get(&tab_id).copied()
    }

    pub fn clear_tab_status(&self, tab_id: TabId) {
        self.tab_status.lock().remove(&tab_id);
    }

    /// Forget everything about a closed tab. Unknown tabs are fine.
    pub fn forget_tab(&self, tab_id: TabId) {
        let had_binding = self.unbind_tab(tab_id).is_some();
        self.clear_freshness(tab_id);
        self.clear_tab_status(tab_id);
        tracing::debug!(tab_id, had_binding, "Tab forgotten");
    }

    // ============================================
    // Creation locks
    // ============================================

    /// Take the exclusive creation lock for (tab, url).
    ///
    /// Returns `None` when another creation for the same pair is in flight.
    /// The lock is released when the guard drops.
    pub fn try_lock_creation(&self, tab_id: TabId, url: &str) -> Option<CreationGuard<'_>> {
        let key = (tab_id, url.to_string());
        if !self.creation_locks.lock().insert(key.clone()) {
            return None;
        }
        Some(CreationGuard { ctx: self, key })
    }

    pub fn is_creation_locked(&self, tab_id: TabId, url: &str) -> bool {
        self.creation_locks
            .lock()
            .contains(&(tab_id, url.to_string()))
    }

    // ============================================
    // Pending user turns
    // ============================================

    /// Buffer a user turn, returning the one it replaced
    pub fn set_pending(&self, session_id: &str, payload: TurnPayload) -> Option<TurnPayload> {
        self.pending_turns
            .lock()
            .insert(session_id.to_string(), payload)
    }

    pub fn take_pending(&self, session_id: &str) -> Option<TurnPayload> {
        self.pending_turns.lock().remove(session_id)
    }

    pub fn has_pending(&self, session_id: &str) -> bool {
        self.pending_turns.lock().contains_key(session_id)
    }

    // ============================================
    // Commands, gate and relay
    // ============================================

    /// Run `f` with the command queue locked
    pub fn with_commands<R>(&self, f: impl FnOnce(&mut CommandQueue) -> R) -> R {
        f(&mut self.commands.lock())
    }

    pub fn command_gate(&self) -> bool {
        *self.command_gate.lock()
    }

    pub fn set_command_gate(&self, armed: bool) {
        let mut gate = self.command_gate.lock();
        if *gate != armed {
            tracing::info!(armed, "Command execution gate changed");
        }
        *gate = armed;
    }

    pub fn arm_relay(&self, config: RelayConfig) {
        tracing::info!(
            alpha_tab_id = config.alpha_tab_id,
            bravo_tab_id = config.bravo_tab_id,
            first_speaker = config.first_speaker.name(),
            "Relay mode armed"
        );
        *self.relay.lock() = Some(RelayState::new(config));
    }

    pub fn disarm_relay(&self) {
        if self.relay.lock().take().is_some() {
            tracing::info!("Relay mode disarmed");
        }
    }

    pub fn relay(&self) -> Option<RelayState> {
        *self.relay.lock()
    }

    /// Route an assistant turn through the relay, if one is armed
    pub fn relay_route(&self, sender: TabId, text: &str) -> Option<RelayForward> {
        self.relay.lock().as_mut()?.route(sender, text)
    }
}

/// Holds a creation lock; releases it on drop, including on early return
#[derive(Debug)]
pub struct CreationGuard<'a> {
    ctx: &'a RuntimeContext,
    key: (TabId, String),
}

impl Drop for CreationGuard<'_> {
    fn drop(&mut self) {
        self.ctx.creation_locks.lock().remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Speaker;

    #[test]
    fn test_creation_lock_is_exclusive_and_released() {
        let ctx = RuntimeContext::new();
        let url = "https://claude.ai/chat/abc";

        let guard = ctx.try_lock_creation(1, url).unwrap();
        assert!(ctx.is_creation_locked(1, url));
        assert!(ctx.try_lock_creation(1, url).is_none());
        // Different tab or url is independent
        assert!(ctx.try_lock_creation(2, url).is_some());

        drop(guard);
        assert!(!ctx.is_creation_locked(1, url));
        assert!(ctx.try_lock_creation(1, url).is_some());
    }

    #[test]
    fn test_forget_unknown_tab() {
        let ctx = RuntimeContext::new();
        ctx.forget_tab(42);

        ctx.bind_tab(1, "s1");
        ctx.set_freshness(1, true);
        ctx.set_tab_status(1, TabStatus::SessionAssigned);
        ctx.forget_tab(1);
        assert!(ctx.tab_session(1).is_none());
        assert!(ctx.freshness(1).is_none());
        assert!(ctx.tab_status(1).is_none());
    }

    #[test]
    fn test_unbind_session() {
        let ctx = RuntimeContext::new();
        ctx.bind_tab(1, "s1");
        ctx.bind_tab(2, "s1");
        ctx.bind_tab(3, "s2");
        ctx.unbind_session("s1");
        assert!(ctx.tab_session(1).is_none());
        assert!(ctx.tab_session(2).is_none());
        assert_eq!(ctx.tab_session(3).as_deref(), Some("s2"));
    }

    #[test]
    fn test_reset_clears_everything() {
        let ctx = RuntimeContext::new();
        ctx.bind_tab(1, "s1");
        ctx.set_freshness(1, false);
        ctx.set_command_gate(true);
        ctx.arm_relay(RelayConfig {
            alpha_tab_id: 1,
            bravo_tab_id: 2,
            first_speaker: Speaker::Alpha,
        });
        let guard = ctx.try_lock_creation(1, "u");
        std::mem::forget(guard);

        ctx.reset();

        assert!(ctx.tab_session(1).is_none());
        assert!(ctx.freshness(1).is_none());
        assert!(!ctx.command_gate());
        assert!(ctx.relay().is_none());
        assert!(!ctx.is_creation_locked(1, "u"));
        assert!(ctx.with_commands(|q| q.is_empty()));
    }
}
