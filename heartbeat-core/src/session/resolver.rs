//! Tab to session resolution
//!
//! Decides which session a tab's activity belongs to:
//!
//! - not an LLM page: nothing
//! - a specific thread url: the tab's bound session if its origin still
//!   matches, else any stored session with the same origin (active or not),
//!   else a new distinct session when creation is allowed
//! - a generic page: nothing yet, but the freshness report decides whether the
//!   first user turn will start a session
//!
//! Creation for one (tab, url) pair is guarded by a lock held across the
//! persistence await, so concurrent resolutions of the same unseen thread
//! create exactly one session.

use crate::context::TabStatus;
use crate::engine::Engine;
use crate::platform::PlatformMatch;
use crate::types::{ProjectState, SessionStatus, TabInfo};

/// How a resolution was decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    NoLlmPage,
    /// The tab's bound session still matches its url
    MatchTabMap,
    /// An active stored session has the same origin
    MatchStorage,
    /// An inactive stored session has the same origin
    MatchStorageRevivable,
    Created,
    /// Another resolution is creating a session for this (tab, url)
    CreationPending,
    NotFoundNoCreate,
    FreshAwaitsInteraction,
    GenericNotFresh,
    FreshnessUnknown,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::NoLlmPage => "no_llm_page",
            Decision::MatchTabMap => "specific_url_match_tab_map",
            Decision::MatchStorage => "specific_url_match_storage",
            Decision::MatchStorageRevivable => "specific_url_match_storage_revivable",
            Decision::Created => "specific_url_created",
            Decision::CreationPending => "specific_url_creation_pending",
            Decision::NotFoundNoCreate => "specific_url_not_found_no_create",
            Decision::FreshAwaitsInteraction => "fresh_page_awaits_interaction",
            Decision::GenericNotFresh => "generic_url_not_fresh_no_action",
            Decision::FreshnessUnknown => "generic_url_freshness_unknown",
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(
            self,
            Decision::MatchTabMap | Decision::MatchStorage | Decision::MatchStorageRevivable
        )
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOptions {
    pub create_if_not_found: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            create_if_not_found: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolveOutcome {
    pub session_id: Option<String>,
    pub created: bool,
    pub decision: Decision,
    /// Classification of the tab's url; `None` for non-LLM pages
    pub platform: Option<PlatformMatch>,
}

impl ResolveOutcome {
    fn new(decision: Decision, platform: Option<PlatformMatch>) -> Self {
        Self {
            session_id: None,
            created: false,
            decision,
            platform,
        }
    }

    fn with_session(mut self, session_id: String) -> Self {
        self.session_id = Some(session_id);
        self
    }
}

impl Engine {
    /// Map a tab to a session, creating one if allowed and needed.
    ///
    /// Never fails: storage and messaging problems are logged, and a
    /// resolution that cannot produce a session returns `session_id: None`.
    pub async fn resolve(
        &self,
        state: &mut ProjectState,
        tab: &TabInfo,
        options: ResolveOptions,
    ) -> ResolveOutcome {
        let tab_id = tab.tab_id;

        let Some(platform) = self.registry.classify(&tab.url) else {
            self.ctx.set_tab_status(tab_id, TabStatus::NoLlm);
            tracing::debug!(tab_id, "Not an LLM page");
            return ResolveOutcome::new(Decision::NoLlmPage, None);
        };

        if !platform.is_specific_chat {
            return self.resolve_generic(tab, platform);
        }

        let platform_id = platform.platform_id.clone();

        // Bound session, if its origin still matches
        if let Some(bound) = self.ctx.tab_session(tab_id) {
            let matches = state
                .session(&bound)
                .is_some_and(|s| s.matches_origin(&tab.url, &platform_id));
            if matches {
                self.ctx.set_tab_status(tab_id, TabStatus::SessionAssigned);
                tracing::debug!(tab_id, session_id = %bound, "Resolved through tab binding");
                return ResolveOutcome::new(Decision::MatchTabMap, Some(platform)).with_session(bound);
            }
        }

        // Stored session with the same origin, whatever its status
        if let Some(found) = state.find_by_origin(&tab.url, &platform_id) {
            let decision = if found.metadata.status == SessionStatus::Active {
                Decision::MatchStorage
            } else {
                Decision::MatchStorageRevivable
            };
            let id = found.id.clone();
            self.ctx.bind_tab(tab_id, &id);
            self.ctx.set_tab_status(tab_id, TabStatus::SessionAssigned);
            tracing::debug!(tab_id, session_id = %id, decision = decision.as_str(), "Resolved through storage");
            return ResolveOutcome::new(decision, Some(platform)).with_session(id);
        }

        if !options.create_if_not_found {
            self.ctx.clear_tab_status(tab_id);
            self.ctx.clear_freshness(tab_id);
            tracing::debug!(tab_id, url = %tab.url, "No session for thread, creation not allowed");
            return ResolveOutcome::new(Decision::NotFoundNoCreate, Some(platform));
        }

        let Some(_guard) = self.ctx.try_lock_creation(tab_id, &tab.url) else {
            tracing::warn!(tab_id, url = %tab.url, "Session creation already pending, not duplicating");
            return ResolveOutcome::new(Decision::CreationPending, Some(platform));
        };

        let id = self.start_session(state, &platform_id, Some(tab), false).await;
        self.ctx.set_tab_status(tab_id, TabStatus::SessionAssigned);
        tracing::info!(tab_id, session_id = %id, url = %tab.url, "Distinct session created for thread");

        let mut outcome = ResolveOutcome::new(Decision::Created, Some(platform)).with_session(id);
        outcome.created = true;
        outcome
    }

    fn resolve_generic(&self, tab: &TabInfo, platform: PlatformMatch) -> ResolveOutcome {
        let tab_id = tab.tab_id;

        let decision = match self.ctx.freshness(tab_id) {
            Some(true) => {
                self.ctx.set_tab_status(tab_id, TabStatus::FreshAwaitingInteraction);
                self.ctx.unbind_tab(tab_id);
                Decision::FreshAwaitsInteraction
            }
            Some(false) => {
                self.ctx.set_tab_status(tab_id, TabStatus::GenericNotFresh);
                Decision::GenericNotFresh
            }
            None => {
                self.ctx.set_tab_status(tab_id, TabStatus::FreshnessUnknown);
                Decision::FreshnessUnknown
            }
        };

        tracing::debug!(
            tab_id,
            platform = %platform.platform_id,
            decision = decision.as_str(),
            "Generic page resolved"
        );
        ResolveOutcome::new(decision, Some(platform))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::NullMessenger;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    const THREAD: &str = "https://claude.ai/chat/0b8f5e2a-1111-2222-3333-444455556666";

    fn engine() -> Engine {
        Engine::new(Arc::new(MemoryStore::new()), Arc::new(NullMessenger))
    }

    #[tokio::test]
    async fn test_non_llm_page() {
        let engine = engine();
        let mut state = ProjectState::default();
        let tab = TabInfo::new(1, "https://example.com/");

        let outcome = engine.resolve(&mut state, &tab, ResolveOptions::default()).await;
        assert_eq!(outcome.decision, Decision::NoLlmPage);
        assert!(outcome.platform.is_none());
        assert_eq!(engine.context().tab_status(1), Some(TabStatus::NoLlm));
    }

    #[tokio::test]
    async fn test_thread_created_then_matched() {
        let engine = engine();
        let mut state = ProjectState::default();
        let tab = TabInfo::new(2, THREAD);

        let created = engine.resolve(&mut state, &tab, ResolveOptions::default()).await;
        assert_eq!(created.decision, Decision::Created);
        assert!(created.created);
        let id = created.session_id.unwrap();
        // Distinct: the global current is untouched
        assert!(state.current_session_id.is_none());
        assert_eq!(engine.context().tab_session(2).as_deref(), Some(id.as_str()));

        let again = engine.resolve(&mut state, &tab, ResolveOptions::default()).await;
        assert_eq!(again.decision, Decision::MatchTabMap);
        assert_eq!(again.session_id.as_deref(), Some(id.as_str()));

        // Another tab on the same thread finds it in storage
        let other = TabInfo::new(3, THREAD);
        let found = engine.resolve(&mut state, &other, ResolveOptions::default()).await;
        assert_eq!(found.decision, Decision::MatchStorage);
        assert_eq!(engine.context().tab_session(3).as_deref(), Some(id.as_str()));
        assert_eq!(state.sessions.len(), 1);
    }

    #[tokio::test]
    async fn test_inactive_session_is_revivable() {
        let engine = engine();
        let mut state = ProjectState::default();
        let tab = TabInfo::new(2, THREAD);
        let id = engine
            .resolve(&mut state, &tab, ResolveOptions::default())
            .await
            .session_id
            .unwrap();
        state.session_mut(&id).unwrap().metadata.status = SessionStatus::Inactive;
        engine.on_tab_removed(2);

        let outcome = engine.resolve(&mut state, &tab, ResolveOptions::default()).await;
        assert_eq!(outcome.decision, Decision::MatchStorageRevivable);
        assert_eq!(outcome.session_id.as_deref(), Some(id.as_str()));
    }

    #[tokio::test]
    async fn test_stale_binding_falls_through() {
        let engine = engine();
        let mut state = ProjectState::default();
        engine.context().bind_tab(4, "session-gone");
        engine.context().set_freshness(4, true);

        let options = ResolveOptions {
            create_if_not_found: false,
        };
        let outcome = engine.resolve(&mut state, &TabInfo::new(4, THREAD), options).await;
        assert_eq!(outcome.decision, Decision::NotFoundNoCreate);
        assert!(outcome.session_id.is_none());
        assert!(engine.context().freshness(4).is_none());
        assert!(state.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_creation_pending_when_locked() {
        let engine = engine();
        let mut state = ProjectState::default();
        let tab = TabInfo::new(5, THREAD);

        let _held = engine.context().try_lock_creation(5, THREAD).unwrap();
        let outcome = engine.resolve(&mut state, &tab, ResolveOptions::default()).await;
        assert_eq!(outcome.decision, Decision::CreationPending);
        assert!(outcome.session_id.is_none());
        assert!(state.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_generic_page_freshness() {
        let engine = engine();
        let mut state = ProjectState::default();
        let tab = TabInfo::new(6, "https://claude.ai/new");

        let unknown = engine.resolve(&mut state, &tab, ResolveOptions::default()).await;
        assert_eq!(unknown.decision, Decision::FreshnessUnknown);

        engine.context().set_freshness(6, false);
        let stale = engine.resolve(&mut state, &tab, ResolveOptions::default()).await;
        assert_eq!(stale.decision, Decision::GenericNotFresh);

        engine.context().bind_tab(6, "old");
        engine.context().set_freshness(6, true);
        let fresh = engine.resolve(&mut state, &tab, ResolveOptions::default()).await;
        assert_eq!(fresh.decision, Decision::FreshAwaitsInteraction);
        assert!(engine.context().tab_session(6).is_none());
        assert_eq!(
            engine.context().tab_status(6),
            Some(TabStatus::FreshAwaitingInteraction)
        );
        assert!(state.sessions.is_empty());
    }
}
