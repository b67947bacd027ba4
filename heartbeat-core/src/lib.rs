//! # heartbeat-core
//!
//! Reconciliation engine for LLM chats captured across browser tabs.
//!
//! This library provides:
//! - Tab to session resolution and the session lifecycle
//! - Pairing of user and assistant turns into exchange chunks
//! - The in-chat command protocol (directives, gate, relay)
//! - A rolling window of recent exchanges per session
//! - Persistence of the whole project state, in SQLite or in memory
//! - Configuration and logging infrastructure
//!
//! ## Architecture
//!
//! Every handler on the [`Engine`] loads the persisted [`ProjectState`],
//! mutates it, and writes it back before notifying anyone. Volatile
//! coordination (tab bindings, pending turns, the command queue) lives in a
//! shared [`RuntimeContext`] that is rebuilt from nothing on restart.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use heartbeat_core::{Config, Database, Engine, NullMessenger, Role, TabInfo, TurnEvent};
//!
//! # async fn run() -> heartbeat_core::Result<()> {
//! let config = Config::load()?;
//! let db = Database::open(&Config::database_path())?;
//! db.migrate()?;
//!
//! let engine = Engine::from_config(&config, Arc::new(db), Arc::new(NullMessenger))?;
//! let tab = TabInfo::new(7, "https://claude.ai/chat/abc");
//! engine.on_tab_activated(&tab).await;
//! engine
//!     .on_turn(TurnEvent::new(Role::User, "hello", tab))
//!     .await;
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use collector::{CollectorClient, ExchangeSink, NullSink, RecallBackend, RecallResponse};
pub use config::{Config, SessionConfig};
pub use context::{RuntimeContext, TabStatus};
pub use db::Database;
pub use engine::{Engine, PageContext, RecallOutcome, TurnReport};
pub use error::{Error, Result};
pub use messaging::{Messenger, NullMessenger, RuntimeMessage, TabMessage};
pub use pairing::{PairingOutcome, TurnPayload};
pub use session::{Decision, ResolveOptions, ResolveOutcome};
pub use store::{MemoryStore, StateStore};
pub use types::*;

// Public modules
pub mod collector;
pub mod command;
pub mod config;
pub mod context;
pub mod db;
pub mod engine;
pub mod error;
pub mod format;
pub mod logging;
pub mod messaging;
pub mod pairing;
pub mod platform;
pub mod session;
pub mod stacker;
pub mod store;
pub mod types;
