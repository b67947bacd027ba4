//! heartbeat - captured LLM chat sessions, from the command line
//!
//! Replays captured browser events through the reconciliation engine and
//! inspects the resulting sessions.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/heartbeat/heartbeat.db (~/.local/share/heartbeat/heartbeat.db)
//! - Logs: $XDG_STATE_HOME/heartbeat/heartbeat.YYYY-MM-DD.log (~/.local/state/heartbeat/)
//! - Config: $XDG_CONFIG_HOME/heartbeat/config.toml (~/.config/heartbeat/config.toml)

mod replay;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use heartbeat_core::db::ExportRecord;
use heartbeat_core::format::{export_filename, format_relative_time, format_relative_time_opt};
use heartbeat_core::{CollectorClient, Config, Database, Engine, STATE_RECORD_KEY};
use std::path::PathBuf;
use std::sync::Arc;

use crate::replay::{read_events, replay, ConsoleMessenger};

#[derive(Parser)]
#[command(name = "heartbeat")]
#[command(about = "Reconcile and inspect captured LLM chat sessions")]
#[command(version)]
struct Args {
    /// Print every event and outbound message
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Feed a JSON-lines file of captured events through the engine
    Replay {
        /// Path to the events file
        events: PathBuf,
    },
    /// List sessions, newest first
    Sessions {
        /// Include sessions without any exchange
        #[arg(long)]
        all: bool,
    },
    /// Show the exchanges of a session
    Show {
        /// Session id
        id: String,
    },
    /// Make a session the current one
    Activate {
        /// Session id
        id: String,
    },
    /// Delete a session
    Delete {
        /// Session id
        id: String,
    },
    /// Write a session transcript as plain text
    Export {
        /// Session id
        id: String,
        /// Output file; "-" for stdout. Defaults to a generated name in the current directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show the current session and configuration
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load().context("failed to load configuration")?;

    // Initialize logging
    let _log_guard =
        heartbeat_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("heartbeat starting");

    // Open database at XDG-compliant path
    let db_path = Config::database_path();
    tracing::info!(path = %db_path.display(), "Opening database");

    let db = Arc::new(Database::open(&db_path).context("failed to open database")?);
    db.migrate().context("failed to run database migrations")?;

    let messenger = Arc::new(ConsoleMessenger {
        verbose: args.verbose,
    });
    let engine = Engine::from_config(&config, db.clone(), messenger)
        .context("failed to set up engine")?;

    match args.command {
        Commands::Replay { events } => {
            let events = read_events(&events)?;
            println!("Replaying {} event(s)", events.len());

            let summary = replay(&engine, events, args.verbose).await;
            println!("Replay complete:");
            println!("  Turns:            {}", summary.turns);
            println!("  Rejected turns:   {}", summary.rejected);
            println!("  Exchanges logged: {}", summary.exchanges);
            println!("  Sessions created: {}", summary.sessions_created);
            println!("  Commands run:     {}", summary.commands_resolved);
            println!("  Relay hops:       {}", summary.relayed);
        }
        Commands::Sessions { all } => {
            let sessions: Vec<_> = engine
                .list_sessions()
                .await
                .into_iter()
                .filter(|s| all || s.log_count > 0 || s.is_current)
                .collect();

            if sessions.is_empty() {
                println!("No sessions");
                return Ok(());
            }

            for s in sessions {
                let marker = if s.is_current { "*" } else { " " };
                println!(
                    "{} {}  {:<8} {:>3} exchange(s)  {:>8}  {}",
                    marker,
                    s.id,
                    s.status.as_str(),
                    s.log_count,
                    format_relative_time(s.last_activity_at),
                    s.title
                );
            }
        }
        Commands::Show { id } => {
            let state = engine.load_state().await;
            let session = state
                .session(&id)
                .with_context(|| format!("session not found: {}", id))?;

            println!("{}", session.metadata.title);
            println!("  Platform: {}", session.metadata.platform);
            println!("  Started:  {}", format_relative_time(session.metadata.started_at));
            println!("  Window:   {} exchange(s)", session.stacker_chunks.len());
            for chunk in &session.log_entries {
                println!();
                println!("#{} user: {}", chunk.turn_in_conversation, chunk.user_input.text);
                println!("#{} assistant: {}", chunk.turn_in_conversation, chunk.assistant_response.text);
            }
        }
        Commands::Activate { id } => {
            engine.set_active_session(&id).await?;
            println!("Current session: {}", id);
        }
        Commands::Delete { id } => {
            engine.delete_session(&id).await?;
            let current = engine.load_state().await.current_session_id;
            println!("Deleted {}", id);
            println!("Current session: {}", current.as_deref().unwrap_or("none"));
        }
        Commands::Export { id, output } => {
            let transcript = engine.export_session(&id).await?;
            let state = engine.load_state().await;
            let chunk_count = state
                .session(&id)
                .map(|s| s.log_entries.len() as i64)
                .unwrap_or_default();

            let target = match output {
                Some(path) if path.as_os_str() == "-" => {
                    print!("{}", transcript);
                    None
                }
                other => {
                    let path = match other {
                        Some(path) => path,
                        None => match state.session(&id) {
                            Some(session) => PathBuf::from(export_filename(session, Utc::now())),
                            None => PathBuf::from(format!("{}.txt", id)),
                        },
                    };
                    std::fs::write(&path, &transcript)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("Exported {} exchange(s) to {}", chunk_count, path.display());
                    Some(path.display().to_string())
                }
            };

            db.record_export(&ExportRecord {
                session_id: id,
                chunk_count,
                exported_at: Utc::now(),
                target,
            })
            .context("failed to record export")?;
        }
        Commands::Status => {
            let logs = engine.session_logs().await;
            let sessions = engine.list_sessions().await;

            println!("Heartbeat Status");
            println!("  Database:        {}", db_path.display());
            println!(
                "  Log file:        {}",
                heartbeat_core::logging::log_file_path().display()
            );
            println!("  Sessions:        {}", sessions.len());
            match (&logs.session_id, &logs.title) {
                (Some(id), Some(title)) => println!("  Current session: {} ({})", id, title),
                _ => println!("  Current session: none"),
            }
            if logs.continuity {
                println!("  Showing {} exchange(s) from the previous session", logs.entries.len());
            } else {
                println!("  Exchanges:       {}", logs.entries.len());
            }
            println!(
                "  Last saved:      {}",
                format_relative_time_opt(db.updated_at(STATE_RECORD_KEY)?)
            );
            println!("  Collector:       {}", collector_status(&config).await);
            println!("  Exports:         {}", db.export_count()?);
        }
    }

    tracing::info!("heartbeat finished");
    Ok(())
}

/// Whether the backend is configured and answering
async fn collector_status(config: &Config) -> String {
    if !config.collector.is_ready() {
        return "disabled".to_string();
    }

    let client = match CollectorClient::new(config.collector.clone()) {
        Ok(client) => client,
        Err(e) => return format!("enabled, misconfigured ({})", e),
    };
    match client.health_check().await {
        Ok(true) => "enabled, reachable".to_string(),
        Ok(false) => "enabled, server error".to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "Collector health check failed");
            "enabled, unreachable".to_string()
        }
    }
}
