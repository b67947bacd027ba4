//! Rolling summary buffer
//!
//! Each session keeps its most recent exchanges available for context
//! priming. A committed chunk first waits in a small processing buffer; once
//! the next one arrives it graduates to the front of the rolling window, and
//! the window drops its oldest entries past its cap.

use crate::types::{ExchangeChunk, Session};

/// Feed a committed chunk, returning whether the rolling window changed
pub fn on_committed_chunk(
    session: &mut Session,
    chunk: ExchangeChunk,
    window: usize,
    buffer: usize,
) -> bool {
    session.stacker_processing_buffer.push(chunk);

    let mut changed = false;
    while session.stacker_processing_buffer.len() > buffer {
        let graduated = session.stacker_processing_buffer.remove(0);
        session.stacker_chunks.insert(0, graduated);
        changed = true;
    }

    if session.stacker_chunks.len() > window {
        session.stacker_chunks.truncate(window);
        changed = true;
    }

    if changed {
        tracing::debug!(
            session_id = %session.id,
            window = session.stacker_chunks.len(),
            "Rolling window updated"
        );
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::DetectedCommands;
    use crate::config::SessionConfig;
    use crate::pairing::{build_chunk, TurnPayload};
    use crate::types::{Role, TabInfo, TurnEvent};
    use chrono::Utc;

    fn chunk(session: &Session, n: usize) -> ExchangeChunk {
        let tab = TabInfo::new(1, "https://claude.ai/chat/x");
        let make = |role, text: String| {
            TurnPayload::from_event(
                &TurnEvent::new(role, text, tab.clone()),
                DetectedCommands::default(),
                Utc::now(),
            )
        };
        let mut chunk = build_chunk(
            session,
            &make(Role::User, format!("q{}", n)),
            &make(Role::Assistant, format!("a{}", n)),
            &SessionConfig::default(),
            Utc::now(),
        );
        chunk.chunk_id = format!("chunk-{}", n);
        chunk
    }

    #[test]
    fn test_five_chunks_leave_three_most_recent_first() {
        let mut session = Session::new("s1".into(), "manual", None, Utc::now());

        let mut changes = Vec::new();
        for n in 1..=5 {
            let c = chunk(&session, n);
            changes.push(on_committed_chunk(&mut session, c, 3, 1));
        }

        let window: Vec<&str> = session.stacker_chunks.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(window, vec!["chunk-4", "chunk-3", "chunk-2"]);
        assert_eq!(session.stacker_processing_buffer.len(), 1);
        assert_eq!(session.stacker_processing_buffer[0].chunk_id, "chunk-5");
        // The first chunk only fills the delay slot
        assert_eq!(changes, vec![false, true, true, true, true]);
    }

    #[test]
    fn test_zero_delay_buffer() {
        let mut session = Session::new("s1".into(), "manual", None, Utc::now());
        let c = chunk(&session, 1);
        assert!(on_committed_chunk(&mut session, c, 3, 0));
        assert!(session.stacker_processing_buffer.is_empty());
        assert_eq!(session.stacker_chunks.len(), 1);
    }
}
