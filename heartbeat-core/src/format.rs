//! Formatting helpers for the CLI and session exports.

use chrono::{DateTime, Utc};

use crate::types::{ExchangeChunk, Session, UserSettings};

const CHUNK_RULE: &str = "====================================";
const PART_RULE: &str = "------------------------------------";

/// Format a timestamp as relative time (e.g., "2m ago").
pub fn format_relative_time(ts: DateTime<Utc>) -> String {
    let now = Utc::now();
    let duration = now.signed_duration_since(ts);

    if duration.num_seconds() < 0 {
        "just now".to_string()
    } else if duration.num_seconds() < 60 {
        format!("{}s ago", duration.num_seconds())
    } else if duration.num_minutes() < 60 {
        format!("{}m ago", duration.num_minutes())
    } else if duration.num_hours() < 24 {
        format!("{}h ago", duration.num_hours())
    } else if duration.num_days() < 7 {
        format!("{}d ago", duration.num_days())
    } else {
        ts.format("%b %d").to_string()
    }
}

/// Format an optional timestamp as relative time, or "-" if missing.
pub fn format_relative_time_opt(ts: Option<DateTime<Utc>>) -> String {
    match ts {
        Some(ts) => format_relative_time(ts),
        None => "-".to_string(),
    }
}

/// Transcript timestamp. Always UTC; the zone is spelled out.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%b %-d, %Y, %I:%M:%S %p UTC").to_string()
}

fn or_na(value: Option<&str>) -> &str {
    value.filter(|v| !v.is_empty()).unwrap_or("N/A")
}

fn dom_id(details: &Option<serde_json::Value>) -> Option<&str> {
    details.as_ref()?.get("dom_id")?.as_str()
}

/// Double newlines so multi-line turns stay readable in plain text
fn spaced(text: &str) -> String {
    text.replace('\n', "\n\n")
}

/// One chunk: header block, user part, assistant part
pub fn format_chunk(chunk: &ExchangeChunk) -> String {
    let meta = &chunk.extension_capture_metadata;
    let provider = or_na(Some(&chunk.source_llm_provider));
    let tokens = if chunk.initial_semantic_tokens.is_empty() {
        "N/A".to_string()
    } else {
        chunk.initial_semantic_tokens.join(", ")
    };
    let custom_fields = chunk
        .custom_fields
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "N/A".to_string());

    let mut out = String::new();
    out.push_str(CHUNK_RULE);
    out.push('\n');
    out.push_str(&format!("Chunk ID: {}\n", chunk.chunk_id));
    out.push_str(&format!("Conversation ID: {}\n", chunk.conversation_id));
    out.push_str(&format!(
        "Parent Chunk ID: {}\n",
        or_na(chunk.parent_chunk_id.as_deref())
    ));
    out.push_str(&format!("Turn in Conversation: {}\n", chunk.turn_in_conversation));
    out.push_str(&format!("LLM Provider: {}\n", provider));
    out.push_str(&format!(
        "LLM Model Approx: {}\n",
        or_na(chunk.source_llm_model_approx.as_deref())
    ));
    out.push_str(&format!(
        "Origin App: {} (v{})\n",
        chunk.data_origin_app, meta.extension_version
    ));
    out.push_str(&format!("Capture Method: {}\n", meta.capture_method));
    out.push_str(&format!(
        "Browser: {} | WinID: {} | TabID: {}\n",
        meta.browser_name_at_capture,
        meta.window_id_at_capture
            .map(|w| w.to_string())
            .unwrap_or_else(|| "N/A".to_string()),
        meta.tab_id_at_capture
            .map(|t| t.to_string())
            .unwrap_or_else(|| "N/A".to_string()),
    ));
    out.push_str(&format!("URL: {}\n", or_na(meta.url_at_capture.as_deref())));
    out.push_str(&format!("Semantic Tokens: {}\n", tokens));
    out.push_str(&format!("Notes: {}\n", or_na(chunk.notes.as_deref())));
    out.push_str(&format!("Custom Fields: {}\n", custom_fields));
    out.push_str(PART_RULE);
    out.push('\n');

    out.push_str(&format!(
        "[{}] (user on {}):\n",
        format_timestamp(chunk.timestamp_user_prompt),
        provider
    ));
    out.push_str(&format!(
        "User DOM ID: {}\n",
        or_na(dom_id(&chunk.user_input.raw_source_details))
    ));
    out.push_str(&spaced(&chunk.user_input.raw_text));
    out.push('\n');
    out.push_str(PART_RULE);
    out.push('\n');

    out.push_str(&format!(
        "[{}] (assistant on {}):\n",
        format_timestamp(chunk.timestamp_assistant_response_complete),
        provider
    ));
    out.push_str(&format!(
        "Assistant DOM ID: {}\n",
        or_na(dom_id(&chunk.assistant_response.raw_source_details))
    ));
    out.push_str(&spaced(&chunk.assistant_response.raw_text));
    out.push('\n');
    out.push_str(CHUNK_RULE);
    out.push_str("\n\n");

    out
}

/// Plain-text transcript of a whole session
pub fn export_session(session: &Session, settings: &UserSettings) -> String {
    let meta = &session.metadata;
    let mut out = format!(
        "Heartbeat session: {}\nSession ID: {}\nPlatform: {}\nStarted: {}\nExported for: {}\nExchanges: {}\n\n",
        meta.title,
        session.id,
        meta.platform,
        format_timestamp(meta.started_at),
        settings.nickname,
        session.log_entries.len()
    );

    for chunk in &session.log_entries {
        out.push_str(&format_chunk(chunk));
    }
    out
}

/// File name for an exported session, safe on every platform
pub fn export_filename(session: &Session, now: DateTime<Utc>) -> String {
    let title = if session.metadata.title.is_empty() {
        session.id.as_str()
    } else {
        session.metadata.title.as_str()
    };
    let sanitized: String = title
        .chars()
        .map(|c| match c {
            c if c.is_whitespace() => '_',
            ':' | '/' | '\\' | '?' | '%' | '*' | '|' | '"' | '<' | '>' => '_',
            c => c,
        })
        .collect();

    format!(
        "heartbeat_session_{}_{}.txt",
        sanitized,
        now.format("%Y%m%d_%H%M%S")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::DetectedCommands;
    use crate::config::SessionConfig;
    use crate::pairing::{build_chunk, TurnPayload};
    use crate::types::{Role, TabInfo, TurnEvent};
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_relative_time() {
        assert_eq!(format_relative_time(Utc::now() + Duration::seconds(30)), "just now");
        assert_eq!(format_relative_time(Utc::now() - Duration::minutes(5)), "5m ago");
        assert_eq!(format_relative_time(Utc::now() - Duration::hours(3)), "3h ago");
        assert_eq!(format_relative_time_opt(None), "-");
    }

    #[test]
    fn test_timestamp_format() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
        assert_eq!(format_timestamp(ts), "Mar 5, 2024, 02:07:09 PM UTC");
    }

    #[test]
    fn test_export_session_transcript() {
        let tab = TabInfo::new(9, "https://claude.ai/chat/abc");
        let mut session = Session::new("s1".into(), "claude-chat-interface", Some(&tab), Utc::now());

        let mut user_event = TurnEvent::new(Role::User, "line one\nline two", tab.clone());
        user_event.raw_source_details = Some(serde_json::json!({"dom_id": "msg-1"}));
        let user = TurnPayload::from_event(&user_event, DetectedCommands::default(), Utc::now());
        let assistant = TurnPayload::from_event(
            &TurnEvent::new(Role::Assistant, "answer", tab).with_platform("claude-chat-interface"),
            DetectedCommands::default(),
            Utc::now(),
        );
        let chunk = build_chunk(&session, &user, &assistant, &SessionConfig::default(), Utc::now());
        session.log_entries.push(chunk.clone());

        let text = export_session(&session, &UserSettings::default());
        assert!(text.starts_with("Heartbeat session: Session for claude.ai (claude-chat-interface)\n"));
        assert!(text.contains(&format!("Chunk ID: {}\n", chunk.chunk_id)));
        assert!(text.contains("Parent Chunk ID: N/A\n"));
        assert!(text.contains("User DOM ID: msg-1\n"));
        assert!(text.contains("Assistant DOM ID: N/A\n"));
        assert!(text.contains("line one\n\nline two\n"));
        assert!(text.contains("(assistant on claude-chat-interface):\nAssistant DOM ID: N/A\nanswer\n"));
        assert!(text.contains("Browser: Unknown | WinID: N/A | TabID: 9\n"));
    }

    #[test]
    fn test_export_filename() {
        let session = Session::new("s1".into(), "manual", None, Utc::now());
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(
            export_filename(&session, now),
            "heartbeat_session_Session_s1_(manual)_20240102_030405.txt"
        );
    }
}
