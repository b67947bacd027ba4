//! LLM platform detection from tab URLs
//!
//! Each platform is a set of domain prefixes plus a pattern recognising a
//! specific conversation thread. A URL that matches a prefix but not the
//! thread pattern is a "generic" page (landing page, new-chat screen).

use regex::{Captures, Regex};

/// Result of classifying a URL against the known platforms
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformMatch {
    pub platform_id: String,
    pub display_name: String,
    /// True when the URL points at a specific conversation thread
    pub is_specific_chat: bool,
    pub chat_identifier: Option<String>,
    pub url: String,
}

type IdExtractor = fn(&Captures<'_>) -> Option<String>;

struct PlatformMatcher {
    id: &'static str,
    name: &'static str,
    base_patterns: &'static [&'static str],
    specific_chat: Regex,
    extract_id: IdExtractor,
}

/// The registry of known platforms
pub struct PlatformRegistry {
    matchers: Vec<PlatformMatcher>,
}

fn capture(caps: &Captures<'_>, idx: usize) -> Option<String> {
    caps.get(idx).map(|m| m.as_str().to_string())
}

fn gemini_id(caps: &Captures<'_>) -> Option<String> {
    capture(caps, 2)
        .or_else(|| capture(caps, 4))
        .or_else(|| capture(caps, 3))
}

fn chatgpt_id(caps: &Captures<'_>) -> Option<String> {
    capture(caps, 2)
}

fn claude_id(caps: &Captures<'_>) -> Option<String> {
    capture(caps, 1)
}

const BUILTIN: &[(&str, &str, &[&str], &str, IdExtractor)] = &[
    (
        "gemini-chat-interface",
        "Google Gemini",
        &["https://gemini.google.com/", "https://bard.google.com/"],
        r"^(?:https?://(?:gemini\.google\.com|bard\.google\.com))/(app/([a-zA-Z0-9_-]{15,})|gem/([^/]+)(?:/([a-zA-Z0-9_-]{10,}))?)",
        gemini_id,
    ),
    (
        "chatgpt-interface",
        "ChatGPT",
        &["https://chat.openai.com/", "https://chatgpt.com/"],
        r"^https://chat(?:gpt)?\.(?:openai\.)?com/(c|chat)/([a-zA-Z0-9_-]+)",
        chatgpt_id,
    ),
    (
        "claude-chat-interface",
        "Claude.ai",
        &["https://claude.ai/"],
        r"^https://claude\.ai/(?:chat|new)/([a-zA-Z0-9_-]+(?:-\w{8}-\w{4}-\w{4}-\w{4}-\w{12})?)",
        claude_id,
    ),
];

impl PlatformRegistry {
    /// Registry with the built-in platforms
    pub fn builtin() -> Self {
        let matchers = BUILTIN
            .iter()
            .filter_map(|&(id, name, base_patterns, pattern, extract_id)| {
                match Regex::new(pattern) {
                    Ok(specific_chat) => Some(PlatformMatcher {
                        id,
                        name,
                        base_patterns,
                        specific_chat,
                        extract_id,
                    }),
                    Err(e) => {
                        tracing::error!(platform = id, error = %e, "Invalid platform pattern");
                        None
                    }
                }
            })
            .collect();

        Self { matchers }
    }

    /// Classify a URL. Returns `None` for non-LLM pages.
    pub fn classify(&self, url: &str) -> Option<PlatformMatch> {
        if url.is_empty() {
            return None;
        }

        let matcher = self
            .matchers
            .iter()
            .find(|m| m.base_patterns.iter().any(|base| url.starts_with(base)))?;

        let caps = matcher.specific_chat.captures(url);
        let chat_identifier = caps.as_ref().and_then(|c| (matcher.extract_id)(c));

        Some(PlatformMatch {
            platform_id: matcher.id.to_string(),
            display_name: matcher.name.to_string(),
            is_specific_chat: caps.is_some(),
            chat_identifier,
            url: url.to_string(),
        })
    }

    /// Ids of all registered platforms
    pub fn platform_ids(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.matchers.iter().map(|m| m.id)
    }
}

impl Default for PlatformRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_has_all_platforms() {
        let registry = PlatformRegistry::builtin();
        let ids: Vec<_> = registry.platform_ids().collect();
        assert_eq!(
            ids,
            vec!["gemini-chat-interface", "chatgpt-interface", "claude-chat-interface"]
        );
    }

    #[test]
    fn test_non_llm_page() {
        let registry = PlatformRegistry::builtin();
        assert!(registry.classify("https://example.com/c/123").is_none());
        assert!(registry.classify("").is_none());
    }

    #[test]
    fn test_chatgpt_thread_and_generic() {
        let registry = PlatformRegistry::builtin();

        let m = registry.classify("https://chatgpt.com/c/67a1-b2c3").unwrap();
        assert_eq!(m.platform_id, "chatgpt-interface");
        assert!(m.is_specific_chat);
        assert_eq!(m.chat_identifier.as_deref(), Some("67a1-b2c3"));

        let m = registry.classify("https://chat.openai.com/chat/abc").unwrap();
        assert!(m.is_specific_chat);
        assert_eq!(m.chat_identifier.as_deref(), Some("abc"));

        let m = registry.classify("https://chatgpt.com/").unwrap();
        assert!(!m.is_specific_chat);
        assert!(m.chat_identifier.is_none());
    }

    #[test]
    fn test_gemini_identifiers() {
        let registry = PlatformRegistry::builtin();

        let m = registry
            .classify("https://gemini.google.com/app/0123456789abcdef")
            .unwrap();
        assert!(m.is_specific_chat);
        assert_eq!(m.chat_identifier.as_deref(), Some("0123456789abcdef"));

        // Short app ids are not threads
        let m = registry.classify("https://gemini.google.com/app/short").unwrap();
        assert!(!m.is_specific_chat);

        let m = registry
            .classify("https://gemini.google.com/gem/coding-partner/abcdef123456")
            .unwrap();
        assert_eq!(m.chat_identifier.as_deref(), Some("abcdef123456"));

        let m = registry
            .classify("https://gemini.google.com/gem/coding-partner")
            .unwrap();
        assert!(m.is_specific_chat);
        assert_eq!(m.chat_identifier.as_deref(), Some("coding-partner"));
    }

    #[test]
    fn test_claude_thread() {
        let registry = PlatformRegistry::builtin();
        let m = registry
            .classify("https://claude.ai/chat/5f1e2d3c-aaaa-bbbb-cccc-123456789012")
            .unwrap();
        assert_eq!(m.platform_id, "claude-chat-interface");
        assert_eq!(m.display_name, "Claude.ai");
        assert!(m.is_specific_chat);

        let m = registry.classify("https://claude.ai/new").unwrap();
        assert!(!m.is_specific_chat);
    }
}
