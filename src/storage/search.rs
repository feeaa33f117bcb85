//! Linear session search
//!
//! Case-insensitive substring scan over the searchable fields of a session
//! (system prompt, message content, name, tags). Backends without an index
//! run every candidate session through [`scan_session`]; the SQLite backend
//! uses [`extract_snippet`] for its pattern-matching fallback.

use super::types::{MatchType, SearchMatch, SearchResult, Session};

/// Characters of context kept on each side of a hit
pub const SNIPPET_RADIUS: usize = 50;

/// Marker placed where a snippet was cut
pub const ELLIPSIS: &str = "...";

/// Message matches reported per session; the session itself is always kept
pub const MAX_MESSAGE_MATCHES: usize = 50;

/// Find the first case-insensitive occurrence of `needle` in `haystack`
///
/// Returns the match as a half-open range of *character* indices. An empty
/// needle never matches.
pub fn find_case_insensitive(haystack: &str, needle: &str) -> Option<(usize, usize)> {
    let needle: Vec<char> = needle.chars().flat_map(char::to_lowercase).collect();
    if needle.is_empty() {
        return None;
    }
    let hay: Vec<char> = haystack.chars().collect();

    for start in 0..hay.len() {
        let mut n = 0;
        let mut end = start;
        while end < hay.len() && n < needle.len() {
            let lowered: Vec<char> = hay[end].to_lowercase().collect();
            if needle.len() - n < lowered.len() || needle[n..n + lowered.len()] != lowered[..] {
                break;
            }
            n += lowered.len();
            end += 1;
        }
        if n == needle.len() {
            return Some((start, end));
        }
    }
    None
}

/// Cut a snippet of `text` around the character range `start..end`
///
/// Keeps up to [`SNIPPET_RADIUS`] characters on each side, then moves each
/// cut inward to the nearest word boundary so no word is split. A side that
/// was cut gets an [`ELLIPSIS`].
///
/// # Examples
///
/// ```
/// use sessionvault::storage::search::extract_snippet;
///
/// assert_eq!(extract_snippet("short text", 0, 5), "short text");
/// ```
pub fn extract_snippet(text: &str, start: usize, end: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let end = end.min(len);
    let start = start.min(end);

    let mut from = start.saturating_sub(SNIPPET_RADIUS);
    let mut to = (end + SNIPPET_RADIUS).min(len);

    // Skip a partial word at either edge; a cut already on a boundary stays.
    if from > 0 && !chars[from - 1].is_whitespace() {
        if let Some(ws) = chars[from..start].iter().position(|c| c.is_whitespace()) {
            from += ws + 1;
        } else {
            from = start;
        }
    }
    if to < len && !chars[to].is_whitespace() {
        if let Some(ws) = chars[end..to].iter().rposition(|c| c.is_whitespace()) {
            to = end + ws;
        } else {
            to = end;
        }
    }

    let body: String = chars[from..to].iter().collect();
    let body = body.trim();

    let mut snippet = String::with_capacity(body.len() + 2 * ELLIPSIS.len());
    if from > 0 {
        snippet.push_str(ELLIPSIS);
    }
    snippet.push_str(body);
    if to < len {
        snippet.push_str(ELLIPSIS);
    }
    snippet
}

fn field_match(
    text: &str,
    query: &str,
    match_type: MatchType,
    context: String,
) -> Option<SearchMatch> {
    let (start, end) = find_case_insensitive(text, query)?;
    Some(SearchMatch {
        match_type,
        role: None,
        content: extract_snippet(text, start, end),
        context,
        position: start,
        message_index: None,
    })
}

/// Collect every match of `query` in one session
///
/// Fields are visited in a fixed order: system prompt, each message, name,
/// each tag. Returns `None` when nothing matched.
pub fn scan_session(session: &Session, query: &str) -> Option<SearchResult> {
    let query = query.trim();
    if query.is_empty() {
        return None;
    }

    let mut matches = Vec::new();
    let conversation = &session.conversation;

    if let Some(m) = field_match(
        &conversation.system_prompt,
        query,
        MatchType::SystemPrompt,
        "system prompt".to_string(),
    ) {
        matches.push(m);
    }

    let mut message_matches = 0;
    for (idx, message) in conversation.messages.iter().enumerate() {
        if message_matches == MAX_MESSAGE_MATCHES {
            break;
        }
        if let Some(mut m) = field_match(
            &message.content,
            query,
            MatchType::Message,
            format!("message {}", idx + 1),
        ) {
            m.role = Some(message.role);
            m.message_index = Some(idx);
            matches.push(m);
            message_matches += 1;
        }
    }

    if let Some(name) = &session.name {
        if let Some(m) = field_match(name, query, MatchType::Name, "session name".to_string()) {
            matches.push(m);
        }
    }

    for tag in &session.tags {
        if let Some(m) = field_match(tag, query, MatchType::Tag, format!("tag {}", tag)) {
            matches.push(m);
        }
    }

    if matches.is_empty() {
        return None;
    }

    Some(SearchResult {
        session_id: session.id.clone(),
        session_name: session.name.clone(),
        updated: session.updated,
        matches,
    })
}

/// Search a set of sessions, one result per matching session
///
/// Results keep the order of `sessions`; callers pass them most recent first.
pub fn scan_sessions<'a, I>(sessions: I, query: &str) -> Vec<SearchResult>
where
    I: IntoIterator<Item = &'a Session>,
{
    sessions
        .into_iter()
        .filter_map(|s| scan_session(s, query))
        .collect()
}
