//! Titles, slugs and journal filenames.
//!
//! A session's slug is picked from the first usable source, in order: the
//! title already stored in its journal file's front matter, the first user
//! message, the tool-assigned slug, the short session id.

use crate::parser::Session;
use chrono::Local;
use regex::Regex;
use std::sync::LazyLock;

/// Maximum length of a title-derived slug.
pub const SLUG_MAX_LEN: usize = 50;

/// Maximum length, in characters, of a journal title.
pub const TITLE_MAX_LEN: usize = 75;

/// Length of the session id prefix used in filenames.
pub const SHORT_ID_LEN: usize = 8;

/// Inline markers the assistant tools wrap around user input, such as
/// `<command-message>` or `<local-command-stdout>`.
static TOOL_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"</?[a-z]+(?:-[a-z]+)+(?:\s[^>]*)?>").expect("static regex")
});

/// Normalise a title for storage in front matter.
///
/// Idempotent: `clean_title(clean_title(s)) == clean_title(s)`.
pub fn clean_title(s: &str) -> String {
    let stripped = TOOL_TAG.replace_all(s, "");
    let mut out = stripped.split_whitespace().collect::<Vec<_>>().join(" ");

    if out.chars().count() > TITLE_MAX_LEN {
        let end = out
            .char_indices()
            .nth(TITLE_MAX_LEN)
            .map_or(out.len(), |(i, _)| i);
        out.truncate(end);
        if let Some(idx) = out.rfind(' ')
            && idx > 0
        {
            out.truncate(idx);
        }
    }

    let mut trimmed = out.as_str();
    while let Some(rest) = trimmed.strip_suffix("...") {
        trimmed = rest.trim_end();
    }
    trimmed.trim().to_string()
}

/// Convert a title into a filename-safe slug.
///
/// Lowercase ASCII letters and digits survive; every other run of characters
/// becomes a single hyphen. May be empty.
pub fn slugify_title(title: &str) -> String {
    let title = title.strip_suffix("...").unwrap_or(title);

    let mut slug = String::with_capacity(title.len());
    let mut prev_hyphen = false;
    for c in title.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            slug.push(c);
            prev_hyphen = false;
        } else if !prev_hyphen && !slug.is_empty() {
            slug.push('-');
            prev_hyphen = true;
        }
    }
    let slug = slug.trim_end_matches('-');

    if slug.len() <= SLUG_MAX_LEN {
        return slug.to_string();
    }
    // ASCII only from here on, so byte offsets are character offsets.
    let truncated = &slug[..SLUG_MAX_LEN];
    match truncated.rfind('-') {
        Some(idx) if idx > 0 => truncated[..idx].to_string(),
        _ => truncated.to_string(),
    }
}

/// Pick `(slug, title)` for a session.
///
/// `existing_title` is the `title` field of a previous export, if any. The
/// title is empty when the slug comes from the tool slug or the short id.
pub fn title_slug(session: &Session, existing_title: Option<&str>) -> (String, String) {
    let candidates = [existing_title, session.first_user_msg.as_deref()];
    for candidate in candidates.into_iter().flatten() {
        let title = clean_title(candidate);
        let slug = slugify_title(&title);
        if !slug.is_empty() {
            return (slug, title);
        }
    }

    if let Some(slug) = session.slug.as_deref().filter(|s| !s.is_empty()) {
        return (slug.to_string(), String::new());
    }
    (short_id(&session.id).to_string(), String::new())
}

pub fn short_id(id: &str) -> &str {
    id.char_indices()
        .nth(SHORT_ID_LEN)
        .map_or(id, |(i, _)| &id[..i])
}

/// `YYYY-MM-DD-<slug>-<short id>.md`, dated by the local start time.
pub fn journal_filename(session: &Session, slug: &str) -> String {
    let date = session.start_time.with_timezone(&Local).format("%Y-%m-%d");
    format!("{}-{}-{}.md", date, slug, short_id(&session.id))
}

/// Filename of page `part` (1-based) of a journal entry.
pub fn part_filename(base_name: &str, part: usize) -> String {
    if part <= 1 {
        format!("{}.md", base_name)
    } else {
        format!("{}-p{}.md", base_name, part)
    }
}
