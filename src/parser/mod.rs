//! Transcript parsing and the session model.
//!
//! Each supported transcript format implements [`SessionParser`]. Parsers are
//! handed to the [`crate::locator::SessionLocator`] explicitly, so there is no
//! process-wide registry to reset between tests.
mod claude;

pub use claude::ClaudeCodeParser;

use chrono::{DateTime, TimeDelta, Utc};
use eyre::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Number of leading lines inspected by [`SessionParser::can_parse`].
pub const PARSER_PEEK_LINES: usize = 50;

/// Maximum characters kept in [`Session::first_user_msg`] before a `...`
/// marker is appended.
pub const FIRST_MESSAGE_PREVIEW_LEN: usize = 100;

/// A transcript format.
pub trait SessionParser {
    /// Identifier of the tool that writes this format (e.g. `claude-code`).
    fn tool(&self) -> &'static str;

    /// Cheap check of the first few lines. Must not accept arbitrary JSONL.
    fn can_parse(&self, path: &Path) -> bool;

    /// Parse every session in the file, sorted by start time ascending.
    ///
    /// Malformed lines are skipped; only an unreadable file is an error.
    fn parse_file(&self, path: &Path) -> Result<Vec<Session>>;

    /// Decode a single line into `(session_id, message)`.
    ///
    /// Returns `Ok(None)` for blank lines and for entries that are not
    /// conversation messages.
    fn parse_line(&self, line: &str) -> Result<Option<(String, Message)>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolUse {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub tool_use_id: String,
    pub content: String,
    pub is_error: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub tool_uses: Vec<ToolUse>,
    pub tool_results: Vec<ToolResult>,
}

impl Message {
    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    pub fn uses_tools(&self) -> bool {
        !self.tool_uses.is_empty()
    }

    /// A message with nothing to render: no text, no tool calls, no results.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.tool_uses.is_empty() && self.tool_results.is_empty()
    }

    /// First `max_len` characters of the text, with `...` when cut.
    pub fn preview(&self, max_len: usize) -> String {
        preview(&self.text, max_len)
    }
}

pub(crate) fn preview(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_len).collect();
    out.push_str("...");
    out
}

/// One reconstructed conversation.
///
/// `messages` is ordered by timestamp; `start_time` and `end_time` are the
/// first and last message timestamps.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub id: String,
    /// Random human-readable slug assigned by the tool, if any.
    pub slug: Option<String>,
    /// First user text, trimmed and cut to [`FIRST_MESSAGE_PREVIEW_LEN`].
    pub first_user_msg: Option<String>,
    pub tool: String,
    pub project: String,
    pub cwd: String,
    pub git_branch: Option<String>,
    pub model: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration: TimeDelta,
    pub turn_count: usize,
    pub total_tokens_in: u64,
    pub total_tokens_out: u64,
    pub total_tokens: u64,
    pub messages: Vec<Message>,
    pub source_file: PathBuf,
}

impl Session {
    pub fn user_messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.is_user())
    }

    pub fn all_tool_uses(&self) -> impl Iterator<Item = &ToolUse> {
        self.messages.iter().flat_map(|m| m.tool_uses.iter())
    }

    /// Tool name → number of calls, sorted by name.
    pub fn tool_counts(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for t in self.all_tool_uses() {
            *counts.entry(t.name.as_str()).or_default() += 1;
        }
        counts
    }

    /// Messages that carry something to render, in order.
    pub fn non_empty_messages(&self) -> Vec<&Message> {
        self.messages.iter().filter(|m| !m.is_empty()).collect()
    }
}

/// Last path component of a working directory, used as the project name.
pub(crate) fn project_name(cwd: &str) -> String {
    Path::new(cwd)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
