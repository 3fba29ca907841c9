//! Claude Code transcript format.
//!
//! Claude Code appends one JSON object per line to
//! `~/.claude/projects/<encoded-cwd>/<session-uuid>.jsonl`:
//!
//! ```json
//! {"uuid":"…","parentUuid":"…","sessionId":"…","type":"user",
//!  "timestamp":"2026-01-20T10:00:00Z","cwd":"/home/me/proj","gitBranch":"main",
//!  "slug":"gleaming-wobbling-sutherland",
//!  "message":{"role":"user","content":[{"type":"text","text":"hello"}]}}
//! ```
//!
//! `message.content` is either a plain string or an array of blocks tagged by
//! `type`: `text`, `thinking`, `tool_use`, `tool_result`. Other line types
//! (`summary`, `file-history-snapshot`, …) are ignored.
use super::{
    FIRST_MESSAGE_PREVIEW_LEN, Message, PARSER_PEEK_LINES, Role, Session, SessionParser,
    ToolResult, ToolUse, preview, project_name,
};
use crate::utils::sanitize_utf8;
use chrono::{DateTime, Utc};
use eyre::{Context, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::debug;

const TOOL_NAME: &str = "claude-code";
const TYPE_USER: &str = "user";
const TYPE_ASSISTANT: &str = "assistant";

// ---------------------------------------------------------------------------
// Raw schema
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLogLine {
    #[serde(default)]
    session_id: String,
    #[serde(rename = "type")]
    kind: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    git_branch: Option<String>,
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    message: RawMessage,
}

#[derive(Debug, Default, Deserialize)]
struct RawMessage {
    /// Shared by every line of one streamed assistant response.
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    content: Option<RawContent>,
    #[serde(default)]
    usage: Option<RawUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    Thinking,
    ToolUse {
        #[serde(default)]
        id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    ToolResult {
        #[serde(default)]
        tool_use_id: String,
        #[serde(default)]
        content: Option<ToolResultContent>,
        #[serde(default)]
        is_error: Option<bool>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ToolResultContent {
    Text(String),
    Blocks(Vec<ToolResultBlock>),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ToolResultBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
struct RawUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
}

/// Just enough of a line to recognise the format.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LineHeader {
    #[serde(default)]
    session_id: String,
    #[serde(rename = "type", default)]
    kind: String,
}

impl ToolResultContent {
    fn into_text(self) -> String {
        match self {
            ToolResultContent::Text(s) => s,
            ToolResultContent::Blocks(blocks) => blocks
                .into_iter()
                .filter_map(|b| match b {
                    ToolResultBlock::Text { text } => Some(text),
                    ToolResultBlock::Other => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy)]
pub struct ClaudeCodeParser;

impl ClaudeCodeParser {
    pub fn new() -> Self {
        Self
    }

    /// Decode one line. `Ok(None)` for blank or non-message lines.
    fn decode(&self, line: &str) -> Result<Option<RawLogLine>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let value: serde_json::Value =
            serde_json::from_str(line).wrap_err("Invalid JSON line")?;
        let kind = value.get("type").and_then(|v| v.as_str()).unwrap_or("");
        if kind != TYPE_USER && kind != TYPE_ASSISTANT {
            return Ok(None);
        }
        let raw: RawLogLine =
            serde_json::from_value(value).wrap_err("Malformed transcript entry")?;
        if raw.session_id.is_empty() {
            return Ok(None);
        }
        Ok(Some(raw))
    }

    fn build_session(&self, id: String, mut lines: Vec<RawLogLine>, path: &Path) -> Option<Session> {
        if lines.is_empty() {
            return None;
        }
        // Stable: entries sharing a timestamp keep their file order.
        lines.sort_by_key(|l| l.timestamp);

        let mut cwd: Option<String> = None;
        let mut git_branch: Option<String> = None;
        let mut slug: Option<String> = None;
        let mut model: Option<String> = None;
        let mut tokens_in = 0u64;
        let mut tokens_out = 0u64;
        let mut counted_responses: HashSet<String> = HashSet::new();
        let mut messages = Vec::with_capacity(lines.len());

        for mut line in lines {
            fill_once(&mut cwd, line.cwd.take());
            fill_once(&mut git_branch, line.git_branch.take());
            fill_once(&mut slug, line.slug.take());

            if line.kind == TYPE_ASSISTANT {
                fill_once(&mut model, line.message.model.take());
                if let Some(usage) = line.message.usage {
                    let first_time = match &line.message.id {
                        Some(mid) => counted_responses.insert(mid.clone()),
                        None => true,
                    };
                    if first_time {
                        tokens_in += usage.input_tokens
                            + usage.cache_creation_input_tokens
                            + usage.cache_read_input_tokens;
                        tokens_out += usage.output_tokens;
                    }
                }
            }

            messages.push(convert_message(line));
        }

        let start_time = messages.first()?.timestamp;
        let end_time = messages.last()?.timestamp;
        let first_user_msg = messages
            .iter()
            .find(|m| m.is_user() && !m.text.is_empty())
            .map(|m| preview(&m.text, FIRST_MESSAGE_PREVIEW_LEN));
        let turn_count = messages
            .iter()
            .filter(|m| m.is_user() && !m.text.is_empty())
            .count();
        let cwd = cwd.unwrap_or_default();

        Some(Session {
            id,
            slug,
            first_user_msg,
            tool: TOOL_NAME.to_string(),
            project: project_name(&cwd),
            cwd,
            git_branch,
            model,
            start_time,
            end_time,
            duration: end_time - start_time,
            turn_count,
            total_tokens_in: tokens_in,
            total_tokens_out: tokens_out,
            total_tokens: tokens_in + tokens_out,
            messages,
            source_file: path.to_path_buf(),
        })
    }
}

fn fill_once(slot: &mut Option<String>, value: Option<String>) {
    if slot.is_none() {
        *slot = value.filter(|v| !v.is_empty());
    }
}

fn convert_message(raw: RawLogLine) -> Message {
    let role = if raw.kind == TYPE_ASSISTANT {
        Role::Assistant
    } else {
        Role::User
    };

    let mut texts: Vec<String> = Vec::new();
    let mut tool_uses = Vec::new();
    let mut tool_results = Vec::new();

    match raw.message.content {
        Some(RawContent::Text(s)) => texts.push(s),
        Some(RawContent::Blocks(blocks)) => {
            for block in blocks {
                match block {
                    ContentBlock::Text { text } => texts.push(text),
                    ContentBlock::ToolUse { id, name, input } => {
                        tool_uses.push(ToolUse { id, name, input })
                    }
                    ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        is_error,
                    } => tool_results.push(ToolResult {
                        tool_use_id,
                        content: content.map(ToolResultContent::into_text).unwrap_or_default(),
                        is_error: is_error.unwrap_or(false),
                    }),
                    ContentBlock::Thinking | ContentBlock::Other => {}
                }
            }
        }
        None => {}
    }

    Message {
        role,
        text: texts.join("\n").trim().to_string(),
        timestamp: raw.timestamp,
        tool_uses,
        tool_results,
    }
}

/// Read the next raw line (without the trailing newline) as sanitized UTF-8.
fn next_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Option<String>> {
    buf.clear();
    if reader.read_until(b'\n', buf)? == 0 {
        return Ok(None);
    }
    Ok(Some(sanitize_utf8(buf).into_owned()))
}

impl SessionParser for ClaudeCodeParser {
    fn tool(&self) -> &'static str {
        TOOL_NAME
    }

    fn can_parse(&self, path: &Path) -> bool {
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
            return false;
        }
        let Ok(file) = File::open(path) else {
            return false;
        };
        let mut reader = BufReader::new(file);
        let mut buf = Vec::new();

        for _ in 0..PARSER_PEEK_LINES {
            let line = match next_line(&mut reader, &mut buf) {
                Ok(Some(l)) => l,
                _ => return false,
            };
            let Ok(header) = serde_json::from_str::<LineHeader>(line.trim()) else {
                continue;
            };
            if !header.session_id.is_empty()
                && (header.kind == TYPE_USER || header.kind == TYPE_ASSISTANT)
            {
                return true;
            }
        }
        false
    }

    fn parse_file(&self, path: &Path) -> Result<Vec<Session>> {
        let file = File::open(path)
            .wrap_err_with(|| format!("Failed to open transcript: {}", path.display()))?;
        let mut reader = BufReader::new(file);
        let mut buf = Vec::new();
        let mut by_session: HashMap<String, Vec<RawLogLine>> = HashMap::new();
        let mut line_no = 0usize;

        while let Some(line) = next_line(&mut reader, &mut buf)
            .wrap_err_with(|| format!("Failed to read transcript: {}", path.display()))?
        {
            line_no += 1;
            match self.decode(&line) {
                Ok(Some(raw)) => by_session.entry(raw.session_id.clone()).or_default().push(raw),
                Ok(None) => {}
                Err(e) => debug!("{}:{}: skipping line: {:#}", path.display(), line_no, e),
            }
        }

        let mut sessions: Vec<Session> = by_session
            .into_iter()
            .filter_map(|(id, lines)| self.build_session(id, lines, path))
            .collect();
        sessions.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
        Ok(sessions)
    }

    fn parse_line(&self, line: &str) -> Result<Option<(String, Message)>> {
        Ok(self.decode(line)?.map(|raw| {
            let id = raw.session_id.clone();
            (id, convert_message(raw))
        }))
    }
}
