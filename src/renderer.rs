//! Markdown rendering of one journal page.
//!
//! Output depends only on the [`Page`] fields, so re-rendering an unchanged
//! session reproduces the same bytes.

use crate::parser::{Message, Session, ToolResult, ToolUse};
use crate::slug::part_filename;
use crate::utils::{format_duration, format_tokens};
use chrono::Local;
use eyre::Result;
use regex::Regex;
use serde::Serialize;
use std::io::{self, Write};
use std::sync::LazyLock;

pub const SEPARATOR: &str = "---";
pub const SUMMARY_PLACEHOLDER: &str = "[Add your summary of this session]";

/// Tool results with more lines than this are folded into `<details>`.
pub const DETAILS_THRESHOLD: usize = 10;

const BASH_PREVIEW_LEN: usize = 100;

static LINE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*\d+→").expect("static regex"));
static SYSTEM_REMINDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<system-reminder>\s*(.*?)\s*</system-reminder>").expect("static regex")
});
// A fence glued to the end of a line of text: "see this: ```".
static FENCE_AFTER_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([^\s`])[ \t]*(```+)").expect("static regex"));
// Text on the same line after a fence and a space: "``` more text". A
// language tag directly after the fence is left alone.
static TEXT_AFTER_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(```+)[ \t]+(\S)").expect("static regex"));

/// One file's worth of a session.
#[derive(Debug, Clone, Copy)]
pub struct Page<'a> {
    pub session: &'a Session,
    /// Messages on this page only.
    pub messages: &'a [&'a Message],
    /// Index of `messages[0]` in the whole session, for numbering.
    pub start_index: usize,
    /// 1-based.
    pub part: usize,
    pub total_parts: usize,
    /// Filename of part 1 without `.md`.
    pub base_name: &'a str,
    /// May be empty.
    pub title: &'a str,
}

#[derive(Serialize)]
struct Frontmatter<'a> {
    date: String,
    time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    session_id: &'a str,
    tool: &'a str,
    project: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    turns: usize,
    tokens_in: u64,
    tokens_out: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    parts: Option<usize>,
}

pub fn render_page(page: &Page) -> Result<String> {
    let mut buf = Vec::new();
    write_page(&mut buf, page)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

pub fn write_page<W: Write>(writer: &mut W, page: &Page) -> io::Result<()> {
    let s = page.session;
    let multipart = page.total_parts > 1;

    if page.part == 1 {
        write_frontmatter(writer, page)?;
    }

    if page.title.is_empty() {
        writeln!(writer, "# {}", page.base_name)?;
    } else {
        writeln!(writer, "# {}", page.title)?;
    }
    writeln!(writer)?;

    if multipart {
        writeln!(writer, "{}", navigation(page.part, page.total_parts, page.base_name))?;
        writeln!(writer, "{}", SEPARATOR)?;
        writeln!(writer)?;
    }

    if page.part == 1 {
        write_metadata(writer, s, page.total_parts)?;
    }

    if page.part == 1 {
        writeln!(writer, "## Conversation")?;
    } else {
        writeln!(writer, "## Conversation (continued from part {})", page.part - 1)?;
    }
    writeln!(writer)?;

    for (i, msg) in page.messages.iter().enumerate() {
        write_message(writer, page.start_index + i + 1, msg)?;
    }

    if multipart {
        writeln!(writer)?;
        writeln!(writer, "{}", SEPARATOR)?;
        writeln!(writer)?;
        writeln!(writer, "{}", navigation(page.part, page.total_parts, page.base_name))?;
    }

    Ok(())
}

fn write_frontmatter<W: Write>(writer: &mut W, page: &Page) -> io::Result<()> {
    let s = page.session;
    let start = s.start_time.with_timezone(&Local);
    let fm = Frontmatter {
        date: start.format("%Y-%m-%d").to_string(),
        time: start.format("%H:%M:%S").to_string(),
        title: (!page.title.is_empty()).then_some(page.title),
        session_id: &s.id,
        tool: &s.tool,
        project: &s.project,
        branch: s.git_branch.as_deref(),
        model: s.model.as_deref(),
        turns: s.turn_count,
        tokens_in: s.total_tokens_in,
        tokens_out: s.total_tokens_out,
        parts: (page.total_parts > 1).then_some(page.total_parts),
    };

    writeln!(writer, "{}", SEPARATOR)?;
    let yaml = serde_yaml::to_string(&fm).map_err(io::Error::other)?;
    write!(writer, "{}", yaml)?;
    writeln!(writer, "{}", SEPARATOR)?;
    writeln!(writer)
}

fn write_metadata<W: Write>(writer: &mut W, s: &Session, total_parts: usize) -> io::Result<()> {
    let start = s.start_time.with_timezone(&Local);
    writeln!(writer, "**ID**: {}", s.id)?;
    writeln!(writer, "**Date**: {}", start.format("%Y-%m-%d"))?;
    writeln!(writer, "**Time**: {}", start.format("%H:%M:%S"))?;
    writeln!(writer, "**Duration**: {}", format_duration(s.duration))?;
    writeln!(writer, "**Tool**: {}", s.tool)?;
    writeln!(writer, "**Project**: {}", s.project)?;
    if let Some(branch) = &s.git_branch {
        writeln!(writer, "**Branch**: {}", branch)?;
    }
    if let Some(model) = &s.model {
        writeln!(writer, "**Model**: {}", model)?;
    }
    writeln!(writer)?;

    writeln!(writer, "**Turns**: {}", s.turn_count)?;
    writeln!(
        writer,
        "**Tokens**: {} (in: {}, out: {})",
        format_tokens(s.total_tokens),
        format_tokens(s.total_tokens_in),
        format_tokens(s.total_tokens_out)
    )?;
    if total_parts > 1 {
        writeln!(writer, "**Parts**: {}", total_parts)?;
    }
    writeln!(writer)?;
    writeln!(writer, "{}", SEPARATOR)?;
    writeln!(writer)?;

    writeln!(writer, "## Summary")?;
    writeln!(writer)?;
    writeln!(writer, "{}", SUMMARY_PLACEHOLDER)?;
    writeln!(writer)?;
    writeln!(writer, "{}", SEPARATOR)?;
    writeln!(writer)?;

    let counts = s.tool_counts();
    if !counts.is_empty() {
        writeln!(writer, "## Tool Usage")?;
        writeln!(writer)?;
        for (name, count) in counts {
            writeln!(writer, "- {}: {}", name, count)?;
        }
        writeln!(writer)?;
        writeln!(writer, "{}", SEPARATOR)?;
        writeln!(writer)?;
    }
    Ok(())
}

pub(crate) fn write_message<W: Write>(
    writer: &mut W,
    number: usize,
    msg: &Message,
) -> io::Result<()> {
    let role = if msg.is_assistant() {
        "Assistant"
    } else if !msg.tool_results.is_empty() && msg.text.is_empty() {
        "Tool Output"
    } else {
        "User"
    };
    let time = msg.timestamp.with_timezone(&Local).format("%H:%M:%S");
    writeln!(writer, "### {}. {} ({})", number, role, time)?;
    writeln!(writer)?;

    if !msg.text.is_empty() {
        if msg.is_user() {
            writeln!(writer, "{}", normalize_code_fences(&msg.text))?;
        } else {
            writeln!(writer, "{}", msg.text)?;
        }
        writeln!(writer)?;
    }

    for t in &msg.tool_uses {
        writeln!(writer, "🔧 **{}**", format_tool_use(t))?;
    }
    for r in &msg.tool_results {
        write_tool_result(writer, r)?;
    }
    if msg.uses_tools() || !msg.tool_results.is_empty() {
        writeln!(writer)?;
    }
    Ok(())
}

fn write_tool_result<W: Write>(writer: &mut W, r: &ToolResult) -> io::Result<()> {
    if r.is_error {
        writeln!(writer, "❌ Error")?;
    }
    if r.content.is_empty() {
        return Ok(());
    }

    let content = strip_line_numbers(&r.content);
    let (content, reminders) = extract_system_reminders(&content);
    let fence = fence_for_content(&content);
    let lines = content.matches('\n').count();

    if lines > DETAILS_THRESHOLD {
        writeln!(writer, "<details>")?;
        writeln!(writer, "<summary>{} lines</summary>", lines)?;
        writeln!(writer)?;
        writeln!(writer, "{}\n{}\n{}", fence, content, fence)?;
        writeln!(writer, "</details>")?;
    } else {
        writeln!(writer, "{}\n{}\n{}", fence, content, fence)?;
    }

    for reminder in reminders {
        writeln!(writer)?;
        writeln!(writer, "**System Reminder**: {}", reminder)?;
    }
    Ok(())
}

/// `**Part X of N** | [← Previous](…) | [Next →](…)`
pub fn navigation(part: usize, total_parts: usize, base_name: &str) -> String {
    let mut out = format!("**Part {} of {}**", part, total_parts);
    if part > 1 {
        out.push_str(" | ");
        out.push_str(&format!("[← Previous]({})", part_filename(base_name, part - 1)));
    }
    if part < total_parts {
        out.push_str(" | ");
        out.push_str(&format!("[Next →]({})", part_filename(base_name, part + 1)));
    }
    out
}

/// Shortest run of three or more backticks that does not occur in `content`.
pub fn fence_for_content(content: &str) -> String {
    let mut fence = String::from("```");
    while content.contains(&fence) {
        fence.push('`');
    }
    fence
}

/// Remove the `   12→` gutter Claude Code puts in front of file lines.
pub fn strip_line_numbers(content: &str) -> String {
    LINE_NUMBER.replace_all(content, "").into_owned()
}

/// Split out `<system-reminder>` blocks so they render outside the fence.
pub fn extract_system_reminders(content: &str) -> (String, Vec<String>) {
    let reminders = SYSTEM_REMINDER
        .captures_iter(content)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|r| !r.is_empty())
        .collect();
    let cleaned = SYSTEM_REMINDER.replace_all(content, "").into_owned();
    (cleaned, reminders)
}

/// Put code fences typed mid-line onto their own paragraph.
pub fn normalize_code_fences(text: &str) -> String {
    let text = FENCE_AFTER_TEXT.replace_all(text, "$1\n\n$2");
    TEXT_AFTER_FENCE.replace_all(&text, "$1\n\n$2").into_owned()
}

/// `Name: key argument`, or just the name for tools without one.
pub fn format_tool_use(t: &ToolUse) -> String {
    let key = match t.name.as_str() {
        "Read" | "Write" | "Edit" => "file_path",
        "Bash" => "command",
        "Grep" | "Glob" => "pattern",
        "WebFetch" => "url",
        "WebSearch" => "query",
        "Task" => "description",
        _ => return t.name.clone(),
    };
    let Some(value) = t.input.get(key).and_then(|v| v.as_str()) else {
        return t.name.clone();
    };
    if t.name == "Bash" && value.chars().count() > BASH_PREVIEW_LEN {
        let cut: String = value.chars().take(BASH_PREVIEW_LEN).collect();
        return format!("{}: {}...", t.name, cut);
    }
    format!("{}: {}", t.name, value)
}
