//! `list` and `show` views of located sessions.

use crate::parser::Session;
use crate::renderer::write_message;
use crate::slug::short_id;
use crate::utils::{format_duration, format_tokens};
use chrono::Local;
use eyre::Result;
use std::io::Write;

pub const DEFAULT_LIST_LIMIT: usize = 20;

/// Slugs longer than this are cut in the `list` table.
const SLUG_COLUMN_MAX: usize = 36;

/// User turns shown by `show` without `--full`.
const PREVIEW_TURNS: usize = 5;
const PREVIEW_LEN: usize = 100;

#[derive(Debug, Clone)]
pub struct ListOptions {
    pub limit: usize,
    /// Case-insensitive substring of the project name.
    pub project: Option<String>,
    pub tool: Option<String>,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIST_LIMIT,
            project: None,
            tool: None,
        }
    }
}

impl ListOptions {
    fn has_filters(&self) -> bool {
        self.project.is_some() || self.tool.is_some()
    }

    fn accepts(&self, s: &Session) -> bool {
        if let Some(p) = &self.project
            && !s.project.to_lowercase().contains(&p.to_lowercase())
        {
            return false;
        }
        if let Some(t) = &self.tool
            && s.tool != *t
        {
            return false;
        }
        true
    }
}

fn display_slug(s: &Session) -> String {
    let slug = s
        .slug
        .as_deref()
        .filter(|slug| !slug.is_empty())
        .unwrap_or_else(|| short_id(&s.id));
    if slug.chars().count() > SLUG_COLUMN_MAX {
        let cut: String = slug.chars().take(SLUG_COLUMN_MAX - 3).collect();
        format!("{}...", cut)
    } else {
        slug.to_string()
    }
}

fn local_time(s: &Session) -> String {
    s.start_time
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M")
        .to_string()
}

/// Print a table of `sessions`, newest first as given.
pub fn list<W: Write>(out: &mut W, sessions: &[Session], opts: &ListOptions) -> Result<()> {
    let matching: Vec<&Session> = sessions.iter().filter(|s| opts.accepts(s)).collect();
    if matching.is_empty() {
        if opts.has_filters() {
            writeln!(out, "No sessions match the filters.")?;
        } else {
            writeln!(out, "No sessions found.")?;
        }
        return Ok(());
    }

    let shown = &matching[..matching.len().min(opts.limit)];
    if opts.has_filters() {
        writeln!(
            out,
            "Found {} sessions ({} shown)",
            sessions.len(),
            matching.len()
        )?;
    } else {
        writeln!(out, "Found {} sessions", sessions.len())?;
    }
    writeln!(out)?;

    let rows: Vec<[String; 6]> = shown
        .iter()
        .map(|s| {
            let tokens = if s.total_tokens == 0 {
                String::new()
            } else {
                format_tokens(s.total_tokens)
            };
            [
                display_slug(s),
                s.project.clone(),
                local_time(s),
                format_duration(s.duration),
                s.turn_count.to_string(),
                tokens,
            ]
        })
        .collect();

    let slug_w = rows.iter().map(|r| r[0].chars().count()).fold(4, usize::max);
    let proj_w = rows.iter().map(|r| r[1].chars().count()).fold(7, usize::max);

    writeln!(
        out,
        "  {:<slug_w$}  {:<proj_w$}  {:<17}  {:>8}  {:>5}  {:>7}",
        "Slug", "Project", "Date", "Duration", "Turns", "Tokens"
    )?;
    writeln!(
        out,
        "  {:<slug_w$}  {:<proj_w$}  {:<17}  {:>8}  {:>5}  {:>7}",
        "----", "-------", "----", "--------", "-----", "------"
    )?;
    for [slug, project, date, duration, turns, tokens] in &rows {
        writeln!(
            out,
            "  {:<slug_w$}  {:<proj_w$}  {:<17}  {:>8}  {:>5}  {:>7}",
            slug, project, date, duration, turns, tokens
        )?;
    }

    if matching.len() > shown.len() {
        writeln!(out)?;
        writeln!(out, "Use --limit to see more sessions")?;
    }
    Ok(())
}

/// Print one session's metadata and either a preview or the whole
/// conversation.
pub fn show<W: Write>(out: &mut W, s: &Session, full: bool) -> Result<()> {
    writeln!(out, "# {}", display_slug(s))?;
    writeln!(out)?;
    writeln!(out, "**ID**: {}", s.id)?;
    writeln!(out, "**Tool**: {}", s.tool)?;
    writeln!(out, "**Project**: {}", s.project)?;
    if let Some(branch) = &s.git_branch {
        writeln!(out, "**Branch**: {}", branch)?;
    }
    if let Some(model) = &s.model {
        writeln!(out, "**Model**: {}", model)?;
    }
    writeln!(out)?;

    writeln!(out, "**Started**: {}", local_time(s))?;
    writeln!(out, "**Duration**: {}", format_duration(s.duration))?;
    writeln!(out, "**Turns**: {}", s.turn_count)?;
    writeln!(out, "**Messages**: {}", s.messages.len())?;
    writeln!(out)?;

    writeln!(out, "**Tokens In**: {}", format_tokens(s.total_tokens_in))?;
    writeln!(out, "**Tokens Out**: {}", format_tokens(s.total_tokens_out))?;
    writeln!(out, "**Total**: {}", format_tokens(s.total_tokens))?;
    writeln!(out)?;

    let counts = s.tool_counts();
    if !counts.is_empty() {
        writeln!(out, "## Tool Usage")?;
        writeln!(out)?;
        for (name, count) in counts {
            writeln!(out, "- {}: {}", name, count)?;
        }
        writeln!(out)?;
    }

    if full {
        writeln!(out, "## Conversation")?;
        writeln!(out)?;
        for (i, msg) in s.non_empty_messages().into_iter().enumerate() {
            write_message(out, i + 1, msg)?;
        }
        return Ok(());
    }

    writeln!(out, "## Conversation Preview")?;
    writeln!(out)?;
    let user_turns: Vec<_> = s.user_messages().filter(|m| !m.text.is_empty()).collect();
    for (i, msg) in user_turns.iter().take(PREVIEW_TURNS).enumerate() {
        writeln!(out, "**[{}] User**: {}", i + 1, msg.preview(PREVIEW_LEN))?;
        writeln!(out)?;
    }
    if user_turns.len() > PREVIEW_TURNS {
        writeln!(out, "... and {} more turns", user_turns.len() - PREVIEW_TURNS)?;
        writeln!(out)?;
    }
    writeln!(out, "Use --full to see all messages")?;
    Ok(())
}
