#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use transcript_journal::locator::{RemoteLookup, SessionLocator};
use transcript_journal::parser::{ClaudeCodeParser, Session};
use transcript_journal::utils::ExportConfig;

/// Remote lookup backed by a fixed table.
pub struct FakeRemotes(pub Vec<(String, String)>);

impl RemoteLookup for FakeRemotes {
    fn remote_url(&self, dir: &Path) -> Option<String> {
        self.0
            .iter()
            .find(|(d, _)| Path::new(d) == dir)
            .map(|(_, url)| url.clone())
    }
}

fn json_line(session: &str, kind: &str, seconds: usize, cwd: &str, text: &str) -> String {
    let ts = chrono::DateTime::parse_from_rfc3339("2026-01-20T10:00:00Z")
        .unwrap()
        .with_timezone(&chrono::Utc)
        + chrono::TimeDelta::seconds(seconds as i64);
    serde_json::json!({
        "uuid": format!("{}-{}", session, seconds),
        "sessionId": session,
        "type": kind,
        "timestamp": ts.to_rfc3339(),
        "cwd": cwd,
        "gitBranch": "main",
        "slug": "gleaming-wobbling-sutherland",
        "message": {
            "role": kind,
            "content": text,
        },
    })
    .to_string()
}

/// Write a transcript of `n` alternating user/assistant messages. The first
/// user message is `first`.
pub fn write_transcript(root: &Path, session: &str, cwd: &str, first: &str, n: usize) -> PathBuf {
    let lines: Vec<String> = (0..n)
        .map(|i| {
            let kind = if i % 2 == 0 { "user" } else { "assistant" };
            let text = if i == 0 {
                first.to_string()
            } else {
                format!("message {}", i)
            };
            json_line(session, kind, i, cwd, &text)
        })
        .collect();
    let path = root.join("-project").join(format!("{}.jsonl", session));
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, lines.join("\n") + "\n").unwrap();
    path
}

pub fn locator(root: &Path, remotes: Vec<(&str, &str)>) -> SessionLocator {
    let remotes = remotes
        .into_iter()
        .map(|(d, u)| (d.to_string(), u.to_string()))
        .collect();
    SessionLocator::new(vec![Box::new(ClaudeCodeParser::new())], vec![root.to_path_buf()])
        .with_remote_lookup(Box::new(FakeRemotes(remotes)))
}

pub fn sessions(root: &Path) -> Vec<Session> {
    locator(root, Vec::new()).find_sessions().unwrap()
}

pub fn config(journal_dir: &Path) -> ExportConfig {
    ExportConfig {
        journal_dir: journal_dir.to_path_buf(),
        all: true,
        quiet: true,
        ..Default::default()
    }
}

/// Markdown files in `dir`, sorted by stem so part 1 precedes `-p2`.
pub fn journal_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .flatten()
        .filter_map(|e| e.file_name().to_str().map(String::from))
        .filter(|n| n.ends_with(".md"))
        .collect();
    names.sort_by(|a, b| a.trim_end_matches(".md").cmp(b.trim_end_matches(".md")));
    names
}
