//! Finding transcript sessions on disk and deciding which belong to a project.

use crate::parser::{Session, SessionParser};
use crate::slug::short_id;
use chrono::Local;
use eyre::{Context, Result, eyre};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Directory name holding derivative sessions that duplicate their parent.
const SUBAGENTS_DIR: &str = "subagents";

/// Resolves the `origin` remote URL of a directory's repository.
pub trait RemoteLookup {
    fn remote_url(&self, dir: &Path) -> Option<String>;
}

/// Asks the `git` binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct GitCli;

impl RemoteLookup for GitCli {
    fn remote_url(&self, dir: &Path) -> Option<String> {
        if !dir.is_dir() {
            return None;
        }
        let output = Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(["remote", "get-url", "origin"])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let url = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!url.is_empty()).then_some(url)
    }
}

/// Sessions found by a scan, plus the files that failed to parse.
#[derive(Debug, Default)]
pub struct ScanResult {
    pub sessions: Vec<Session>,
    pub errors: Vec<(PathBuf, eyre::Report)>,
}

pub struct SessionLocator {
    parsers: Vec<Box<dyn SessionParser>>,
    roots: Vec<PathBuf>,
    remote: Box<dyn RemoteLookup>,
}

/// `~/.claude/projects`, where Claude Code keeps its transcripts.
pub fn default_roots() -> Vec<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".claude").join("projects"))
        .into_iter()
        .collect()
}

impl SessionLocator {
    pub fn new(parsers: Vec<Box<dyn SessionParser>>, roots: Vec<PathBuf>) -> Self {
        Self {
            parsers,
            roots,
            remote: Box::new(GitCli),
        }
    }

    pub fn with_remote_lookup(mut self, remote: Box<dyn RemoteLookup>) -> Self {
        self.remote = remote;
        self
    }

    /// Walk every root and parse every transcript.
    ///
    /// Symlinks are not followed. An entry that cannot be read is recorded in
    /// [`ScanResult::errors`] and the walk goes on.
    ///
    /// A session present in several files is kept once, from the file with
    /// the most messages. Sessions are returned newest first.
    pub fn scan(&self) -> Result<ScanResult> {
        let mut result = ScanResult::default();

        for root in self.roots.iter().filter(|r| r.is_dir()) {
            let walker = WalkDir::new(root)
                .into_iter()
                .filter_entry(|e| !(e.file_type().is_dir() && e.file_name() == SUBAGENTS_DIR));

            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    // Only an unreadable root is fatal.
                    Err(e) if e.depth() == 0 => {
                        return Err(e).wrap_err_with(|| format!("Failed to walk {}", root.display()));
                    }
                    Err(e) => {
                        let path = e.path().map_or_else(|| root.clone(), Path::to_path_buf);
                        debug!("{}: {}", path.display(), e);
                        result.errors.push((path, eyre::Report::new(e)));
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = entry.path();
                let Some(parser) = self.parsers.iter().find(|p| p.can_parse(path)) else {
                    continue;
                };
                match parser.parse_file(path) {
                    Ok(sessions) => result.sessions.extend(sessions),
                    Err(e) => {
                        debug!("{}: {:#}", path.display(), e);
                        result.errors.push((path.to_path_buf(), e));
                    }
                }
            }
        }

        result.sessions = dedupe(result.sessions);
        result
            .sessions
            .sort_by(|a, b| b.start_time.cmp(&a.start_time).then_with(|| a.id.cmp(&b.id)));
        Ok(result)
    }

    /// Sessions from every project.
    pub fn find_sessions(&self) -> Result<Vec<Session>> {
        let scan = self.scan()?;
        report_errors(&scan.errors);
        Ok(scan.sessions)
    }

    /// Sessions that belong to the project at `cwd`.
    ///
    /// A session matches when its repository has the same git remote, or its
    /// working directory is the same path relative to the user's home, or it
    /// is exactly the same directory. The first tier that matches wins.
    pub fn find_sessions_for_cwd(&self, cwd: &Path) -> Result<Vec<Session>> {
        let scan = self.scan()?;
        report_errors(&scan.errors);
        let mut matcher = ProjectMatcher::new(cwd, self.remote.as_ref());
        Ok(scan
            .sessions
            .into_iter()
            .filter(|s| matcher.matches(&s.cwd))
            .collect())
    }
}

fn report_errors(errors: &[(PathBuf, eyre::Report)]) {
    for (path, e) in errors {
        warn!("Skipping {}: {:#}", path.display(), e);
    }
}

fn dedupe(sessions: Vec<Session>) -> Vec<Session> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<Session> = Vec::with_capacity(sessions.len());
    for s in sessions {
        match index.get(&s.id) {
            Some(&i) => {
                if s.messages.len() > out[i].messages.len() {
                    out[i] = s;
                }
            }
            None => {
                index.insert(s.id.clone(), out.len());
                out.push(s);
            }
        }
    }
    out
}

/// Tiered project identity check against one target directory.
pub struct ProjectMatcher<'a> {
    cwd: String,
    remote: Option<String>,
    home_relative: Option<String>,
    lookup: &'a dyn RemoteLookup,
    cache: HashMap<String, Option<String>>,
}

impl<'a> ProjectMatcher<'a> {
    pub fn new(cwd: &Path, lookup: &'a dyn RemoteLookup) -> Self {
        let cwd_str = cwd.to_string_lossy().into_owned();
        Self {
            remote: lookup.remote_url(cwd),
            home_relative: home_relative(&cwd_str),
            cwd: cwd_str,
            lookup,
            cache: HashMap::new(),
        }
    }

    pub fn matches(&mut self, session_cwd: &str) -> bool {
        if let Some(remote) = self.remote.as_deref()
            && !session_cwd.is_empty()
        {
            let lookup = self.lookup;
            let session_remote = self
                .cache
                .entry(session_cwd.to_string())
                .or_insert_with(|| lookup.remote_url(Path::new(session_cwd)));
            if session_remote.as_deref() == Some(remote) {
                return true;
            }
        }

        if let Some(rel) = self.home_relative.as_deref()
            && home_relative(session_cwd).as_deref() == Some(rel)
        {
            return true;
        }

        session_cwd == self.cwd
    }
}

/// Path with the `/home/<user>/` or `/Users/<user>/` prefix removed.
///
/// `None` outside a home directory and for the home directory itself.
pub fn home_relative(path: &str) -> Option<String> {
    let rest = ["/home/", "/Users/"]
        .iter()
        .find_map(|prefix| path.strip_prefix(prefix))?;
    let (_user, rel) = rest.split_once('/')?;
    let rel = rel.trim_end_matches('/');
    (!rel.is_empty()).then(|| rel.to_string())
}

/// Pick one session by case-insensitive id prefix or slug substring.
pub fn select_session<'s>(sessions: &'s [Session], query: &str) -> Result<&'s Session> {
    let q = query.to_lowercase();
    let matches: Vec<&Session> = sessions
        .iter()
        .filter(|s| {
            s.id.to_lowercase().starts_with(&q)
                || s.slug.as_deref().is_some_and(|slug| slug.to_lowercase().contains(&q))
        })
        .collect();

    match matches.as_slice() {
        [] => Err(eyre!("session not found: {}", query)),
        [one] => Ok(*one),
        many => {
            let mut msg = format!("Multiple sessions match '{}':\n", query);
            for s in many {
                let _ = writeln!(
                    msg,
                    "  {} ({}) - {}",
                    s.slug.as_deref().unwrap_or("-"),
                    short_id(&s.id),
                    s.start_time.with_timezone(&Local).format("%Y-%m-%d %H:%M")
                );
            }
            msg.push_str("ambiguous query, use a more specific ID");
            Err(eyre!(msg))
        }
    }
}
