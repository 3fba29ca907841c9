//! Bookkeeping for the journal directory, persisted as `.state.json`.
//!
//! Tracks which files were exported and which later processing stages they
//! went through, which files belong to which session, and a history of
//! renames. Loaded once per run, saved once at the end.

use crate::utils::write_atomic;
use chrono::Local;
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

pub const STATE_FILE: &str = ".state.json";
pub const CURRENT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalState {
    pub version: u32,
    #[serde(default)]
    pub entries: BTreeMap<String, FileState>,
    /// Session id → journal filenames (base file and parts).
    #[serde(default)]
    pub sessions: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub renames: Vec<RenameRecord>,
}

/// Processing stages of one file; each is the `YYYY-MM-DD` it happened.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exported: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enriched: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fences_verified: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameRecord {
    pub from: String,
    pub to: String,
    pub date: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Exported,
    Enriched,
    Normalized,
    FencesVerified,
}

impl Default for JournalState {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            entries: BTreeMap::new(),
            sessions: BTreeMap::new(),
            renames: Vec::new(),
        }
    }
}

fn today() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

impl JournalState {
    /// Load the state for `journal_dir`.
    ///
    /// Never fails: a missing file gives an empty state, and an unreadable
    /// or corrupt one gives an empty state plus a warning.
    pub fn load(journal_dir: &Path) -> Self {
        let path = journal_dir.join(STATE_FILE);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                tracing::warn!("Could not read {}: {}; starting fresh", path.display(), e);
                return Self::default();
            }
        };
        match serde_json::from_slice::<JournalState>(&data) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!("Ignoring corrupt {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self, journal_dir: &Path) -> Result<()> {
        let mut data =
            serde_json::to_vec_pretty(self).wrap_err("Failed to serialize journal state")?;
        data.push(b'\n');
        write_atomic(&journal_dir.join(STATE_FILE), &data)
    }

    pub fn mark(&mut self, filename: &str, stage: Stage) {
        let entry = self.entries.entry(filename.to_string()).or_default();
        let slot = match stage {
            Stage::Exported => &mut entry.exported,
            Stage::Enriched => &mut entry.enriched,
            Stage::Normalized => &mut entry.normalized,
            Stage::FencesVerified => &mut entry.fences_verified,
        };
        *slot = Some(today());
    }

    pub fn mark_exported(&mut self, filename: &str) {
        self.mark(filename, Stage::Exported);
    }

    pub fn mark_enriched(&mut self, filename: &str) {
        self.mark(filename, Stage::Enriched);
    }

    /// Forget enrichment, e.g. after the front matter was regenerated.
    pub fn clear_enriched(&mut self, filename: &str) {
        if let Some(entry) = self.entries.get_mut(filename) {
            entry.enriched = None;
        }
    }

    /// Whether `filename` has been through `stage`.
    pub fn has_stage(&self, filename: &str, stage: Stage) -> bool {
        let Some(entry) = self.entries.get(filename) else {
            return false;
        };
        match stage {
            Stage::Exported => entry.exported.is_some(),
            Stage::Enriched => entry.enriched.is_some(),
            Stage::Normalized => entry.normalized.is_some(),
            Stage::FencesVerified => entry.fences_verified.is_some(),
        }
    }

    pub fn is_exported(&self, filename: &str) -> bool {
        self.has_stage(filename, Stage::Exported)
    }

    pub fn is_enriched(&self, filename: &str) -> bool {
        self.has_stage(filename, Stage::Enriched)
    }

    pub fn link_session(&mut self, session_id: &str, filename: &str) {
        let files = self.sessions.entry(session_id.to_string()).or_default();
        if !files.iter().any(|f| f == filename) {
            files.push(filename.to_string());
        }
    }

    pub fn session_files(&self, session_id: &str) -> &[String] {
        self.sessions.get(session_id).map_or(&[], Vec::as_slice)
    }

    /// Record that `old` was renamed to `new` on disk.
    pub fn rename(&mut self, old: &str, new: &str) {
        if let Some(entry) = self.entries.remove(old) {
            self.entries.insert(new.to_string(), entry);
        }
        for files in self.sessions.values_mut() {
            for f in files.iter_mut().filter(|f| f.as_str() == old) {
                *f = new.to_string();
            }
        }
        self.renames.push(RenameRecord {
            from: old.to_string(),
            to: new.to_string(),
            date: today(),
        });
    }

    /// Markdown files in `journal_dir` not yet marked enriched.
    pub fn count_unenriched(&self, journal_dir: &Path) -> usize {
        let Ok(entries) = fs::read_dir(journal_dir) else {
            return 0;
        };
        entries
            .flatten()
            .filter(|e| e.file_type().is_ok_and(|t| t.is_file()))
            .filter_map(|e| e.file_name().to_str().map(String::from))
            .filter(|name| name.ends_with(".md") && !self.is_enriched(name))
            .count()
    }
}
