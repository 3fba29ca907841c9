//! The export loop: plan which journal files to write, rename files whose
//! title changed, render and write pages, update the state store.
//!
//! Everything runs sequentially. Each page is rendered in memory and written
//! atomically, so an interrupted run leaves only complete files behind.

use crate::parser::{Message, Session};
use crate::renderer::{self, Page};
use crate::slug::{journal_filename, part_filename, short_id, title_slug};
use crate::state::JournalState;
use crate::utils::{
    ExportConfig, ProcessResult, extract_frontmatter, frontmatter_field, join_frontmatter,
    read_journal_file, strip_frontmatter, write_atomic,
};
use eyre::{Context, Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Maximum messages rendered into one journal file.
pub const MAX_MESSAGES_PER_PART: usize = 200;

static PART_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-p\d+\.md$").expect("static regex"));

/// Check the export flag combination.
pub fn validate_flags(session: Option<&str>, config: &ExportConfig) -> Result<()> {
    if session.is_some() && config.all {
        return Err(eyre!("cannot use --all with a session ID; use one or the other"));
    }
    if config.regenerate && !config.all {
        return Err(eyre!(
            "--regenerate requires --all (single-session export always writes)"
        ));
    }
    Ok(())
}

// ── Session index ─────────────────────────────────────────────────────────────

/// Which journal file (part 1) belongs to which session.
#[derive(Debug, Default)]
pub struct SessionIndex {
    by_id: HashMap<String, String>,
    by_short_id: HashMap<String, String>,
}

impl SessionIndex {
    /// Index the journal directory.
    ///
    /// Sources, strongest first: the `session_id` front-matter field of base
    /// files, the state store's session mapping, then the short id at the
    /// end of a filename.
    pub fn build(journal_dir: &Path, state: &JournalState) -> Self {
        let mut index = Self::default();
        let Ok(entries) = fs::read_dir(journal_dir) else {
            return index;
        };

        let mut names: Vec<String> = entries
            .flatten()
            .filter(|e| e.file_type().is_ok_and(|t| t.is_file()))
            .filter_map(|e| e.file_name().to_str().map(String::from))
            .filter(|name| name.ends_with(".md") && !PART_SUFFIX.is_match(name))
            .collect();
        names.sort();

        for name in &names {
            let Some(content) = read_journal_file(&journal_dir.join(name)) else {
                continue;
            };
            if let Some(id) = frontmatter_field(&content, "session_id") {
                index.by_id.entry(id).or_insert_with(|| name.clone());
            }
        }

        for id in state.sessions.keys() {
            let base = state
                .session_files(id)
                .iter()
                .find(|f| !PART_SUFFIX.is_match(f) && journal_dir.join(f).is_file());
            if let Some(base) = base {
                index.by_id.entry(id.clone()).or_insert_with(|| base.clone());
            }
        }

        for name in names {
            let stem = name.trim_end_matches(".md");
            if let Some((_, short)) = stem.rsplit_once('-') {
                index.by_short_id.entry(short.to_string()).or_insert(name);
            }
        }

        index
    }

    /// Part-1 filename of a previous export of `session_id`.
    pub fn lookup(&self, session_id: &str) -> Option<&str> {
        self.by_id
            .get(session_id)
            .or_else(|| self.by_short_id.get(short_id(session_id)))
            .map(String::as_str)
    }
}

// ── Planning ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportAction {
    /// File does not exist yet.
    New,
    /// File exists and will be rewritten.
    Regenerate,
    /// File exists and is left alone.
    Skip,
}

/// Move a previous export to a new base name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameOp {
    pub old_base: String,
    pub new_base: String,
}

#[derive(Debug, Clone)]
pub struct PartPlan {
    pub filename: String,
    pub path: PathBuf,
    pub part: usize,
    pub start: usize,
    pub end: usize,
    pub action: ExportAction,
}

#[derive(Debug)]
pub struct SessionPlan<'a> {
    pub session: &'a Session,
    pub messages: Vec<&'a Message>,
    pub slug: String,
    pub title: String,
    pub base_name: String,
    pub rename: Option<RenameOp>,
    pub parts: Vec<PartPlan>,
}

#[derive(Debug, Default)]
pub struct ExportPlan<'a> {
    pub sessions: Vec<SessionPlan<'a>>,
    pub new_count: usize,
    pub regen_count: usize,
    /// Regenerated only because the session was renamed; never prompted for.
    pub retitle_count: usize,
    pub skip_count: usize,
}

impl ExportPlan<'_> {
    pub fn renames(&self) -> impl Iterator<Item = &RenameOp> {
        self.sessions.iter().filter_map(|s| s.rename.as_ref())
    }

    pub fn total_files(&self) -> usize {
        self.new_count + self.regen_count + self.skip_count
    }

    /// `Would export 2 new, skip 1 existing.` / `Nothing to export.`
    pub fn summary_line(&self, dry_run: bool) -> String {
        let mut parts = Vec::new();
        if self.new_count > 0 {
            parts.push(format!("export {} new", self.new_count));
        }
        if self.regen_count > 0 {
            parts.push(format!("regenerate {} existing", self.regen_count));
        }
        if self.skip_count > 0 {
            parts.push(format!("skip {} existing", self.skip_count));
        }
        if parts.is_empty() {
            return "Nothing to export.".to_string();
        }
        let verb = if dry_run { "Would" } else { "Will" };
        format!("{} {}.", verb, parts.join(", "))
    }
}

/// Decide what happens to every page of every session, without touching disk.
///
/// A page counts as existing when its file exists under the new name, or
/// under the old name of a pending rename. Existing pages of a renamed
/// session are always regenerated so their links follow the new name.
pub fn plan_export<'a>(
    sessions: &'a [Session],
    journal_dir: &Path,
    index: &SessionIndex,
    config: &ExportConfig,
    single_session: bool,
) -> ExportPlan<'a> {
    let mut plan = ExportPlan::default();

    for session in sessions {
        let messages = session.non_empty_messages();
        let num_parts = messages.len().div_ceil(MAX_MESSAGES_PER_PART).max(1);

        let previous = index.lookup(&session.id);
        let existing_title = previous
            .and_then(|f| read_journal_file(&journal_dir.join(f)))
            .and_then(|content| frontmatter_field(&content, "title"));
        let (slug, title) = title_slug(session, existing_title.as_deref());

        let base_filename = journal_filename(session, &slug);
        let base_name = base_filename.trim_end_matches(".md").to_string();

        let rename = previous
            .map(|f| f.trim_end_matches(".md"))
            .filter(|old| *old != base_name)
            .map(|old| RenameOp {
                old_base: old.to_string(),
                new_base: base_name.clone(),
            });

        let mut parts = Vec::with_capacity(num_parts);
        for part in 1..=num_parts {
            let filename = part_filename(&base_name, part);
            let path = journal_dir.join(&filename);
            let start = (part - 1) * MAX_MESSAGES_PER_PART;
            let end = (start + MAX_MESSAGES_PER_PART).min(messages.len());

            let exists = path.exists()
                || rename
                    .as_ref()
                    .is_some_and(|r| journal_dir.join(part_filename(&r.old_base, part)).exists());

            let action = if !exists {
                plan.new_count += 1;
                ExportAction::New
            } else if single_session || config.regenerate || config.force {
                plan.regen_count += 1;
                ExportAction::Regenerate
            } else if rename.is_some() {
                // Navigation links and headings name the old base.
                plan.regen_count += 1;
                plan.retitle_count += 1;
                ExportAction::Regenerate
            } else {
                plan.skip_count += 1;
                ExportAction::Skip
            };

            parts.push(PartPlan {
                filename,
                path,
                part,
                start,
                end,
                action,
            });
        }

        plan.sessions.push(SessionPlan {
            session,
            messages,
            slug,
            title,
            base_name,
            rename,
            parts,
        });
    }

    plan
}

// ── Execution ─────────────────────────────────────────────────────────────────

/// Rename `old.md`, `old-p2.md`, … to the new base name, recording each move
/// in `state`. Returns the number of files moved.
pub fn rename_journal_files(
    journal_dir: &Path,
    op: &RenameOp,
    state: &mut JournalState,
    pb: &ProgressBar,
) -> usize {
    let mut moved = 0;
    for part in 1.. {
        let old_name = part_filename(&op.old_base, part);
        let old_path = journal_dir.join(&old_name);
        if !old_path.exists() {
            // Part 1 may be gone while later parts remain.
            if part == 1 {
                continue;
            }
            break;
        }
        let new_name = part_filename(&op.new_base, part);
        let new_path = journal_dir.join(&new_name);
        if new_path.exists() {
            pb.println(format!("Warning: could not rename {} → {}: target exists", old_name, new_name));
            continue;
        }
        match fs::rename(&old_path, &new_path) {
            Ok(()) => {
                state.rename(&old_name, &new_name);
                pb.println(format!("Renamed:   {} → {}", old_name, new_name));
                moved += 1;
            }
            Err(e) => {
                pb.println(format!("Warning: could not rename {} → {}: {}", old_name, new_name, e));
            }
        }
    }
    moved
}

/// Counters for one export run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub created: usize,
    pub updated: usize,
    pub overwritten: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Sessions moved to a new base name.
    pub renamed: usize,
    /// Every file touched, in processing order.
    pub files: Vec<(String, ProcessResult)>,
}

impl ExportSummary {
    fn record(&mut self, filename: &str, result: ProcessResult) {
        match result {
            ProcessResult::Created => self.created += 1,
            ProcessResult::Updated => self.updated += 1,
            ProcessResult::Overwritten => self.overwritten += 1,
            ProcessResult::Unchanged => self.unchanged += 1,
            ProcessResult::Skipped => self.skipped += 1,
            ProcessResult::Failed => self.failed += 1,
        }
        self.files.push((filename.to_string(), result));
    }

    pub fn result_for(&self, filename: &str) -> Option<ProcessResult> {
        self.files
            .iter()
            .find(|(f, _)| f == filename)
            .map(|(_, r)| *r)
    }

    /// Closing report, one line per non-zero counter.
    pub fn report(&self, journal_dir: &Path) -> Vec<String> {
        let mut lines = Vec::new();
        let exported = self.created + self.overwritten;
        if exported > 0 {
            lines.push(format!(
                "Exported {} new session(s) to {}",
                exported,
                journal_dir.display()
            ));
        }
        if self.updated > 0 {
            lines.push(format!(
                "Updated {} existing session(s) (YAML frontmatter preserved)",
                self.updated
            ));
        }
        if self.renamed > 0 {
            lines.push(format!(
                "Renamed {} session(s) to title-based filenames",
                self.renamed
            ));
        }
        if self.unchanged > 0 {
            lines.push(format!("{} file(s) already up to date.", self.unchanged));
        }
        if self.skipped > 0 {
            lines.push(format!("Skipped {} existing file(s).", self.skipped));
        }
        if self.failed > 0 {
            lines.push(format!("Completed with {} error(s).", self.failed));
        }
        lines
    }
}

fn export_page(
    sp: &SessionPlan,
    pp: &PartPlan,
    total_parts: usize,
    state: &mut JournalState,
    config: &ExportConfig,
) -> Result<ProcessResult> {
    let page = Page {
        session: sp.session,
        messages: &sp.messages[pp.start..pp.end],
        start_index: pp.start,
        part: pp.part,
        total_parts,
        base_name: &sp.base_name,
        title: &sp.title,
    };
    let render = || {
        renderer::render_page(&page).wrap_err_with(|| format!("Failed to render {}", pp.filename))
    };

    let (content, result, existing) = match pp.action {
        ExportAction::Skip => return Ok(ProcessResult::Skipped),
        ExportAction::New => (render()?, ProcessResult::Created, None),
        ExportAction::Regenerate => {
            let rendered = render()?;
            let existing = read_journal_file(&pp.path);
            if config.force {
                state.clear_enriched(&pp.filename);
                (rendered, ProcessResult::Overwritten, existing)
            } else {
                let content = match existing.as_deref().and_then(extract_frontmatter) {
                    Some(fm) => join_frontmatter(fm, strip_frontmatter(&rendered)),
                    None => rendered,
                };
                (content, ProcessResult::Updated, existing)
            }
        }
    };

    if existing.as_deref() == Some(content.as_str()) {
        if !state.is_exported(&pp.filename) {
            state.mark_exported(&pp.filename);
        }
        return Ok(ProcessResult::Unchanged);
    }

    write_atomic(&pp.path, content.as_bytes())?;
    state.mark_exported(&pp.filename);
    Ok(result)
}

/// Write every non-skipped page of the plan.
pub fn execute_plan(
    plan: &ExportPlan,
    state: &mut JournalState,
    config: &ExportConfig,
    pb: &ProgressBar,
) -> ExportSummary {
    let mut summary = ExportSummary::default();

    for sp in &plan.sessions {
        let total_parts = sp.parts.len();
        for pp in &sp.parts {
            let result = match export_page(sp, pp, total_parts, state, config) {
                Ok(result) => result,
                Err(e) => {
                    pb.println(format!("Error [{}]: {:#}", short_id(&sp.session.id), e));
                    ProcessResult::Failed
                }
            };
            match result {
                ProcessResult::Created => pb.println(format!("Created:   {}", pp.filename)),
                ProcessResult::Updated => {
                    pb.println(format!("Updated:   {} (frontmatter preserved)", pp.filename))
                }
                ProcessResult::Overwritten => pb.println(format!("Replaced:  {}", pp.filename)),
                ProcessResult::Unchanged => pb.println(format!("Unchanged: {}", pp.filename)),
                ProcessResult::Skipped => pb.println(format!("Skipped:   {} (exists)", pp.filename)),
                ProcessResult::Failed => {}
            }
            if result != ProcessResult::Failed {
                state.link_session(&sp.session.id, &pp.filename);
            }
            summary.record(&pp.filename, result);
            pb.inc(1);
        }
    }

    summary
}

/// How an export run ended.
#[derive(Debug)]
pub enum ExportOutcome {
    /// Nothing written; carries the plan summary line.
    DryRun(String),
    /// The user declined the confirmation prompt.
    Aborted,
    Done(ExportSummary),
}

fn progress_bar(total: u64, quiet: bool) -> Result<ProgressBar> {
    if quiet {
        return Ok(ProgressBar::hidden());
    }
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({percent}%)")
            .wrap_err("Invalid progress bar template")?
            .progress_chars("=>-"),
    );
    Ok(bar)
}

/// Export `sessions` into `config.journal_dir`.
///
/// `single_session` is set when the user asked for one session by id; such
/// an export always rewrites an existing file and never prompts. `confirm`
/// is asked before regenerating existing files in `--all` mode unless
/// `config.yes` is set.
pub fn run_export<F>(
    sessions: &[Session],
    config: &ExportConfig,
    single_session: bool,
    confirm: F,
) -> Result<ExportOutcome>
where
    F: FnOnce(&ExportPlan) -> Result<bool>,
{
    let journal_dir = &config.journal_dir;

    // 1. Load state and index previous exports
    let mut state = JournalState::load(journal_dir);
    let index = SessionIndex::build(journal_dir, &state);

    // 2. Plan
    let plan = plan_export(sessions, journal_dir, &index, config, single_session);

    // 3. Dry run stops here, before anything is renamed
    if config.dry_run {
        return Ok(ExportOutcome::DryRun(plan.summary_line(true)));
    }

    fs::create_dir_all(journal_dir).wrap_err_with(|| {
        format!(
            "Failed to create journal directory: {}",
            journal_dir.display()
        )
    })?;

    let pb = progress_bar(plan.total_files() as u64, config.quiet)?;

    // 4. Renames go first so regenerated pages land on the new names
    let mut renamed = 0;
    for op in plan.renames() {
        if rename_journal_files(journal_dir, op, &mut state, &pb) > 0 {
            renamed += 1;
        }
    }

    // 5. Confirm before rewriting existing files in bulk
    if plan.regen_count > plan.retitle_count && !config.yes && !single_session {
        let proceed = pb.suspend(|| confirm(&plan))?;
        if !proceed {
            pb.finish_and_clear();
            save_state(&state, journal_dir);
            return Ok(ExportOutcome::Aborted);
        }
    }

    // 6. Write
    let mut summary = execute_plan(&plan, &mut state, config, &pb);
    summary.renamed = renamed;
    pb.finish_and_clear();

    // 7. Persist state once
    save_state(&state, journal_dir);

    Ok(ExportOutcome::Done(summary))
}

fn save_state(state: &JournalState, journal_dir: &Path) {
    if let Err(e) = state.save(journal_dir) {
        tracing::warn!("Failed to save journal state: {:#}", e);
    }
}
