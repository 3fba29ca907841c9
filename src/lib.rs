//! # transcript-journal
//!
//! A CLI tool that turns AI coding-assistant session transcripts into
//! human-editable Markdown journal files.
//!
//! ## What it does
//!
//! Claude Code appends every conversation to JSON Lines files under
//! `~/.claude/projects`. This tool walks those files, rebuilds each session,
//! keeps the ones that belong to the current project, and writes each one as
//! `YYYY-MM-DD-<slug>-<short id>.md` with YAML front matter. Long sessions
//! are split into linked parts of 200 messages.
//!
//! Transcripts are only ever read.
//!
//! ## Project matching
//!
//! A session belongs to the current project when, in order: both
//! directories report the same `origin` git remote, their paths relative to
//! the user's home directory are equal, or the working directories are
//! identical. The middle tier lets journals follow a checkout across
//! machines and user names.
//!
//! ## Incremental export
//!
//! Existing journal files are skipped on repeated runs. `--regenerate`
//! rewrites their bodies but keeps the front matter, so titles, tags and
//! summaries added by hand survive. When a stored title changes, the files
//! are renamed to match and the rename is recorded in `.state.json`.
//!
//! ## Usage
//!
//! ```sh
//! # Export every session of the current project
//! transcript-journal export --all
//!
//! # Re-render existing files, keeping their front matter
//! transcript-journal export --all --regenerate
//!
//! # Export a single session by ID prefix
//! transcript-journal export abc12345
//!
//! # Browse sessions from all projects
//! transcript-journal list --all-projects
//! ```
//!
//! Preferences can be persisted in `~/.config/transcript-journal/config.toml`.

pub mod listing;
pub mod locator;
pub mod parser;
pub mod process;
pub mod renderer;
pub mod slug;
pub mod state;
pub mod utils;
