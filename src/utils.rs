use chrono::TimeDelta;
use eyre::{Context, Result};
use std::borrow::Cow;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Configuration required to run the export process.
/// This decouples the logic from how the arguments were parsed (CLI/Config file).
#[derive(Clone, Debug, Default)]
pub struct ExportConfig {
    pub journal_dir: PathBuf,
    /// Export every matching session instead of a single queried one.
    pub all: bool,
    pub all_projects: bool,
    /// Rewrite existing files and discard their front matter.
    pub force: bool,
    /// Rewrite existing files, keeping their front matter.
    pub regenerate: bool,
    /// Skip the confirmation prompt.
    pub yes: bool,
    pub dry_run: bool,
    pub quiet: bool,
}

/// Outcome for one journal file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessResult {
    Created,
    /// Rewritten with the existing front matter kept.
    Updated,
    /// Rewritten from scratch (`--force`).
    Overwritten,
    /// Regenerated content matched the file byte for byte; nothing written.
    Unchanged,
    Skipped,
    Failed,
}

/// Decode bytes as UTF-8, replacing each invalid sequence with `...`.
///
/// Transcripts written by a crashed process can end mid-character.
pub fn sanitize_utf8(bytes: &[u8]) -> Cow<'_, str> {
    if let Ok(s) = std::str::from_utf8(bytes) {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        out.push_str(chunk.valid());
        if !chunk.invalid().is_empty() {
            out.push_str("...");
        }
    }
    Cow::Owned(out)
}

/// Write a file via a sibling temp file and rename, so readers never see a
/// partial write.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)
        .wrap_err_with(|| format!("Failed to create temp file in {}", dir.display()))?;
    tmp.write_all(contents)
        .wrap_err_with(|| format!("Failed to write {}", path.display()))?;
    tmp.flush()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o644))
            .wrap_err("Failed to set file permissions")?;
    }
    tmp.persist(path)
        .map_err(|e| e.error)
        .wrap_err_with(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

// ── Front matter ──────────────────────────────────────────────────────────────

/// The leading `---` … `---` block, including both delimiter lines and the
/// closing line's newline. Returned exactly as it appears in `content`.
pub fn extract_frontmatter(content: &str) -> Option<&str> {
    let rest = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))?;
    let mut offset = content.len() - rest.len();
    for line in rest.split_inclusive('\n') {
        offset += line.len();
        if line.trim_end() == "---" {
            return Some(&content[..offset]);
        }
    }
    None
}

/// Everything after the front-matter block, without leading blank lines.
pub fn strip_frontmatter(content: &str) -> &str {
    match extract_frontmatter(content) {
        Some(fm) => content[fm.len()..].trim_start_matches(['\n', '\r']),
        None => content,
    }
}

/// Put `frontmatter` on top of `body`, separated by one blank line.
pub fn join_frontmatter(frontmatter: &str, body: &str) -> String {
    let mut out = String::with_capacity(frontmatter.len() + body.len() + 2);
    out.push_str(frontmatter);
    if !frontmatter.ends_with('\n') {
        out.push('\n');
    }
    out.push('\n');
    out.push_str(body);
    out
}

/// Read a scalar field from the front matter.
///
/// Parses the block as YAML; a block a human broke by hand falls back to a
/// line scan for `key: value`.
pub fn frontmatter_field(content: &str, key: &str) -> Option<String> {
    let block = extract_frontmatter(content)?;
    let inner: String = block
        .split_inclusive('\n')
        .skip(1)
        .take_while(|l| l.trim_end() != "---")
        .collect();

    match serde_yaml::from_str::<serde_yaml::Mapping>(&inner) {
        Ok(map) => match map.get(key)? {
            serde_yaml::Value::String(s) => Some(s.clone()),
            serde_yaml::Value::Number(n) => Some(n.to_string()),
            serde_yaml::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        },
        Err(_) => inner.lines().find_map(|line| {
            let rest = line.strip_prefix(key)?.strip_prefix(':')?;
            Some(rest.trim().trim_matches('\'').trim_matches('"').to_string())
        }),
    }
    .filter(|v| !v.is_empty())
}

/// Read an existing journal file (sanitized) for front-matter inspection.
pub fn read_journal_file(path: &Path) -> Option<String> {
    let bytes = fs::read(path).ok()?;
    Some(sanitize_utf8(&bytes).into_owned())
}

// ── Display formatting ────────────────────────────────────────────────────────

/// Human-readable duration: `<1m`, `5m`, `2h`, `1h30m`.
pub fn format_duration(d: TimeDelta) -> String {
    let mins = d.num_minutes();
    if mins < 1 {
        return "<1m".to_string();
    }
    if mins < 60 {
        return format!("{}m", mins);
    }
    let (hours, rem) = (mins / 60, mins % 60);
    if rem == 0 {
        format!("{}h", hours)
    } else {
        format!("{}h{}m", hours, rem)
    }
}

/// Human-readable token count: `500`, `1.5K`, `2.3M`.
pub fn format_tokens(tokens: u64) -> String {
    if tokens < 1_000 {
        tokens.to_string()
    } else if tokens < 1_000_000 {
        format!("{:.1}K", tokens as f64 / 1_000.0)
    } else {
        format!("{:.1}M", tokens as f64 / 1_000_000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "---\ndate: \"2026-01-20\"\ntitle: \"Fix auth\"\ntags:\n  - enriched\n---\n\n# Fix auth\n\nBody\n";

    #[test]
    fn frontmatter_block_is_exact() {
        let fm = extract_frontmatter(DOC).unwrap();
        assert_eq!(
            fm,
            "---\ndate: \"2026-01-20\"\ntitle: \"Fix auth\"\ntags:\n  - enriched\n---\n"
        );
        assert_eq!(strip_frontmatter(DOC), "# Fix auth\n\nBody\n");
        assert_eq!(join_frontmatter(fm, strip_frontmatter(DOC)), DOC);
    }

    #[test]
    fn no_frontmatter() {
        assert!(extract_frontmatter("# Title\n\n---\n").is_none());
        assert!(extract_frontmatter("---\nunterminated: true\n").is_none());
        assert_eq!(strip_frontmatter("# Title\n"), "# Title\n");
    }

    #[test]
    fn reads_fields() {
        assert_eq!(frontmatter_field(DOC, "title").as_deref(), Some("Fix auth"));
        assert_eq!(frontmatter_field(DOC, "date").as_deref(), Some("2026-01-20"));
        assert!(frontmatter_field(DOC, "tags").is_none());
        assert!(frontmatter_field(DOC, "missing").is_none());
        assert!(frontmatter_field("no front matter", "title").is_none());
    }

    #[test]
    fn broken_yaml_falls_back_to_line_scan() {
        let doc = "---\ntitle: 'Quoted: title'\nbad: [unclosed\n---\nbody";
        assert_eq!(frontmatter_field(doc, "title").as_deref(), Some("Quoted: title"));
    }

    #[test]
    fn sanitize_replaces_invalid_sequences() {
        assert_eq!(sanitize_utf8(b"plain"), "plain");
        assert_eq!(sanitize_utf8(b"caf\xC3"), "caf...");
        assert_eq!(sanitize_utf8(b"a\xFF\xFEb"), "a......b");
    }

    #[test]
    fn writes_atomically() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("out.md");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "two");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn durations() {
        assert_eq!(format_duration(TimeDelta::seconds(30)), "<1m");
        assert_eq!(format_duration(TimeDelta::minutes(5)), "5m");
        assert_eq!(format_duration(TimeDelta::minutes(120)), "2h");
        assert_eq!(format_duration(TimeDelta::minutes(90)), "1h30m");
    }

    #[test]
    fn tokens() {
        assert_eq!(format_tokens(500), "500");
        assert_eq!(format_tokens(1_500), "1.5K");
        assert_eq!(format_tokens(2_300_000), "2.3M");
    }
}
