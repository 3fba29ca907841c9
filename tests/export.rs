mod common;

use common::{config, journal_files, sessions, write_transcript};
use std::fs;
use tempfile::TempDir;
use transcript_journal::locator::select_session;
use transcript_journal::process::{ExportOutcome, ExportSummary, run_export};
use transcript_journal::state::JournalState;
use transcript_journal::utils::{ExportConfig, ProcessResult, frontmatter_field};

const ID: &str = "1f2e3d4c-aaaa-bbbb-cccc-000000000001";

fn export(
    root: &std::path::Path,
    cfg: &ExportConfig,
    single: Option<&str>,
) -> ExportSummary {
    let all = sessions(root);
    let outcome = match single {
        Some(q) => {
            let s = select_session(&all, q).unwrap();
            run_export(std::slice::from_ref(s), cfg, true, |_| Ok(true)).unwrap()
        }
        None => run_export(&all, cfg, false, |_| Ok(true)).unwrap(),
    };
    match outcome {
        ExportOutcome::Done(summary) => summary,
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[test]
fn second_run_skips_and_leaves_bytes_alone() {
    let transcripts = TempDir::new().unwrap();
    let journal = TempDir::new().unwrap();
    write_transcript(transcripts.path(), ID, "/work/proj", "Fix the login bug", 4);
    let cfg = config(journal.path());

    let first = export(transcripts.path(), &cfg, None);
    assert_eq!(first.created, 1);
    let files = journal_files(journal.path());
    assert_eq!(files.len(), 1);
    assert!(files[0].ends_with("-fix-the-login-bug-1f2e3d4c.md"));
    let before = fs::read(journal.path().join(&files[0])).unwrap();

    let second = export(transcripts.path(), &cfg, None);
    assert_eq!(second.created, 0);
    assert_eq!(second.skipped, 1);
    assert_eq!(journal_files(journal.path()), files);
    assert_eq!(fs::read(journal.path().join(&files[0])).unwrap(), before);

    let state = JournalState::load(journal.path());
    assert!(state.is_exported(&files[0]));
    assert_eq!(state.session_files(ID), [files[0].clone()]);
}

#[test]
fn long_sessions_are_split_with_navigation() {
    let transcripts = TempDir::new().unwrap();
    let journal = TempDir::new().unwrap();
    write_transcript(transcripts.path(), ID, "/work/proj", "Big refactor", 450);

    let summary = export(transcripts.path(), &config(journal.path()), None);
    assert_eq!(summary.created, 3);

    let files = journal_files(journal.path());
    assert_eq!(files.len(), 3);
    let base = files[0].trim_end_matches(".md").to_string();
    assert_eq!(files[1], format!("{}-p2.md", base));
    assert_eq!(files[2], format!("{}-p3.md", base));

    let p1 = fs::read_to_string(journal.path().join(&files[0])).unwrap();
    let p2 = fs::read_to_string(journal.path().join(&files[1])).unwrap();
    let p3 = fs::read_to_string(journal.path().join(&files[2])).unwrap();

    assert!(p1.starts_with("---\n"));
    assert_eq!(frontmatter_field(&p1, "parts").as_deref(), Some("3"));
    assert!(p1.contains(&format!("**Part 1 of 3** | [Next →]({}-p2.md)", base)));
    assert!(!p1.contains("← Previous"));
    assert!(!p1.contains("continued from"));
    assert!(p1.contains("## Summary"));
    assert!(p1.contains("### 200. "));
    assert!(!p1.contains("### 201. "));

    assert!(p2.starts_with("# Big refactor\n"));
    assert!(p2.contains(&format!(
        "**Part 2 of 3** | [← Previous]({}.md) | [Next →]({}-p3.md)",
        base, base
    )));
    assert!(p2.contains("## Conversation (continued from part 1)"));
    assert!(p2.contains("### 201. "));

    assert!(p3.contains(&format!("**Part 3 of 3** | [← Previous]({}-p2.md)", base)));
    assert!(p3.contains("## Conversation (continued from part 2)"));
    assert!(!p3.contains("Next →"));
    assert!(!p3.contains("## Summary"));
    assert!(p3.contains("### 450. "));
}

#[test]
fn regenerate_keeps_edited_frontmatter() {
    let transcripts = TempDir::new().unwrap();
    let journal = TempDir::new().unwrap();
    write_transcript(transcripts.path(), ID, "/work/proj", "Fix the login bug", 2);
    let mut cfg = config(journal.path());
    export(transcripts.path(), &cfg, None);

    let file = journal_files(journal.path()).remove(0);
    let path = journal.path().join(&file);
    let original = fs::read_to_string(&path).unwrap();
    let edited = original.replacen("---\n", "---\ntags:\n- enriched\nsummary: Fixed it\n", 1);
    fs::write(&path, &edited).unwrap();
    let edited_fm = edited[..edited.find("\n---\n").unwrap() + 5].to_string();

    // The session grows after the first export.
    write_transcript(transcripts.path(), ID, "/work/proj", "Fix the login bug", 6);
    cfg.regenerate = true;
    cfg.yes = true;
    let summary = export(transcripts.path(), &cfg, None);
    assert_eq!(summary.result_for(&file), Some(ProcessResult::Updated));

    let updated = fs::read_to_string(&path).unwrap();
    assert!(updated.starts_with(&edited_fm));
    assert!(updated.contains("message 5"));
    assert_eq!(frontmatter_field(&updated, "summary").as_deref(), Some("Fixed it"));

    // Nothing new: the file is left byte for byte.
    let summary = export(transcripts.path(), &cfg, None);
    assert_eq!(summary.result_for(&file), Some(ProcessResult::Unchanged));
    assert_eq!(fs::read_to_string(&path).unwrap(), updated);
}

#[test]
fn force_discards_frontmatter_and_enrichment() {
    let transcripts = TempDir::new().unwrap();
    let journal = TempDir::new().unwrap();
    write_transcript(transcripts.path(), ID, "/work/proj", "Fix the login bug", 2);
    let mut cfg = config(journal.path());
    export(transcripts.path(), &cfg, None);

    let file = journal_files(journal.path()).remove(0);
    let path = journal.path().join(&file);
    let original = fs::read_to_string(&path).unwrap();
    fs::write(&path, original.replacen("---\n", "---\nsummary: by hand\n", 1)).unwrap();
    let mut state = JournalState::load(journal.path());
    state.mark_enriched(&file);
    state.save(journal.path()).unwrap();

    cfg.regenerate = true;
    cfg.force = true;
    cfg.yes = true;
    let summary = export(transcripts.path(), &cfg, None);
    assert_eq!(summary.result_for(&file), Some(ProcessResult::Overwritten));
    assert_eq!(fs::read_to_string(&path).unwrap(), original);

    let state = JournalState::load(journal.path());
    assert!(state.is_exported(&file));
    assert!(!state.is_enriched(&file));
}

#[test]
fn retitled_session_is_renamed() {
    let transcripts = TempDir::new().unwrap();
    let journal = TempDir::new().unwrap();
    write_transcript(transcripts.path(), ID, "/work/proj", "Fix the login bug", 450);
    let cfg = config(journal.path());
    export(transcripts.path(), &cfg, None);

    let old_files = journal_files(journal.path());
    assert_eq!(old_files.len(), 3);
    let old_path = journal.path().join(&old_files[0]);
    let content = fs::read_to_string(&old_path).unwrap();
    let retitled = content.replacen("title: Fix the login bug", "title: Session token refresh", 1);
    assert_ne!(retitled, content);
    fs::write(&old_path, retitled).unwrap();

    let single = ExportConfig {
        all: false,
        ..cfg.clone()
    };
    let summary = export(transcripts.path(), &single, Some("1f2e3d4c"));
    assert_eq!(summary.renamed, 1);

    let new_files = journal_files(journal.path());
    assert_eq!(new_files.len(), 3);
    let base = old_files[0].replace("fix-the-login-bug", "session-token-refresh");
    assert_eq!(new_files[0], base);
    assert!(new_files.iter().all(|f| f.contains("-session-token-refresh-1f2e3d4c")));

    let page1 = fs::read_to_string(journal.path().join(&new_files[0])).unwrap();
    assert_eq!(
        frontmatter_field(&page1, "title").as_deref(),
        Some("Session token refresh")
    );
    assert!(page1.contains("[Next →]("));
    assert!(page1.contains("-session-token-refresh-1f2e3d4c-p2.md)"));

    let state = JournalState::load(journal.path());
    assert_eq!(state.renames.len(), 3);
    assert_eq!(state.renames[0].from, old_files[0]);
    assert_eq!(state.renames[0].to, new_files[0]);
    assert!(state.is_exported(&new_files[0]));
    assert!(!state.entries.contains_key(&old_files[0]));
    assert_eq!(state.session_files(ID), new_files.as_slice());
}

#[test]
fn retitled_session_is_renamed_in_bulk_export() {
    let transcripts = TempDir::new().unwrap();
    let journal = TempDir::new().unwrap();
    write_transcript(transcripts.path(), ID, "/work/proj", "Fix the login bug", 450);
    let cfg = config(journal.path());
    export(transcripts.path(), &cfg, None);

    let old_files = journal_files(journal.path());
    let old_base = old_files[0].trim_end_matches(".md").to_string();
    let old_path = journal.path().join(&old_files[0]);
    let content = fs::read_to_string(&old_path).unwrap();
    fs::write(
        &old_path,
        content.replacen("title: Fix the login bug", "title: Session token refresh", 1),
    )
    .unwrap();

    let run = run_export(&sessions(transcripts.path()), &cfg, false, |_| {
        panic!("a rename alone must not prompt")
    })
    .unwrap();
    let ExportOutcome::Done(summary) = run else {
        panic!("export did not run");
    };
    assert_eq!(summary.renamed, 1);
    assert_eq!(summary.updated, 3);
    assert_eq!(summary.skipped, 0);

    let new_files = journal_files(journal.path());
    assert_eq!(new_files.len(), 3);
    assert!(new_files.iter().all(|f| f.contains("-session-token-refresh-1f2e3d4c")));

    let link = regex::Regex::new(r"\]\(([^)]+\.md)\)").unwrap();
    for name in &new_files {
        let page = fs::read_to_string(journal.path().join(name)).unwrap();
        assert!(!page.contains(&old_base), "{} still names {}", name, old_base);
        let targets: Vec<&str> = link
            .captures_iter(&page)
            .map(|c| c.get(1).unwrap().as_str())
            .collect();
        assert!(!targets.is_empty());
        for target in targets {
            assert!(journal.path().join(target).exists(), "{} links to missing {}", name, target);
        }
    }
    let p2 = fs::read_to_string(journal.path().join(&new_files[1])).unwrap();
    assert!(p2.starts_with("# Session token refresh\n"));

    let state = JournalState::load(journal.path());
    assert_eq!(state.renames.len(), 3);
    assert_eq!(state.renames[0].from, old_files[0]);
    assert_eq!(state.renames[0].to, new_files[0]);
    assert!(old_files.iter().all(|f| !state.entries.contains_key(f)));
    assert_eq!(state.session_files(ID), new_files.as_slice());
}

#[test]
fn dry_run_touches_nothing() {
    let transcripts = TempDir::new().unwrap();
    let journal = TempDir::new().unwrap();
    let journal_dir = journal.path().join("journal");
    write_transcript(transcripts.path(), ID, "/work/proj", "Fix the login bug", 2);
    let cfg = ExportConfig {
        dry_run: true,
        ..config(&journal_dir)
    };

    let outcome = run_export(&sessions(transcripts.path()), &cfg, false, |_| {
        panic!("dry run must not prompt")
    })
    .unwrap();
    match outcome {
        ExportOutcome::DryRun(line) => assert_eq!(line, "Would export 1 new."),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(!journal_dir.exists());
}

#[test]
fn nested_fences_stay_balanced() {
    let transcripts = TempDir::new().unwrap();
    let journal = TempDir::new().unwrap();
    let dir = transcripts.path().join("-project");
    fs::create_dir_all(&dir).unwrap();
    let lines = [
        serde_json::json!({
            "sessionId": ID, "type": "user", "timestamp": "2026-01-20T10:00:00Z",
            "cwd": "/work/proj",
            "message": {"role": "user", "content": "Show me the README"},
        }),
        serde_json::json!({
            "sessionId": ID, "type": "assistant", "timestamp": "2026-01-20T10:00:05Z",
            "cwd": "/work/proj",
            "message": {"role": "assistant", "content": [
                {"type": "tool_use", "id": "t1", "name": "Read", "input": {"file_path": "/work/proj/README.md"}},
            ]},
        }),
        serde_json::json!({
            "sessionId": ID, "type": "user", "timestamp": "2026-01-20T10:00:06Z",
            "cwd": "/work/proj",
            "message": {"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "t1",
                 "content": "     1→# Demo\n     2→```rust\n     3→fn main() {}\n     4→```"},
            ]},
        }),
    ];
    let body: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
    fs::write(dir.join("s.jsonl"), body.join("\n") + "\n").unwrap();

    export(transcripts.path(), &config(journal.path()), None);
    let file = journal_files(journal.path()).remove(0);
    let content = fs::read_to_string(journal.path().join(file)).unwrap();

    assert!(content.contains("🔧 **Read: /work/proj/README.md**"));
    assert!(content.contains("````\n# Demo\n```rust\nfn main() {}\n```\n````"));
    assert!(content.contains("### 3. Tool Output"));
}

#[test]
fn bad_lines_do_not_fail_the_file() {
    let transcripts = TempDir::new().unwrap();
    let path = write_transcript(transcripts.path(), ID, "/work/proj", "Fix the login bug", 2);
    let mut bytes = fs::read(&path).unwrap();
    bytes.extend_from_slice(b"{not json\n");
    bytes.extend_from_slice(b"\xff\xfe garbage\n");
    fs::write(&path, bytes).unwrap();

    let found = sessions(transcripts.path());
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].messages.len(), 2);
    assert_eq!(found[0].first_user_msg.as_deref(), Some("Fix the login bug"));
}
