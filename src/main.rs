use clap::{CommandFactory, Parser, Subcommand};
use eyre::{Context, Result, eyre};
use serde::Deserialize;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use transcript_journal::listing::{self, DEFAULT_LIST_LIMIT, ListOptions};
use transcript_journal::locator::{SessionLocator, default_roots, select_session};
use transcript_journal::parser::{ClaudeCodeParser, Session};
use transcript_journal::process::{ExportOutcome, ExportPlan, run_export, validate_flags};
use transcript_journal::state::JournalState;
use transcript_journal::utils::ExportConfig;

/// Export AI coding-assistant sessions to Markdown journal files.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a specific configuration file.
    /// Defaults to $XDG_CONFIG_HOME/transcript-journal/config.toml
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Context directory; journals are written to its `journal/` folder.
    /// Defaults to ./.context if not set in config.
    #[arg(long, value_name = "DIR", global = true)]
    context_dir: Option<PathBuf>,

    /// Log debug details to stderr (RUST_LOG overrides).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress progress output.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write sessions to the journal directory.
    Export {
        /// Session ID prefix or slug to export.
        session: Option<String>,

        /// Export every session of the project.
        #[arg(long)]
        all: bool,

        /// Include sessions from every project.
        #[arg(long)]
        all_projects: bool,

        /// Rewrite existing files, discarding their front matter.
        #[arg(long)]
        force: bool,

        /// Re-render existing journal files, keeping their front matter.
        #[arg(long)]
        regenerate: bool,

        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Show what would be written without touching the disk.
        #[arg(long)]
        dry_run: bool,
    },

    /// List recent sessions.
    List {
        /// Maximum rows to print.
        #[arg(short = 'n', long, default_value_t = DEFAULT_LIST_LIMIT)]
        limit: usize,

        /// Only sessions whose project name contains this text.
        #[arg(short, long)]
        project: Option<String>,

        /// Only sessions recorded by this tool (e.g. claude-code).
        #[arg(short, long)]
        tool: Option<String>,

        /// Include sessions from every project.
        #[arg(long)]
        all_projects: bool,
    },

    /// Print details of one session.
    Show {
        /// Session ID prefix or slug.
        session: Option<String>,

        /// Show the most recent session.
        #[arg(long)]
        latest: bool,

        /// Print the whole conversation.
        #[arg(long)]
        full: bool,

        /// Include sessions from every project.
        #[arg(long)]
        all_projects: bool,
    },
}

#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    context_dir: Option<PathBuf>,
    /// Extra directories scanned for transcripts.
    #[serde(default)]
    transcript_dirs: Vec<PathBuf>,
}

fn load_file_config(explicit_path: Option<&Path>) -> Result<FileConfig> {
    let path = if let Some(p) = explicit_path {
        if !p.exists() {
            return Err(eyre!("Config file not found: {}", p.display()));
        }
        Some(p.to_path_buf())
    } else {
        dirs::config_dir()
            .map(|d| d.join("transcript-journal/config.toml"))
            .filter(|p| p.exists())
    };

    match path {
        None => Ok(FileConfig::default()),
        Some(p) => {
            let content = fs::read_to_string(&p)
                .wrap_err_with(|| format!("Failed to read config: {}", p.display()))?;
            parse_file_config(&content)
                .wrap_err_with(|| format!("Failed to parse config: {}", p.display()))
        }
    }
}

fn parse_file_config(content: &str) -> Result<FileConfig> {
    Ok(toml::from_str(content)?)
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(io::stderr)
        .init();
}

fn load_sessions(locator: &SessionLocator, all_projects: bool) -> Result<Vec<Session>> {
    if all_projects {
        return locator.find_sessions();
    }
    let cwd = std::env::current_dir().wrap_err("Failed to read current directory")?;
    locator.find_sessions_for_cwd(&cwd)
}

fn no_sessions_message(all_projects: bool) -> &'static str {
    if all_projects {
        "No sessions found."
    } else {
        "No sessions found for this project. Use --all-projects to see all."
    }
}

fn confirm_on_stdin(plan: &ExportPlan) -> Result<bool> {
    println!("{}", plan.summary_line(false));
    print!("Proceed? [y/N] ");
    io::stdout().flush().wrap_err("Failed to flush stdout")?;

    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .wrap_err("Failed to read answer")?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // 1. Load config file (CLI path > default path)
    let file_cfg = load_file_config(cli.config.as_deref())?;

    // 2. Resolve context_dir (CLI > Config > Default)
    let context_dir = cli
        .context_dir
        .or(file_cfg.context_dir)
        .unwrap_or_else(|| PathBuf::from(".context"));

    // 3. Build the locator over the default roots plus configured ones
    let mut roots = default_roots();
    roots.extend(file_cfg.transcript_dirs);
    let locator = SessionLocator::new(vec![Box::new(ClaudeCodeParser::new())], roots);

    // 4. Run the subcommand
    match cli.command {
        Commands::Export {
            session,
            all,
            all_projects,
            force,
            regenerate,
            yes,
            dry_run,
        } => {
            let config = ExportConfig {
                journal_dir: context_dir.join("journal"),
                all,
                all_projects,
                force,
                regenerate,
                yes,
                dry_run,
                quiet: cli.quiet,
            };
            validate_flags(session.as_deref(), &config)?;
            if session.is_none() && !all {
                let mut cmd = Cli::command();
                if let Some(export) = cmd.find_subcommand_mut("export") {
                    export.print_help().wrap_err("Failed to print help")?;
                }
                return Ok(());
            }

            let sessions = load_sessions(&locator, all_projects)?;
            if sessions.is_empty() {
                println!("{}", no_sessions_message(all_projects));
                return Ok(());
            }

            let outcome = match session.as_deref() {
                Some(query) => {
                    let selected = select_session(&sessions, query)?;
                    run_export(std::slice::from_ref(selected), &config, true, confirm_on_stdin)?
                }
                None => run_export(&sessions, &config, false, confirm_on_stdin)?,
            };

            match outcome {
                ExportOutcome::DryRun(line) => println!("{}", line),
                ExportOutcome::Aborted => println!("Aborted."),
                ExportOutcome::Done(summary) => {
                    for line in summary.report(&config.journal_dir) {
                        println!("{}", line);
                    }
                    let state = JournalState::load(&config.journal_dir);
                    let pending = state.count_unenriched(&config.journal_dir);
                    if pending > 0 && !config.quiet {
                        println!("{} journal file(s) not yet enriched.", pending);
                    }
                    if summary.failed > 0 {
                        return Err(eyre!("{} file(s) failed to export", summary.failed));
                    }
                }
            }
            Ok(())
        }

        Commands::List {
            limit,
            project,
            tool,
            all_projects,
        } => {
            let sessions = load_sessions(&locator, all_projects)?;
            if sessions.is_empty() {
                println!("{}", no_sessions_message(all_projects));
                return Ok(());
            }
            let opts = ListOptions {
                limit,
                project,
                tool,
            };
            listing::list(&mut io::stdout().lock(), &sessions, &opts)
        }

        Commands::Show {
            session,
            latest,
            full,
            all_projects,
        } => {
            let sessions = load_sessions(&locator, all_projects)?;
            if sessions.is_empty() {
                println!("{}", no_sessions_message(all_projects));
                return Ok(());
            }
            let selected = match (session.as_deref(), latest) {
                (Some(query), _) => select_session(&sessions, query)?,
                // Sessions come back newest first.
                (None, true) => &sessions[0],
                (None, false) => return Err(eyre!("please provide a session ID or use --latest")),
            };
            listing::show(&mut io::stdout().lock(), selected, full)
        }
    }
}
