//! cairn - transactional file operations from the terminal.
//!
//! Usage:
//!   cairn copy SRC... DEST          Copy items into a directory
//!   cairn move SRC... DEST          Move items into a directory
//!   cairn delete PATH               Delete a file or directory tree
//!   cairn rename PATH NAME          Rename an item in place
//!   cairn mkdir PARENT NAME         Create a directory
//!   cairn touch PARENT NAME         Create an empty file
//!   cairn stash list|sweep          Inspect or prune stashed backups
//!   cairn --help                    Show help

use std::io::{self, BufRead, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result, bail};
use tracing_subscriber::EnvFilter;

use cairn_core::{
    Conflict, ConflictBehavior, ConflictDecision, EngineConfig, MemorySettings, OpOutcome,
    SettingsStore, UserSettings,
};
use cairn_elevate::EscalationRequest;
use cairn_ops::{ConflictResolver, Engine};

#[derive(Parser)]
#[command(
    name = "cairn",
    version,
    about = "Transactional copy, move, delete, rename and create",
    long_about = "cairn runs file operations as all-or-nothing batches.\n\n\
                  A failed copy or move is rolled back, overwritten items are \
                  restored from backups, and permission errors can be retried \
                  with elevated privileges."
)]
struct Cli {
    /// Print the outcome as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Skip the elevation confirmation prompt for this run
    #[arg(short, long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Copy items into a directory
    Copy {
        /// Items to copy, followed by the destination directory
        #[arg(required = true, num_args = 2..)]
        paths: Vec<PathBuf>,

        /// What to do when an item already exists at the destination
        #[arg(short = 'c', long)]
        on_conflict: Option<Behavior>,
    },

    /// Move items into a directory
    Move {
        /// Items to move, followed by the destination directory
        #[arg(required = true, num_args = 2..)]
        paths: Vec<PathBuf>,

        /// What to do when an item already exists at the destination
        #[arg(short = 'c', long)]
        on_conflict: Option<Behavior>,
    },

    /// Delete a file or directory tree
    Delete {
        path: PathBuf,

        /// Move to the system trash instead of removing
        #[arg(short, long)]
        trash: bool,
    },

    /// Rename an item within its directory
    Rename { path: PathBuf, new_name: String },

    /// Create a directory
    Mkdir { parent: PathBuf, name: String },

    /// Create an empty file
    Touch { parent: PathBuf, name: String },

    /// Manage backups that could not be restored
    Stash {
        #[command(subcommand)]
        action: StashAction,
    },
}

#[derive(Subcommand)]
enum StashAction {
    /// List stashed backups, newest first
    List,
    /// Remove expired and excess backups
    Sweep,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Behavior {
    Ask,
    Rename,
    Skip,
    Overwrite,
    Cancel,
}

impl From<Behavior> for ConflictBehavior {
    fn from(behavior: Behavior) -> Self {
        match behavior {
            Behavior::Ask => Self::Ask,
            Behavior::Rename => Self::Rename,
            Behavior::Skip => Self::Skip,
            Behavior::Overwrite => Self::Overwrite,
            Behavior::Cancel => Self::Cancel,
        }
    }
}

/// Asks on the terminal for each conflicting item.
struct TerminalResolver;

impl ConflictResolver for TerminalResolver {
    fn resolve(&self, conflict: &Conflict) -> ConflictDecision {
        let kind = if conflict.is_directory {
            "Directory"
        } else {
            "File"
        };
        let question = format!(
            "{kind} '{}' already exists in {}. [r]ename, [s]kip, [o]verwrite, [c]ancel?",
            conflict.item_name,
            conflict
                .destination
                .parent()
                .unwrap_or(&conflict.destination)
                .display()
        );

        match prompt(&question).as_deref() {
            Some("r" | "rename") => ConflictDecision::Rename,
            Some("s" | "skip") => ConflictDecision::Skip,
            Some("o" | "overwrite") => ConflictDecision::Overwrite,
            _ => ConflictDecision::Cancel,
        }
    }
}

fn confirm_elevation(request: &EscalationRequest) -> bool {
    let question = format!(
        "Permission denied for {}. Retry '{}' with administrator privileges? [y/N]",
        request.primary_path().display(),
        request.verb()
    );
    matches!(prompt(&question).as_deref(), Some("y" | "yes"))
}

/// Read one trimmed, lowercased answer from stdin. `None` on EOF.
fn prompt(question: &str) -> Option<String> {
    let mut stderr = io::stderr().lock();
    let _ = write!(stderr, "{question} ");
    let _ = stderr.flush();

    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim().to_lowercase()),
    }
}

fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("CAIRN_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start runtime")?;

    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    let mut settings = UserSettings::load();
    if cli.yes {
        settings.skip_elevation_confirmation = true;
    }
    let settings: Arc<dyn SettingsStore> = Arc::new(MemorySettings::new(settings));

    let trash = matches!(cli.command, Command::Delete { trash: true, .. });
    let config = EngineConfig {
        delete_to_trash: trash,
        ..EngineConfig::default()
    };

    let engine = Engine::new(config)
        .with_settings(settings)
        .with_resolver(Arc::new(TerminalResolver))
        .with_platform_escalation(Arc::new(confirm_elevation));

    let outcome = match cli.command {
        Command::Copy { paths, on_conflict } => {
            let (sources, destination) = split_destination(paths)?;
            engine
                .copy(sources, destination, on_conflict.map(Into::into))
                .await
        }
        Command::Move { paths, on_conflict } => {
            let (sources, destination) = split_destination(paths)?;
            engine
                .move_to(sources, destination, on_conflict.map(Into::into))
                .await
        }
        Command::Delete { path, .. } => engine.delete(absolute(&path)?).await,
        Command::Rename { path, new_name } => engine.rename(absolute(&path)?, new_name).await,
        Command::Mkdir { parent, name } => engine.create_folder(absolute(&parent)?, name).await,
        Command::Touch { parent, name } => engine.create_file(absolute(&parent)?, name).await,
        Command::Stash { action } => {
            let result = run_stash(&engine, action, cli.json).await;
            engine.shutdown();
            return result;
        }
    };

    engine.shutdown();
    tracing::debug!(?outcome, "operation finished");
    report(&outcome, cli.json)?;

    if !outcome.success {
        std::process::exit(if outcome.is_cancelled() { 130 } else { 1 });
    }
    Ok(())
}

/// The last path is the destination; the rest are sources. All come back absolute.
fn split_destination(paths: Vec<PathBuf>) -> Result<(Vec<PathBuf>, PathBuf)> {
    let mut paths = paths
        .iter()
        .map(|path| absolute(path))
        .collect::<Result<Vec<_>>>()?;
    let Some(destination) = paths.pop() else {
        bail!("Missing destination");
    };
    if paths.is_empty() {
        bail!("At least one source is required");
    }
    Ok((paths, destination))
}

/// Resolve a command-line path against the working directory.
///
/// `.` and `..` are folded lexically, the way the shell reads them; symlinks
/// are left alone so a linked source is copied as the link.
fn absolute(path: &Path) -> Result<PathBuf> {
    let resolved = std::path::absolute(path)
        .with_context(|| format!("Invalid path {}", path.display()))?;

    let mut normalized = PathBuf::new();
    for component in resolved.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    Ok(normalized)
}

fn report(outcome: &OpOutcome, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }

    match (&outcome.error, &outcome.path) {
        (Some(error), _) => eprintln!("Error: {error}"),
        (None, Some(path)) => println!("{}", path.display()),
        (None, None) => {}
    }
    if outcome.elevated {
        eprintln!("(completed with elevated privileges)");
    }
    Ok(())
}

async fn run_stash(engine: &Engine, action: StashAction, json: bool) -> Result<()> {
    match action {
        StashAction::List => {
            let entries = engine.list_stash().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
                return Ok(());
            }
            if entries.is_empty() {
                println!("No stashed backups in {}", engine.stash().root().display());
                return Ok(());
            }
            for entry in &entries {
                println!(
                    "{}  {}{}",
                    entry.stashed_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.path.display(),
                    if entry.is_directory { "/" } else { "" }
                );
            }
        }
        StashAction::Sweep => {
            let sweep = engine.sweep_stash().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&sweep)?);
            } else {
                println!(
                    "Removed {} expired and {} excess backups, {} retained",
                    sweep.removed_expired, sweep.removed_over_cap, sweep.retained
                );
            }
        }
    }
    Ok(())
}
