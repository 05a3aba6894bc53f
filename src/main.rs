use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use semindex::config::{self, Config};
use semindex::embedder::Model2VecEmbedder;
use semindex::orchestrator::{self, Mode, OrchestratorCtx};
use semindex::parser_registry::ParserRegistry;
use semindex::search::{self, KindFilter};
use semindex::vector_store::LocalVectorStore;
use semindex::watcher;

#[derive(Parser)]
#[command(name = "semindex", about = "Incremental semantic code indexer")]
struct Cli {
    /// Project root; defaults to the current directory.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the orchestrator once over the project tree.
    Index {
        /// Reprocess every file, not just ones changed since the last run.
        #[arg(long)]
        full: bool,
        /// Restrict the run to this subdirectory or file.
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Index a single file end-to-end, outside a full tree scan.
    File { path: PathBuf },
    /// Run a query against the vector store.
    Search {
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long, default_value = "all")]
        kind: String,
    },
    /// Filesystem-watcher commands.
    Watch {
        #[command(subcommand)]
        action: WatchAction,
    },
    /// Git hook management.
    Hooks {
        #[command(subcommand)]
        action: HooksAction,
    },
    /// Multi-project watcher service.
    Service {
        #[command(subcommand)]
        action: ServiceAction,
    },
}

#[derive(Subcommand)]
enum WatchAction {
    Start {
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum HooksAction {
    Install,
    Uninstall,
    Status,
}

#[derive(Subcommand)]
enum ServiceAction {
    AddProject { dir: PathBuf },
    Status,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_runtime(root: &PathBuf) -> Result<(Config, ParserRegistry, Model2VecEmbedder, LocalVectorStore)> {
    let config = config::load_config(root).context("loading config")?;
    let registry = ParserRegistry::default_registry();
    let embedder = Model2VecEmbedder::load(&config.embedder).context("loading embedding model")?;
    let store = LocalVectorStore::open(&config.points_file_for(root)).context("opening vector store")?;
    Ok((config, registry, embedder, store))
}

fn run(cli: Cli) -> Result<()> {
    let root = cli.root.canonicalize().unwrap_or(cli.root.clone());

    match cli.command {
        Command::Index { full, path } => {
            let (config, registry, embedder, store) = load_runtime(&root)?;
            let target = path.map(|p| root.join(p)).unwrap_or_else(|| root.clone());
            // The CLI is the only place allowed to infer "full" from filesystem state (§9): no
            // prior state file means there is nothing to be incremental relative to.
            let mode = if full || !config.state_file_for(&root).exists() { Mode::Full } else { Mode::Incremental };

            let spinner = ProgressBar::new_spinner();
            spinner.set_style(ProgressStyle::with_template("{spinner} {msg}").unwrap());
            spinner.set_message("indexing...");
            spinner.enable_steady_tick(std::time::Duration::from_millis(100));

            let ctx = OrchestratorCtx {
                project_root: &root,
                target: &target,
                config: &config,
                registry: &registry,
                embedder: &embedder,
                store: &store,
            };
            let result = orchestrator::run(mode, &ctx)?;
            spinner.finish_and_clear();

            println!(
                "processed {} files, upserted {} points, deleted {}, skipped {} (unchanged), {} tokens",
                result.files_processed,
                result.points_upserted,
                result.points_deleted,
                result.skipped,
                result.tokens
            );
            for err in &result.errors {
                eprintln!("warning: {err}");
            }
            if !result.failed_files.is_empty() {
                eprintln!("failed to parse: {}", result.failed_files.join(", "));
            }
            Ok(())
        }

        Command::File { path } => {
            let (config, registry, embedder, store) = load_runtime(&root)?;
            let abs_path = if path.is_absolute() { path.clone() } else { root.join(&path) };
            let ctx = OrchestratorCtx {
                project_root: &root,
                target: &abs_path,
                config: &config,
                registry: &registry,
                embedder: &embedder,
                store: &store,
            };
            let result = orchestrator::run(Mode::Incremental, &ctx)?;
            println!("indexed {}: {} points upserted", path.display(), result.points_upserted);
            Ok(())
        }

        Command::Search { query, limit, kind } => {
            let (config, _registry, embedder, store) = load_runtime(&root)?;
            let kind_filter = KindFilter::parse(&kind)
                .with_context(|| format!("unknown --kind '{kind}', expected entity|relation|chat|all"))?;
            let hits = search::search(&store, &embedder, &config.collection, &query, limit, kind_filter)?;
            let json = serde_json::to_string_pretty(
                &hits
                    .iter()
                    .map(|h| {
                        serde_json::json!({
                            "score": h.score,
                            "payload": h.point.payload,
                        })
                    })
                    .collect::<Vec<_>>(),
            )?;
            println!("{json}");
            Ok(())
        }

        Command::Watch { action } => match action {
            WatchAction::Start { path } => {
                let (config, registry, embedder, store) = load_runtime(&root)?;
                let target = path.map(|p| root.join(p)).unwrap_or_else(|| root.clone());
                watcher::watch(&root, &target, &config, &registry, &embedder, &store, || false)?;
                Ok(())
            }
        },

        Command::Hooks { action } => run_hooks(&root, action),

        Command::Service { action } => run_service(&root, action),
    }
}

const HOOK_MARKER: &str = "# installed by semindex";

fn hook_path(root: &PathBuf) -> PathBuf {
    root.join(".git/hooks/pre-commit")
}

fn run_hooks(root: &PathBuf, action: HooksAction) -> Result<()> {
    let hook = hook_path(root);
    match action {
        HooksAction::Install => {
            if let Some(parent) = hook.parent() {
                std::fs::create_dir_all(parent).context("creating .git/hooks")?;
            }
            let existing = std::fs::read_to_string(&hook).unwrap_or_default();
            if existing.contains(HOOK_MARKER) {
                println!("hook already installed");
                return Ok(());
            }
            let script = format!("#!/bin/sh\n{HOOK_MARKER}\nsemindex index || exit 1\n");
            std::fs::write(&hook, script).context("writing pre-commit hook")?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let mut perms = std::fs::metadata(&hook)?.permissions();
                perms.set_mode(0o755);
                std::fs::set_permissions(&hook, perms)?;
            }
            println!("installed pre-commit hook at {}", hook.display());
            Ok(())
        }
        HooksAction::Uninstall => {
            let existing = std::fs::read_to_string(&hook).unwrap_or_default();
            if existing.contains(HOOK_MARKER) {
                std::fs::remove_file(&hook).context("removing pre-commit hook")?;
                println!("removed pre-commit hook");
            } else {
                println!("no semindex-managed hook to remove");
            }
            Ok(())
        }
        HooksAction::Status => {
            let existing = std::fs::read_to_string(&hook).unwrap_or_default();
            if existing.contains(HOOK_MARKER) {
                println!("installed");
            } else {
                println!("not installed");
            }
            Ok(())
        }
    }
}

/// The registry of project roots the `service` commands track, persisted under the user's
/// home directory so one watcher process can serve several checkouts.
fn service_registry_path() -> Result<PathBuf> {
    let base = dirs::home_dir().context("could not determine home directory")?;
    Ok(base.join(".semindex").join("projects.json"))
}

fn run_service(root: &PathBuf, action: ServiceAction) -> Result<()> {
    let registry_path = service_registry_path()?;
    let mut projects: Vec<String> = if registry_path.exists() {
        let text = std::fs::read_to_string(&registry_path)?;
        serde_json::from_str(&text).unwrap_or_default()
    } else {
        Vec::new()
    };

    match action {
        ServiceAction::AddProject { dir } => {
            let abs = if dir.is_absolute() { dir } else { root.join(dir) };
            let abs_str = abs.to_string_lossy().to_string();
            if !projects.contains(&abs_str) {
                projects.push(abs_str.clone());
                if let Some(parent) = registry_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&registry_path, serde_json::to_string_pretty(&projects)?)?;
            }
            println!("tracking {abs_str}");
            Ok(())
        }
        ServiceAction::Status => {
            if projects.is_empty() {
                println!("no projects registered");
            } else {
                for p in &projects {
                    println!("{p}");
                }
            }
            Ok(())
        }
    }
}
