//! CLI entry and dispatch.
//!
//! Exit codes: 0 clean exit, 1 usage error, 2 unrecoverable cache
//! corruption, 3 fatal internal error. The hidden `worker` subcommand is
//! how the engine re-executes this binary as a job runner.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use lookout_core::cache::CacheDir;
use lookout_core::config::{Config, Theme};
use lookout_core::engine::{self, EngineConfig};
use lookout_core::snapshot;
use lookout_core::toolkit::ToolRegistry;
use lookout_core::watcher;
use lookout_core::{interrupt, worker};
use lookout_tui::runtime::TuiRuntime;
use lookout_tui::state::Model;
use tokio::sync::mpsc;
use tracing::info;

#[derive(Parser)]
#[command(name = "lookout")]
#[command(version)]
#[command(about = "Watches a codebase and keeps a matrix of analysis reports up to date")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// The codebase to monitor
    #[arg(value_name = "DIRECTORY")]
    directory: Option<PathBuf>,

    /// Print the tool and extension matrix, then exit
    #[arg(short = 'i', long)]
    info: bool,

    /// Worker subprocess count (default: the CPU count)
    #[arg(short = 'w', long, value_name = "N")]
    workers: Option<usize>,

    /// Editor command for the e key (overrides $EDITOR/$VISUAL)
    #[arg(short = 'e', long, value_name = "CMD")]
    editor: Option<String>,

    /// UI palette: default or mono
    #[arg(short = 't', long, value_name = "NAME")]
    theme: Option<String>,

    /// Cache blob compression level, 0..=9
    #[arg(short = 'c', long, value_name = "LEVEL")]
    compression: Option<u32>,
}

#[derive(Subcommand)]
enum Command {
    /// Job runner mode, spawned by the engine
    #[command(hide = true)]
    Worker,
}

pub fn run() -> Result<ExitCode> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(1),
            };
            return Ok(code);
        }
    };

    if let Some(Command::Worker) = cli.command {
        // One runtime for the worker loop; the cwd was set by the
        // engine to the codebase root.
        let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;
        let root = std::env::current_dir().context("read working directory")?;
        rt.block_on(worker::run(&root))?;
        return Ok(ExitCode::SUCCESS);
    }

    if cli.info {
        print!("{}", ToolRegistry::probe().info_matrix());
        return Ok(ExitCode::SUCCESS);
    }

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("{message}");
            return Ok(ExitCode::from(1));
        }
    };

    interrupt::init();
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;
    rt.block_on(run_monitor(config))?;
    Ok(ExitCode::SUCCESS)
}

/// Flag validation; failures here are usage errors, not crashes.
fn build_config(cli: &Cli) -> Result<Config, String> {
    let Some(directory) = &cli.directory else {
        return Err("A directory to monitor is required. See --help.".to_string());
    };
    if !directory.exists() {
        return Err(format!("Directory does not exist: {}", directory.display()));
    }
    if !directory.is_dir() {
        return Err(format!("Not a directory: {}", directory.display()));
    }
    let root = directory
        .canonicalize()
        .map_err(|err| format!("Cannot resolve {}: {err}", directory.display()))?;

    let mut config = Config::new(root);
    if let Some(workers) = cli.workers {
        if workers == 0 {
            return Err("There must be at least one worker.".to_string());
        }
        config.workers = workers;
    }
    if let Some(editor) = &cli.editor {
        config.editor = Some(editor.clone());
    }
    if let Some(theme) = &cli.theme {
        config.theme = Theme::parse(theme).ok_or_else(|| {
            format!("Unknown theme {theme:?}; themes: {}", Theme::names().join(", "))
        })?;
    }
    if let Some(level) = cli.compression {
        if level > 9 {
            return Err("Compression level must be between 0 and 9.".to_string());
        }
        config.compression = level;
    }
    Ok(config)
}

async fn run_monitor(config: Config) -> Result<()> {
    let mut cache = CacheDir::open(&config.cache_dir(), config.compression)?;
    init_tracing(&cache)?;
    info!(root = %config.root.display(), "starting");

    let registry = ToolRegistry::probe();
    let scan = snapshot::scan(&config.root).context("scan codebase")?;
    let watcher_view = scan.clone();
    let restored = cache.load_status();
    let (model, jobs) = Model::new(&config, registry, scan, restored);
    cache.collect_garbage(&model.referenced_blobs());

    let worker_program = std::env::current_exe().context("locate own binary")?;
    let (engine, engine_rx) = engine::spawn(EngineConfig {
        worker_program,
        worker_args: vec!["worker".to_string()],
        root: config.root.clone(),
        workers: config.workers,
    });
    engine.enqueue(jobs);

    let (fs_tx, fs_rx) = mpsc::unbounded_channel();
    watcher::spawn(
        config.root.clone(),
        watcher_view,
        watcher::RESCAN_INTERVAL,
        fs_tx,
    )
    .context("start filesystem watcher")?;

    let mut runtime = TuiRuntime::new(model, engine, engine_rx, fs_rx, cache)?;
    runtime.run()
}

/// Logs go to a file inside the cache directory; stdout and stderr
/// belong to the terminal UI.
fn init_tracing(cache: &CacheDir) -> Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(cache.log_path())
        .context("open log file")?;
    let _ = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_max_level(tracing::Level::INFO)
        .with_writer(Arc::new(file))
        .try_init();
    Ok(())
}
