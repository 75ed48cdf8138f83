//! The event-loop runtime.
//!
//! Owns the terminal and the model, multiplexes the three input streams
//! (keystrokes, filesystem events, worker completions), runs the reducer
//! over each batch, executes the returned effects, and re-renders when
//! anything happened. One pass is bounded by the tick interval; input
//! polling blocks until the next tick is due so idle CPU stays near
//! zero.
//!
//! This must run inside a multi-threaded tokio runtime: the loop itself
//! blocks on terminal input while the engine and watcher tasks run on
//! worker threads.

use std::io::Stdout;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossterm::event;
use lookout_core::cache::CacheDir;
use lookout_core::engine::{EngineEvent, EngineHandle};
use lookout_core::interrupt;
use lookout_core::snapshot;
use lookout_core::watcher::FsEvent;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::effects::UiEffect;
use crate::events::UiEvent;
use crate::state::Model;
use crate::{render, terminal, update};

/// Tick cadence while jobs are active or input is flowing.
const FRAME_DURATION: Duration = Duration::from_millis(16);

/// Tick cadence when nothing is happening.
const IDLE_POLL_DURATION: Duration = Duration::from_millis(100);

pub struct TuiRuntime {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    pub model: Model,
    engine: EngineHandle,
    engine_rx: mpsc::Receiver<EngineEvent>,
    fs_rx: mpsc::UnboundedReceiver<FsEvent>,
    cache: CacheDir,
    last_tick: Instant,
    last_input: Instant,
}

impl TuiRuntime {
    /// Takes over the terminal. The panic hook and the signal restore
    /// hook are installed before the alternate screen is entered.
    pub fn new(
        model: Model,
        engine: EngineHandle,
        engine_rx: mpsc::Receiver<EngineEvent>,
        fs_rx: mpsc::UnboundedReceiver<FsEvent>,
        cache: CacheDir,
    ) -> Result<Self> {
        terminal::install_panic_hook();
        interrupt::set_restore_hook(|| {
            let _ = terminal::restore_terminal();
        });
        let terminal = terminal::setup_terminal().context("set up terminal")?;
        let now = Instant::now();
        Ok(Self {
            terminal,
            model,
            engine,
            engine_rx,
            fs_rx,
            cache,
            last_tick: now,
            last_input: now,
        })
    }

    /// Runs until quit. The terminal is restored on drop.
    pub fn run(&mut self) -> Result<()> {
        let startup = update::startup_effects(&self.model);
        self.execute_effects(startup);
        let missing_tools: Vec<_> = self.model.registry.missing().to_vec();
        for (tool, program) in missing_tools {
            self.model
                .log_message(format!("Tool {tool} disabled: {program} not found."));
        }
        self.model.log_message("Program started.");

        let mut dirty = true;
        while !self.model.should_quit {
            if interrupt::should_quit() {
                info!("quit requested by signal");
                break;
            }
            let mut events = self.collect_events()?;
            let size = self.terminal.size().context("query terminal size")?;
            events.insert(
                0,
                UiEvent::Frame {
                    width: size.width,
                    height: size.height,
                },
            );
            // The Frame event alone does not warrant a redraw.
            dirty |= events.len() > 1;
            for event in events {
                let effects = update::update(&mut self.model, event);
                self.execute_effects(effects);
            }
            if dirty {
                self.terminal
                    .draw(|frame| render::render(&self.model, frame))
                    .context("draw frame")?;
                dirty = false;
            }
        }

        self.persist_status();
        self.engine.shutdown();
        Ok(())
    }

    /// Drains the filesystem and engine inboxes, then polls the
    /// terminal until the next tick is due.
    fn collect_events(&mut self) -> Result<Vec<UiEvent>> {
        let mut events = Vec::new();
        while let Ok(event) = self.fs_rx.try_recv() {
            events.push(UiEvent::Fs(event));
        }
        while let Ok(event) = self.engine_rx.try_recv() {
            events.push(UiEvent::Engine(event));
        }

        let busy = self
            .model
            .rows
            .iter()
            .flat_map(|row| row.entries.iter())
            .any(|entry| !entry.is_settled())
            || self.last_input.elapsed() < IDLE_POLL_DURATION;
        let tick_interval = if busy {
            FRAME_DURATION
        } else {
            IDLE_POLL_DURATION
        };

        let wait = tick_interval.saturating_sub(self.last_tick.elapsed());
        let poll_duration = if events.is_empty() {
            wait
        } else {
            Duration::ZERO
        };
        if event::poll(poll_duration).context("poll terminal events")? {
            self.last_input = Instant::now();
            events.push(UiEvent::Terminal(event::read().context("read event")?));
            while event::poll(Duration::ZERO)? {
                events.push(UiEvent::Terminal(event::read()?));
            }
        }
        if self.last_tick.elapsed() >= tick_interval {
            events.push(UiEvent::Tick);
            self.last_tick = Instant::now();
        }
        Ok(events)
    }

    fn execute_effects(&mut self, effects: Vec<UiEffect>) {
        for effect in effects {
            self.execute_effect(effect);
        }
    }

    fn execute_effect(&mut self, effect: UiEffect) {
        match effect {
            UiEffect::Quit => {
                self.model.should_quit = true;
            }
            UiEffect::Engine(command) => {
                self.engine.send(command);
            }
            UiEffect::PersistStatus => {
                self.persist_status();
            }
            UiEffect::StoreReport(report) => {
                let digest = CacheDir::blob_digest(
                    &report.key.path,
                    &report.key.tool,
                    &report.content_digest,
                );
                if let Err(err) = self.cache.store_blob(&digest, &report) {
                    warn!(%err, "failed to persist report blob");
                    self.model
                        .log_message(format!("Cache write failed: {err:#}"));
                }
            }
            UiEffect::LoadBody { key, digest } => {
                let report = self.cache.load_blob(&digest);
                let effects =
                    update::update(&mut self.model, UiEvent::BodyLoaded { key, report });
                self.execute_effects(effects);
            }
            UiEffect::SpawnEditor { path } => {
                let Some(editor) = self.model.editor.clone() else {
                    return;
                };
                let abs = snapshot::abs_path(&self.model.root, &path);
                let command = format!("{editor} {}", shell_quote(&abs.to_string_lossy()));
                let spawned = std::process::Command::new("sh")
                    .arg("-c")
                    .arg(&command)
                    .stdin(std::process::Stdio::null())
                    .stdout(std::process::Stdio::null())
                    .stderr(std::process::Stdio::null())
                    .spawn();
                if let Err(err) = spawned {
                    self.model
                        .log_message(format!("Failed to start editor: {err}"));
                }
            }
            UiEffect::OpenPath { path } => {
                let abs = snapshot::abs_path(&self.model.root, &path);
                if let Err(err) = open::that(&abs) {
                    self.model.log_message(format!("Failed to open: {err}"));
                }
            }
        }
    }

    fn persist_status(&mut self) {
        if let Err(err) = self.cache.store_status(&self.model.to_status_db()) {
            warn!(%err, "failed to persist status aggregate");
            self.model
                .log_message(format!("Cache write failed: {err:#}"));
        }
    }
}

impl Drop for TuiRuntime {
    fn drop(&mut self) {
        let _ = terminal::restore_terminal();
    }
}

/// Single-quote shell quoting.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}
