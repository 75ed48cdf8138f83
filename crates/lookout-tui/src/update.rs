//! The reducer: every event becomes state mutation plus effects.
//!
//! Pure in the sense that matters: no I/O, no spawning, no terminal
//! access. The runtime executes whatever comes back.

use std::time::Duration;

use crossterm::event::{
    Event, KeyCode, KeyEvent, KeyEventKind, MouseButton, MouseEvent, MouseEventKind,
};
use lookout_core::cache::CacheDir;
use lookout_core::engine::{EngineCommand, EngineEvent, JobRequest};
use lookout_core::report::Status;
use lookout_core::snapshot::FileSnapshot;
use lookout_core::watcher::FsEvent;
use tracing::debug;

use crate::effects::UiEffect;
use crate::events::UiEvent;
use crate::layout::{self, inner_rect, summary_cell_at};
use crate::state::{Model, Pane, RowState};

/// Minimum spacing between status aggregate writes.
const PERSIST_DEBOUNCE: Duration = Duration::from_secs(1);

/// Wheel scroll step in the result pane.
const WHEEL_STEP: usize = 3;

/// Effects to run once at startup: prime the engine with positions,
/// the restored cursor and pause state, and load the selected report
/// body when it only exists on disk.
pub fn startup_effects(model: &Model) -> Vec<UiEffect> {
    let mut effects = vec![
        UiEffect::Engine(EngineCommand::SetPositions(model.positions())),
        UiEffect::Engine(EngineCommand::SetFocus {
            pos: model.cursor_pos(),
            focus: model.current_key(),
        }),
    ];
    if model.paused {
        effects.push(UiEffect::Engine(EngineCommand::SetPaused(true)));
    }
    if let Some(effect) = body_load_effect(model) {
        effects.push(effect);
    }
    effects
}

pub fn update(model: &mut Model, event: UiEvent) -> Vec<UiEffect> {
    match event {
        UiEvent::Frame { width, height } => {
            model.term_size = (width, height);
            model.layout = layout::compute(
                model.orientation,
                model.log_visible,
                model.fullscreen,
                model.focus_pane,
                ratatui::layout::Rect {
                    x: 0,
                    y: 0,
                    width,
                    height,
                },
            );
            keep_cursor_visible(model);
            Vec::new()
        }
        UiEvent::Tick => {
            if model.status_dirty && model.last_persist.elapsed() >= PERSIST_DEBOUNCE {
                model.status_dirty = false;
                model.last_persist = std::time::Instant::now();
                vec![UiEffect::PersistStatus]
            } else {
                Vec::new()
            }
        }
        UiEvent::Terminal(event) => on_terminal(model, event),
        UiEvent::Fs(event) => on_fs(model, event),
        UiEvent::Engine(event) => on_engine(model, event),
        UiEvent::BodyLoaded { key, report } => {
            if let Some(entry) = model.entry_mut(&key) {
                match report {
                    Some(report) if report.snapshot_key == entry.snapshot_key => {
                        entry.body = Some(report.body);
                    }
                    _ => {
                        // The blob is gone or stale; stop pointing at it.
                        entry.body_ref = None;
                    }
                }
            }
            Vec::new()
        }
    }
}

// ── Terminal input ──────────────────────────────────────────────────────

fn on_terminal(model: &mut Model, event: Event) -> Vec<UiEffect> {
    match event {
        Event::Key(key) if key.kind != KeyEventKind::Release => on_key(model, key),
        Event::Mouse(mouse) => on_mouse(model, mouse),
        _ => Vec::new(),
    }
}

fn on_key(model: &mut Model, key: KeyEvent) -> Vec<UiEffect> {
    if model.help_visible {
        match key.code {
            KeyCode::Char('h') | KeyCode::Char('q') | KeyCode::Esc => {
                model.help_visible = false;
            }
            KeyCode::Up => model.help_scroll = model.help_scroll.saturating_sub(1),
            KeyCode::Down => model.help_scroll += 1,
            KeyCode::PageUp => model.help_scroll = model.help_scroll.saturating_sub(10),
            KeyCode::PageDown => model.help_scroll += 10,
            _ => {}
        }
        return Vec::new();
    }

    match key.code {
        KeyCode::Char('q') => vec![UiEffect::Quit],
        KeyCode::Char('h') => {
            model.help_visible = true;
            model.help_scroll = 0;
            Vec::new()
        }
        KeyCode::Char('o') | KeyCode::Char('t') => {
            model.orientation = model.orientation.toggled();
            model.status_dirty = true;
            Vec::new()
        }
        KeyCode::Char('l') => {
            model.log_visible = !model.log_visible;
            model.status_dirty = true;
            Vec::new()
        }
        KeyCode::Char('f') => {
            model.fullscreen = !model.fullscreen;
            Vec::new()
        }
        KeyCode::Char('s') => toggle_sort(model),
        KeyCode::Char('p') => toggle_pause(model),
        KeyCode::Char('r') => refresh_current(model),
        KeyCode::Char('R') => refresh_tool(model),
        KeyCode::Char('n') => jump_to_issue(model, false),
        KeyCode::Char('N') => jump_to_issue(model, true),
        KeyCode::Char('e') => edit_current(model),
        KeyCode::Char('x') => open_current(model),
        KeyCode::Tab => {
            model.focus_pane = match model.focus_pane {
                Pane::Summary => Pane::Result,
                Pane::Result => Pane::Summary,
            };
            Vec::new()
        }
        KeyCode::Up => navigate(model, 0, -1),
        KeyCode::Down => navigate(model, 0, 1),
        KeyCode::Left => navigate(model, -1, 0),
        KeyCode::Right => navigate(model, 1, 0),
        KeyCode::PageUp => page(model, -1),
        KeyCode::PageDown => page(model, 1),
        KeyCode::Home => jump_edge(model, true),
        KeyCode::End => jump_edge(model, false),
        _ => Vec::new(),
    }
}

fn on_mouse(model: &mut Model, mouse: MouseEvent) -> Vec<UiEffect> {
    if model.help_visible {
        match mouse.kind {
            MouseEventKind::ScrollUp => {
                model.help_scroll = model.help_scroll.saturating_sub(WHEEL_STEP);
            }
            MouseEventKind::ScrollDown => model.help_scroll += WHEEL_STEP,
            _ => {}
        }
        return Vec::new();
    }
    match mouse.kind {
        MouseEventKind::Down(MouseButton::Left) => {
            let (x, y) = (mouse.column, mouse.row);
            if rect_contains(model.layout.summary, x, y) {
                model.focus_pane = Pane::Summary;
                if let Some((row, col)) =
                    summary_cell_at(model.layout.summary, model.summary_scroll, x, y)
                {
                    if row < model.rows.len() {
                        let cols = model.rows[row].entries.len();
                        model.cursor = (row, col.min(cols.saturating_sub(1)));
                        model.clamp_cursor();
                        return focus_effects(model);
                    }
                }
            } else if rect_contains(model.layout.result, x, y) {
                model.focus_pane = Pane::Result;
            }
            Vec::new()
        }
        MouseEventKind::ScrollUp => scroll_result(model, 0, -(WHEEL_STEP as isize)),
        MouseEventKind::ScrollDown => scroll_result(model, 0, WHEEL_STEP as isize),
        _ => Vec::new(),
    }
}

fn rect_contains(rect: ratatui::layout::Rect, x: u16, y: u16) -> bool {
    x >= rect.x && x < rect.x + rect.width && y >= rect.y && y < rect.y + rect.height
}

// ── Navigation ──────────────────────────────────────────────────────────

fn navigate(model: &mut Model, dx: isize, dy: isize) -> Vec<UiEffect> {
    match model.focus_pane {
        Pane::Summary => {
            if model.rows.is_empty() {
                return Vec::new();
            }
            let (row, col) = model.cursor;
            let new_row = add_clamped(row, dy, model.rows.len() - 1);
            let cols = model.rows[new_row].entries.len();
            let new_col = add_clamped(col, dx, cols.saturating_sub(1));
            if (new_row, new_col) == model.cursor {
                return Vec::new();
            }
            model.cursor = (new_row, new_col);
            keep_cursor_visible(model);
            focus_effects(model)
        }
        Pane::Result => scroll_result(model, dx, dy),
    }
}

fn page(model: &mut Model, direction: isize) -> Vec<UiEffect> {
    match model.focus_pane {
        Pane::Summary => {
            let height = inner_rect(model.layout.summary)
                .map(|r| r.height as isize)
                .unwrap_or(10)
                .max(1);
            navigate(model, 0, direction * (height - 1).max(1))
        }
        Pane::Result => {
            let height = inner_rect(model.layout.result)
                .map(|r| r.height as isize)
                .unwrap_or(10)
                .max(1);
            scroll_result(model, 0, direction * (height - 1).max(1))
        }
    }
}

fn jump_edge(model: &mut Model, home: bool) -> Vec<UiEffect> {
    match model.focus_pane {
        Pane::Summary => {
            if model.rows.is_empty() {
                return Vec::new();
            }
            model.cursor.0 = if home { 0 } else { model.rows.len() - 1 };
            model.clamp_cursor();
            keep_cursor_visible(model);
            focus_effects(model)
        }
        Pane::Result => {
            if let Some(entry) = model.current_entry_mut() {
                if home {
                    entry.scroll = (0, 0);
                } else {
                    entry.scroll.1 = usize::MAX; // clamped below
                }
            }
            scroll_result(model, 0, 0)
        }
    }
}

fn add_clamped(value: usize, delta: isize, max: usize) -> usize {
    let moved = value as isize + delta;
    moved.clamp(0, max as isize) as usize
}

/// Scrolls the result portal, clamped to the body bounds.
fn scroll_result(model: &mut Model, dx: isize, dy: isize) -> Vec<UiEffect> {
    let viewport = inner_rect(model.layout.result);
    let Some(entry) = model.current_entry_mut() else {
        return Vec::new();
    };
    let (body_width, body_height) = match &entry.body {
        Some(body) => {
            let lines = body.lines();
            let width = lines.iter().map(|l| l.width()).max().unwrap_or(0);
            (width, lines.len())
        }
        None => (0, 0),
    };
    let (view_w, view_h) = viewport
        .map(|r| (r.width as usize, r.height as usize))
        .unwrap_or((1, 1));
    let max_x = body_width.saturating_sub(view_w);
    let max_y = body_height.saturating_sub(view_h);
    entry.scroll.0 = add_clamped_saturating(entry.scroll.0, dx).min(max_x);
    entry.scroll.1 = add_clamped_saturating(entry.scroll.1, dy).min(max_y);
    Vec::new()
}

fn add_clamped_saturating(value: usize, delta: isize) -> usize {
    if delta.is_negative() {
        value.saturating_sub(delta.unsigned_abs())
    } else {
        value.saturating_add(delta as usize)
    }
}

/// Scrolls the summary so the cursor row stays on screen.
fn keep_cursor_visible(model: &mut Model) {
    let Some(inner) = inner_rect(model.layout.summary) else {
        return;
    };
    let height = inner.height as usize;
    if height == 0 {
        return;
    }
    let row = model.cursor.0;
    if row < model.summary_scroll {
        model.summary_scroll = row;
    } else if row >= model.summary_scroll + height {
        model.summary_scroll = row + 1 - height;
    }
    let max_scroll = model.rows.len().saturating_sub(height);
    model.summary_scroll = model.summary_scroll.min(max_scroll);
}

/// Effects that follow the cursor: engine priority and lazy body load.
fn focus_effects(model: &mut Model) -> Vec<UiEffect> {
    let mut effects = vec![UiEffect::Engine(EngineCommand::SetFocus {
        pos: model.cursor_pos(),
        focus: model.current_key(),
    })];
    if let Some(effect) = body_load_effect(model) {
        effects.push(effect);
    }
    effects
}

fn body_load_effect(model: &Model) -> Option<UiEffect> {
    let key = model.current_key()?;
    let entry = model.current_entry()?;
    if entry.body.is_none() {
        if let Some(digest) = &entry.body_ref {
            return Some(UiEffect::LoadBody {
                key,
                digest: digest.clone(),
            });
        }
    }
    None
}

// ── Commands ────────────────────────────────────────────────────────────

fn toggle_sort(model: &mut Model) -> Vec<UiEffect> {
    model.sort = model.sort.toggled();
    model.resort_rows();
    model.status_dirty = true;
    model.log_message(format!("Ordering files by {}.", model.sort.label()));
    let mut effects = vec![UiEffect::Engine(EngineCommand::SetPositions(
        model.positions(),
    ))];
    effects.extend(focus_effects(model));
    effects
}

fn toggle_pause(model: &mut Model) -> Vec<UiEffect> {
    model.paused = !model.paused;
    model.status_dirty = true;
    let paused = model.paused;
    for row in &mut model.rows {
        for entry in &mut row.entries {
            if paused {
                if entry.status == Status::Running {
                    entry.paused_display = true;
                }
            } else {
                entry.paused_display = false;
            }
        }
    }
    model.log_message(if paused {
        "Paused workers."
    } else {
        "Running workers..."
    });
    vec![UiEffect::Engine(EngineCommand::SetPaused(paused))]
}

fn refresh_current(model: &mut Model) -> Vec<UiEffect> {
    let (row, col) = model.cursor;
    let Some(entry) = model.current_entry() else {
        return Vec::new();
    };
    if matches!(entry.status, Status::Pending | Status::Running) {
        return Vec::new();
    }
    let message = format!(
        "Refreshing {} result of {}...",
        entry.tool.name,
        model.rows[row].path
    );
    if let Some(entry) = model.current_entry_mut() {
        entry.status = Status::Pending;
        entry.body = None;
        entry.body_ref = None;
        entry.scroll = (0, 0);
    }
    model.status_dirty = true;
    model.log_message(message);
    match model.build_request(row, col, false) {
        Some(request) => vec![UiEffect::Engine(EngineCommand::Enqueue(vec![request]))],
        None => Vec::new(),
    }
}

fn refresh_tool(model: &mut Model) -> Vec<UiEffect> {
    let Some(tool) = model.current_entry().map(|e| e.tool.name) else {
        return Vec::new();
    };
    let mut requests: Vec<JobRequest> = Vec::new();
    for row_index in 0..model.rows.len() {
        for col_index in 0..model.rows[row_index].entries.len() {
            let entry = &mut model.rows[row_index].entries[col_index];
            if entry.tool.name != tool
                || matches!(entry.status, Status::Pending | Status::Running)
            {
                continue;
            }
            entry.status = Status::Pending;
            entry.body = None;
            entry.body_ref = None;
            entry.scroll = (0, 0);
            if let Some(request) = model.build_request(row_index, col_index, true) {
                requests.push(request);
            }
        }
    }
    if requests.is_empty() {
        return Vec::new();
    }
    model.status_dirty = true;
    model.log_message(format!("Refreshing all {tool} results ({}).", requests.len()));
    vec![UiEffect::Engine(EngineCommand::Enqueue(requests))]
}

fn jump_to_issue(model: &mut Model, same_tool: bool) -> Vec<UiEffect> {
    if model.move_to_next_issue(same_tool) {
        keep_cursor_visible(model);
        focus_effects(model)
    } else {
        Vec::new()
    }
}

fn edit_current(model: &mut Model) -> Vec<UiEffect> {
    let Some(row) = model.current_row() else {
        return Vec::new();
    };
    let path = row.path.clone();
    match model.editor.clone() {
        Some(editor) => {
            model.log_message(format!("Editing {path} with \"{editor}\"..."));
            vec![UiEffect::SpawnEditor { path }]
        }
        None => {
            model.log_message("No editor configured. Set $EDITOR or use --editor.");
            Vec::new()
        }
    }
}

fn open_current(model: &mut Model) -> Vec<UiEffect> {
    let Some(row) = model.current_row() else {
        return Vec::new();
    };
    let path = row.path.clone();
    model.log_message(format!("Opening {path}..."));
    vec![UiEffect::OpenPath { path }]
}

// ── Filesystem events ───────────────────────────────────────────────────

fn on_fs(model: &mut Model, event: FsEvent) -> Vec<UiEffect> {
    match event {
        FsEvent::Added { path, snapshot } => {
            if model.row_index(&path).is_some() {
                return on_fs(model, FsEvent::Modified { path, snapshot });
            }
            add_row(model, path, snapshot)
        }
        FsEvent::Modified { path, snapshot } => modify_row(model, &path, snapshot),
        FsEvent::Removed { path } => remove_row(model, &path),
    }
}

fn add_row(model: &mut Model, path: String, snapshot: FileSnapshot) -> Vec<UiEffect> {
    let abs = lookout_core::snapshot::abs_path(&model.root, &path);
    let tools = model.registry.tools_for(&path, &abs);
    let entries = tools
        .into_iter()
        .map(|tool| crate::state::EntrySlot::new_pending(tool, &snapshot))
        .collect();
    model.rows.push(RowState {
        path: path.clone(),
        snapshot,
        entries,
    });
    model.resort_rows();
    model.status_dirty = true;
    model.log_message(format!("Added {path}."));

    let row_index = model.row_index(&path).unwrap_or(0);
    let requests: Vec<JobRequest> = (0..model.rows[row_index].entries.len())
        .filter_map(|col| model.build_request(row_index, col, false))
        .collect();
    let mut effects = vec![
        UiEffect::Engine(EngineCommand::SetPositions(model.positions())),
        UiEffect::Engine(EngineCommand::Enqueue(requests)),
    ];
    effects.extend(focus_effects(model));
    effects
}

fn modify_row(model: &mut Model, path: &str, snapshot: FileSnapshot) -> Vec<UiEffect> {
    let Some(row_index) = model.row_index(path) else {
        // Unknown path: treat as an addition.
        return add_row(model, path.to_string(), snapshot);
    };
    let mut requests = Vec::new();
    {
        let row = &mut model.rows[row_index];
        row.snapshot = snapshot;
        for entry in &mut row.entries {
            let fresh = lookout_core::report::SnapshotKey::new(&snapshot, entry.tool.version_tag);
            if entry.snapshot_key == fresh {
                continue;
            }
            entry.snapshot_key = fresh;
            if entry.status != Status::Running {
                entry.status = Status::Pending;
                entry.body = None;
                entry.body_ref = None;
            }
        }
    }
    for col in 0..model.rows[row_index].entries.len() {
        let entry = &model.rows[row_index].entries[col];
        if matches!(entry.status, Status::Pending | Status::Running) {
            if let Some(request) = model.build_request(row_index, col, false) {
                requests.push(request);
            }
        }
    }
    model.status_dirty = true;
    vec![
        UiEffect::Engine(EngineCommand::DropPending {
            path: path.to_string(),
        }),
        UiEffect::Engine(EngineCommand::Enqueue(requests)),
    ]
}

fn remove_row(model: &mut Model, path: &str) -> Vec<UiEffect> {
    let Some(row_index) = model.row_index(path) else {
        return Vec::new();
    };
    model.rows.remove(row_index);
    model.clamp_cursor();
    keep_cursor_visible(model);
    model.status_dirty = true;
    model.log_message(format!("Removed {path}."));
    let mut effects = vec![
        UiEffect::Engine(EngineCommand::DropPending {
            path: path.to_string(),
        }),
        UiEffect::Engine(EngineCommand::SetPositions(model.positions())),
    ];
    effects.extend(focus_effects(model));
    effects
}

// ── Engine events ───────────────────────────────────────────────────────

fn on_engine(model: &mut Model, event: EngineEvent) -> Vec<UiEffect> {
    match event {
        EngineEvent::Started { key, snapshot_key } => {
            let paused = model.paused;
            if let Some(entry) = model.entry_mut(&key) {
                if entry.snapshot_key == snapshot_key {
                    entry.status = Status::Running;
                    entry.paused_display = paused;
                }
            }
            Vec::new()
        }
        EngineEvent::Requeued { key, snapshot_key } => {
            if let Some(entry) = model.entry_mut(&key) {
                if entry.snapshot_key == snapshot_key && entry.status == Status::Running {
                    entry.status = Status::Pending;
                }
            }
            Vec::new()
        }
        EngineEvent::Finished { report } => {
            let key = report.key.clone();
            let Some(entry) = model.entry_mut(&key) else {
                debug!(%key, "report for a removed entry dropped");
                return Vec::new();
            };
            if entry.snapshot_key != report.snapshot_key {
                debug!(%key, "stale report dropped");
                return Vec::new();
            }
            entry.status = report.status;
            entry.body = Some(report.body.clone());
            entry.scroll = (0, 0);
            entry.paused_display = false;
            let mut effects = Vec::new();
            if report.status.is_terminal() {
                let digest =
                    CacheDir::blob_digest(&key.path, &key.tool, &report.content_digest);
                entry.body_ref = Some(digest);
                effects.push(UiEffect::StoreReport(Box::new(report.clone())));
            } else {
                entry.body_ref = None;
            }
            model.status_dirty = true;
            let secs = (report.finished_at - report.started_at) as f64 / 1000.0;
            model.log_message(format!(
                "Finished {} on {}: {} ({secs:.2}s)",
                key.tool,
                key.path,
                report.status.label()
            ));
            effects
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyModifiers;
    use lookout_core::cache::StatusDb;
    use lookout_core::config::Config;
    use lookout_core::report::{EntryKey, Report, SnapshotKey};
    use lookout_core::textstyle::StyledText;
    use lookout_core::toolkit::ToolRegistry;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn snap(seed: u64) -> FileSnapshot {
        FileSnapshot {
            size: seed,
            mtime_ns: seed as i64,
            mode: 0o100644,
            ino: seed,
            dev: 1,
        }
    }

    /// A model over builtin-only tools (no PATH dependencies): each row
    /// gets `contents` and `metadata` entries.
    fn model_with(paths: &[&str]) -> Model {
        let config = Config::new(PathBuf::from("/codebase"));
        let registry = ToolRegistry::probe_with_path(Some(""));
        let mut scan = BTreeMap::new();
        for (index, path) in paths.iter().enumerate() {
            scan.insert(path.to_string(), snap(index as u64 + 1));
        }
        let (mut model, _jobs) = Model::new(&config, registry, scan, None::<StatusDb>);
        // Give layout a realistic size so scrolling math works.
        let _ = update(
            &mut model,
            UiEvent::Frame {
                width: 100,
                height: 40,
            },
        );
        model
    }

    fn key(code: KeyCode) -> UiEvent {
        UiEvent::Terminal(Event::Key(KeyEvent::new(code, KeyModifiers::NONE)))
    }

    fn finished_report(model: &Model, row: usize, col: usize, status: Status) -> Report {
        let row_state = &model.rows[row];
        let entry = &row_state.entries[col];
        Report {
            key: EntryKey::new(row_state.path.clone(), entry.tool.name),
            snapshot_key: entry.snapshot_key.clone(),
            status,
            body: StyledText::plain("body"),
            content_digest: "cd".to_string(),
            started_at: 0,
            finished_at: 1500,
        }
    }

    #[test]
    fn quit_key_emits_the_quit_effect() {
        let mut model = model_with(&["a.py"]);
        let effects = update(&mut model, key(KeyCode::Char('q')));
        assert!(matches!(effects.as_slice(), [UiEffect::Quit]));
    }

    #[test]
    fn sort_toggle_reorders_rows_and_repositions_jobs() {
        let mut model = model_with(&["b/x.py", "a/y.sh"]);
        // DirThenType puts a/y.sh first.
        assert_eq!(model.rows[0].path, "a/y.sh");
        let effects = update(&mut model, key(KeyCode::Char('s')));
        // TypeThenDir sorts by extension: .py before .sh.
        assert_eq!(model.rows[0].path, "b/x.py");
        assert!(matches!(
            effects.first(),
            Some(UiEffect::Engine(EngineCommand::SetPositions(_)))
        ));
        assert!(effects
            .iter()
            .any(|e| matches!(e, UiEffect::Engine(EngineCommand::SetFocus { .. }))));
    }

    #[test]
    fn arrows_move_and_clamp_at_the_edges() {
        let mut model = model_with(&["a.py", "b.py", "c.py"]);
        assert_eq!(model.cursor, (0, 0));
        update(&mut model, key(KeyCode::Up));
        assert_eq!(model.cursor, (0, 0));
        update(&mut model, key(KeyCode::Down));
        assert_eq!(model.cursor, (1, 0));
        update(&mut model, key(KeyCode::Right));
        assert_eq!(model.cursor, (1, 1));
        update(&mut model, key(KeyCode::End));
        assert_eq!(model.cursor.0, 2);
    }

    #[test]
    fn cursor_movement_updates_engine_focus() {
        let mut model = model_with(&["a.py", "b.py"]);
        let effects = update(&mut model, key(KeyCode::Down));
        let focus = effects.iter().find_map(|e| match e {
            UiEffect::Engine(EngineCommand::SetFocus { pos, focus }) => {
                Some((*pos, focus.clone()))
            }
            _ => None,
        });
        let (pos, focus) = focus.expect("focus effect");
        assert_eq!(pos, (0, 1));
        assert_eq!(focus.unwrap().path, model.rows[1].path);
    }

    #[test]
    fn removing_the_last_row_clamps_the_cursor() {
        let mut model = model_with(&["a.py", "b.py"]);
        update(&mut model, key(KeyCode::End));
        assert_eq!(model.cursor.0, 1);
        let removed = model.rows[1].path.clone();
        update(
            &mut model,
            UiEvent::Fs(FsEvent::Removed { path: removed }),
        );
        assert_eq!(model.rows.len(), 1);
        assert_eq!(model.cursor.0, 0);
    }

    #[test]
    fn fresh_reports_apply_and_persist_stale_ones_drop() {
        let mut model = model_with(&["a.py"]);
        let fresh = finished_report(&model, 0, 0, Status::Ok);
        let effects = update(
            &mut model,
            UiEvent::Engine(EngineEvent::Finished {
                report: fresh.clone(),
            }),
        );
        assert_eq!(model.rows[0].entries[0].status, Status::Ok);
        assert!(model.rows[0].entries[0].body_ref.is_some());
        assert!(matches!(
            effects.as_slice(),
            [UiEffect::StoreReport(_)]
        ));

        // A report keyed to an older snapshot is dropped.
        let mut stale = finished_report(&model, 0, 0, Status::Problem);
        stale.snapshot_key.mtime_ns += 999;
        update(
            &mut model,
            UiEvent::Engine(EngineEvent::Finished { report: stale }),
        );
        assert_eq!(model.rows[0].entries[0].status, Status::Ok);
    }

    #[test]
    fn not_applicable_bodies_are_never_persisted() {
        let mut model = model_with(&["a.py"]);
        let report = finished_report(&model, 0, 0, Status::NotApplicable);
        let effects = update(
            &mut model,
            UiEvent::Engine(EngineEvent::Finished { report }),
        );
        assert!(effects.is_empty());
        assert_eq!(model.rows[0].entries[0].body_ref, None);
        assert!(model.rows[0].entries[0].body.is_some());
    }

    #[test]
    fn modified_files_go_back_to_pending_and_requeue() {
        let mut model = model_with(&["a.py"]);
        let ok = finished_report(&model, 0, 0, Status::Ok);
        update(&mut model, UiEvent::Engine(EngineEvent::Finished { report: ok }));

        let effects = update(
            &mut model,
            UiEvent::Fs(FsEvent::Modified {
                path: "a.py".to_string(),
                snapshot: snap(99),
            }),
        );
        let entry = &model.rows[0].entries[0];
        assert_eq!(entry.status, Status::Pending);
        assert_eq!(entry.snapshot_key, SnapshotKey::new(&snap(99), "1"));
        assert!(matches!(
            effects.first(),
            Some(UiEffect::Engine(EngineCommand::DropPending { .. }))
        ));
        let enqueued = effects.iter().find_map(|e| match e {
            UiEffect::Engine(EngineCommand::Enqueue(requests)) => Some(requests.len()),
            _ => None,
        });
        assert_eq!(enqueued, Some(model.rows[0].entries.len()));
    }

    #[test]
    fn running_entries_keep_running_on_modify_but_get_requeued() {
        let mut model = model_with(&["a.py"]);
        model.rows[0].entries[0].status = Status::Running;
        update(
            &mut model,
            UiEvent::Fs(FsEvent::Modified {
                path: "a.py".to_string(),
                snapshot: snap(77),
            }),
        );
        let entry = &model.rows[0].entries[0];
        assert_eq!(entry.status, Status::Running);
        assert_eq!(entry.snapshot_key, SnapshotKey::new(&snap(77), "1"));
    }

    #[test]
    fn next_issue_wraps_and_can_filter_by_tool() {
        let mut model = model_with(&["a.py", "b.py", "c.py"]);
        // Mark b.py's metadata entry and a.py's contents entry as issues.
        model.rows[1].entries[1].status = Status::Problem;
        model.rows[0].entries[0].status = Status::Error;
        update(&mut model, key(KeyCode::Char('n')));
        assert_eq!(model.cursor, (1, 1));
        // Wraps around past the end back to (0, 0).
        update(&mut model, key(KeyCode::Char('n')));
        assert_eq!(model.cursor, (0, 0));

        // Same-tool navigation from a contents cell skips the metadata
        // issue.
        model.rows[2].entries[0].status = Status::TimedOut;
        update(&mut model, key(KeyCode::Char('N')));
        assert_eq!(model.cursor, (2, 0));
    }

    #[test]
    fn pause_marks_running_entries_and_commands_the_engine() {
        let mut model = model_with(&["a.py"]);
        model.rows[0].entries[0].status = Status::Running;
        let effects = update(&mut model, key(KeyCode::Char('p')));
        assert!(model.paused);
        assert_eq!(
            model.rows[0].entries[0].display_status(),
            Status::Paused
        );
        assert!(matches!(
            effects.as_slice(),
            [UiEffect::Engine(EngineCommand::SetPaused(true))]
        ));
        update(&mut model, key(KeyCode::Char('p')));
        assert_eq!(model.rows[0].entries[0].display_status(), Status::Running);
    }

    #[test]
    fn refresh_resets_the_entry_and_enqueues() {
        let mut model = model_with(&["a.py"]);
        let ok = finished_report(&model, 0, 0, Status::Ok);
        update(&mut model, UiEvent::Engine(EngineEvent::Finished { report: ok }));
        let effects = update(&mut model, key(KeyCode::Char('r')));
        assert_eq!(model.rows[0].entries[0].status, Status::Pending);
        assert!(model.rows[0].entries[0].body_ref.is_none());
        assert!(matches!(
            effects.as_slice(),
            [UiEffect::Engine(EngineCommand::Enqueue(reqs))] if reqs.len() == 1
        ));
        // Refreshing a pending entry is a no-op.
        assert!(update(&mut model, key(KeyCode::Char('r'))).is_empty());
    }

    #[test]
    fn refresh_all_boosts_every_entry_of_the_tool() {
        let mut model = model_with(&["a.py", "b.py"]);
        for row in 0..2 {
            let report = finished_report(&model, row, 0, Status::Ok);
            update(&mut model, UiEvent::Engine(EngineEvent::Finished { report }));
        }
        let effects = update(&mut model, key(KeyCode::Char('R')));
        let requests = effects
            .iter()
            .find_map(|e| match e {
                UiEffect::Engine(EngineCommand::Enqueue(reqs)) => Some(reqs),
                _ => None,
            })
            .expect("enqueue effect");
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| r.boosted));
    }

    #[test]
    fn help_captures_keys_while_visible() {
        let mut model = model_with(&["a.py"]);
        update(&mut model, key(KeyCode::Char('h')));
        assert!(model.help_visible);
        // q closes help instead of quitting.
        let effects = update(&mut model, key(KeyCode::Char('q')));
        assert!(effects.is_empty());
        assert!(!model.help_visible);
    }

    #[test]
    fn restart_restores_terminal_statuses_from_the_aggregate() {
        let mut model = model_with(&["a.py", "b.py"]);
        let ok = finished_report(&model, 0, 0, Status::Ok);
        update(&mut model, UiEvent::Engine(EngineEvent::Finished { report: ok }));
        let db = model.to_status_db();

        // Same snapshots on relaunch: the stored report is vouched for,
        // so the entry comes back terminal with no job enqueued.
        let config = Config::new(PathBuf::from("/codebase"));
        let mut scan = BTreeMap::new();
        scan.insert("a.py".to_string(), snap(1));
        scan.insert("b.py".to_string(), snap(2));
        let registry = ToolRegistry::probe_with_path(Some(""));
        let (restored, jobs) = Model::new(&config, registry, scan.clone(), Some(db.clone()));
        assert_eq!(restored.rows[0].entries[0].status, Status::Ok);
        assert!(restored.rows[0].entries[0].body_ref.is_some());
        assert!(
            !jobs
                .iter()
                .any(|j| j.key == EntryKey::new("a.py", "contents"))
        );
        assert_eq!(jobs.len(), restored.entry_total() - 1);

        // A changed snapshot invalidates the stored report.
        scan.insert("a.py".to_string(), snap(42));
        let registry = ToolRegistry::probe_with_path(Some(""));
        let (fresh, jobs) = Model::new(&config, registry, scan, Some(db));
        assert_eq!(fresh.rows[0].entries[0].status, Status::Pending);
        assert_eq!(jobs.len(), fresh.entry_total());
    }

    #[test]
    fn tick_debounces_status_persistence() {
        let mut model = model_with(&["a.py"]);
        model.status_dirty = true;
        model.last_persist = std::time::Instant::now() - Duration::from_secs(2);
        let effects = update(&mut model, UiEvent::Tick);
        assert!(matches!(effects.as_slice(), [UiEffect::PersistStatus]));
        assert!(!model.status_dirty);
        // Immediately after, nothing more to do.
        model.status_dirty = true;
        assert!(update(&mut model, UiEvent::Tick).is_empty());
    }
}
