//! Application state.
//!
//! [`Model`] is the single source of truth: the summary rows with their
//! per-tool entry slots, the cursor, pane flags, the activity log, and
//! the bits of layout the reducer needs for mouse hit-testing. The
//! reducer in [`crate::update`] is the only mutator.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::path::PathBuf;

use lookout_core::cache::{EntryRecord, StatusDb, UiStateRecord};
use lookout_core::config::Config;
use lookout_core::engine::JobRequest;
use lookout_core::report::{EntryKey, SnapshotKey, Status};
use lookout_core::snapshot::{self, FileSnapshot};
use lookout_core::textstyle::{ColorSpec, Style, StyledText};
use lookout_core::toolkit::{ToolDescriptor, ToolRegistry, split_ext};

use crate::layout::PaneLayout;
use crate::lscolors::PathPalette;
use crate::theme::ColorMode;

/// Bounded activity log shown in the log pane.
const LOG_CAPACITY: usize = 200;

/// Which pane has keyboard focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pane {
    Summary,
    Result,
}

/// Row ordering of the summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortMode {
    /// Directory, then extension, then name.
    DirThenType,
    /// Extension, then directory, then name.
    TypeThenDir,
}

impl SortMode {
    pub fn toggled(self) -> Self {
        match self {
            SortMode::DirThenType => SortMode::TypeThenDir,
            SortMode::TypeThenDir => SortMode::DirThenType,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SortMode::DirThenType => "directory",
            SortMode::TypeThenDir => "type",
        }
    }
}

/// Result pane placement relative to the summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Landscape,
    Portrait,
}

impl Orientation {
    pub fn toggled(self) -> Self {
        match self {
            Orientation::Landscape => Orientation::Portrait,
            Orientation::Portrait => Orientation::Landscape,
        }
    }
}

/// One (path, tool) cell.
#[derive(Debug)]
pub struct EntrySlot {
    pub tool: &'static ToolDescriptor,
    pub snapshot_key: SnapshotKey,
    pub status: Status,
    /// In-memory body; may be absent with only `body_ref` persisted.
    pub body: Option<StyledText>,
    /// Blob digest of the persisted body.
    pub body_ref: Option<String>,
    /// Result pane scroll position, kept per entry.
    pub scroll: (usize, usize),
    /// The job was running when the user paused.
    pub paused_display: bool,
}

impl EntrySlot {
    /// A fresh pending slot for one tool on one snapshot.
    pub fn new_pending(tool: &'static ToolDescriptor, snapshot: &FileSnapshot) -> Self {
        Self {
            tool,
            snapshot_key: SnapshotKey::new(snapshot, tool.version_tag),
            status: Status::Pending,
            body: None,
            body_ref: None,
            scroll: (0, 0),
            paused_display: false,
        }
    }

    /// What the grid shows; running jobs read as paused while the pool
    /// is paused.
    pub fn display_status(&self) -> Status {
        if self.paused_display && self.status == Status::Running {
            Status::Paused
        } else {
            self.status
        }
    }

    /// Whether this entry has reached a state that counts as done for
    /// the progress indicator.
    pub fn is_settled(&self) -> bool {
        !matches!(self.status, Status::Pending | Status::Running)
    }
}

/// One file of the summary.
#[derive(Debug)]
pub struct RowState {
    pub path: String,
    pub snapshot: FileSnapshot,
    pub entries: Vec<EntrySlot>,
}

impl RowState {
    pub fn sort_key(&self, mode: SortMode) -> (String, String, String) {
        let (dir, base) = match self.path.rsplit_once('/') {
            Some((dir, base)) => (dir.to_string(), base.to_string()),
            None => (String::new(), self.path.clone()),
        };
        let ext = split_ext(&self.path).1.unwrap_or("").to_string();
        match mode {
            SortMode::DirThenType => (dir, ext, base),
            SortMode::TypeThenDir => (ext, dir, base),
        }
    }
}

/// Timestamped, bounded activity log.
#[derive(Debug, Default)]
pub struct LogBuffer {
    lines: VecDeque<StyledText>,
}

impl LogBuffer {
    pub fn push(&mut self, message: StyledText) {
        let stamp = chrono::Local::now().format("%H:%M:%S").to_string();
        let stamp_style = Style::fg(ColorSpec::Indexed(8)).with_bold();
        let line = StyledText::styled(stamp, stamp_style)
            .concat(&StyledText::plain(" "))
            .concat(&message);
        self.lines.push_back(line);
        while self.lines.len() > LOG_CAPACITY {
            self.lines.pop_front();
        }
    }

    pub fn lines(&self) -> impl Iterator<Item = &StyledText> {
        self.lines.iter()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// The whole UI state.
pub struct Model {
    pub root: PathBuf,
    pub root_name: String,
    pub registry: ToolRegistry,
    pub rows: Vec<RowState>,
    /// (row, column) into `rows`; always clamped to an existing cell.
    pub cursor: (usize, usize),
    pub focus_pane: Pane,
    pub sort: SortMode,
    pub orientation: Orientation,
    pub log_visible: bool,
    pub fullscreen: bool,
    pub help_visible: bool,
    pub help_scroll: usize,
    pub paused: bool,
    pub should_quit: bool,
    /// First visible summary row.
    pub summary_scroll: usize,
    pub term_size: (u16, u16),
    pub layout: PaneLayout,
    pub log: LogBuffer,
    /// The status aggregate needs rewriting (debounced).
    pub status_dirty: bool,
    /// Last aggregate write, for the debounce.
    pub last_persist: std::time::Instant,
    pub mode: ColorMode,
    pub paths: PathPalette,
    pub editor: Option<String>,
}

impl Model {
    /// Builds the model from the initial scan plus whatever the cache
    /// aggregate still vouches for. Returns the model and the jobs that
    /// need running.
    pub fn new(
        config: &Config,
        registry: ToolRegistry,
        scan: std::collections::BTreeMap<String, FileSnapshot>,
        restored: Option<StatusDb>,
    ) -> (Self, Vec<JobRequest>) {
        let ui = restored
            .as_ref()
            .map(|db| db.ui.clone())
            .unwrap_or_default();
        let mut records: HashMap<(String, String), EntryRecord> = restored
            .map(|db| {
                db.entries
                    .into_iter()
                    .map(|r| ((r.path.clone(), r.tool.clone()), r))
                    .collect()
            })
            .unwrap_or_default();

        let mut rows = Vec::with_capacity(scan.len());
        for (path, snapshot) in scan {
            let abs = snapshot::abs_path(&config.root, &path);
            let tools = registry.tools_for(&path, &abs);
            let mut entries = Vec::with_capacity(tools.len());
            for tool in tools {
                let mut slot = EntrySlot::new_pending(tool, &snapshot);
                if let Some(record) = records.remove(&(path.clone(), tool.name.to_string())) {
                    let fresh = record.key.matches(&snapshot)
                        && record.key.tool_tag == tool.version_tag;
                    let restorable =
                        record.status.is_terminal() || record.status == Status::NotApplicable;
                    if fresh && restorable {
                        slot.status = record.status;
                        slot.body_ref = record.body_ref;
                    }
                }
                entries.push(slot);
            }
            rows.push(RowState {
                path,
                snapshot,
                entries,
            });
        }

        let mut model = Self {
            root: config.root.clone(),
            root_name: config
                .root
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| config.root.display().to_string()),
            registry,
            rows,
            cursor: (ui.cursor_row, ui.cursor_col),
            focus_pane: Pane::Summary,
            sort: if ui.sort_by_dir {
                SortMode::DirThenType
            } else {
                SortMode::TypeThenDir
            },
            orientation: if ui.portrait {
                Orientation::Portrait
            } else {
                Orientation::Landscape
            },
            log_visible: ui.log_visible,
            fullscreen: false,
            help_visible: false,
            help_scroll: 0,
            paused: ui.paused,
            should_quit: false,
            summary_scroll: 0,
            term_size: (80, 24),
            layout: PaneLayout::default(),
            log: LogBuffer::default(),
            status_dirty: false,
            last_persist: std::time::Instant::now(),
            mode: ColorMode::new(config.truecolor, config.theme),
            paths: PathPalette::from_env(config.ls_colors.as_deref()),
            editor: config.editor.clone(),
        };
        model.resort_rows();
        model.clamp_cursor();
        let jobs = model.pending_requests();
        (model, jobs)
    }

    // ── Row and entry access ────────────────────────────────────────

    pub fn current_row(&self) -> Option<&RowState> {
        self.rows.get(self.cursor.0)
    }

    pub fn current_entry(&self) -> Option<&EntrySlot> {
        self.current_row()?.entries.get(self.cursor.1)
    }

    pub fn current_entry_mut(&mut self) -> Option<&mut EntrySlot> {
        let (row, col) = self.cursor;
        self.rows.get_mut(row)?.entries.get_mut(col)
    }

    pub fn current_key(&self) -> Option<EntryKey> {
        let row = self.current_row()?;
        let entry = row.entries.get(self.cursor.1)?;
        Some(EntryKey::new(row.path.clone(), entry.tool.name))
    }

    pub fn row_index(&self, path: &str) -> Option<usize> {
        self.rows.iter().position(|row| row.path == path)
    }

    /// Locates an entry by key, as (row, col).
    pub fn locate(&self, key: &EntryKey) -> Option<(usize, usize)> {
        let row = self.row_index(&key.path)?;
        let col = self.rows[row]
            .entries
            .iter()
            .position(|e| e.tool.name == key.tool)?;
        Some((row, col))
    }

    pub fn entry_mut(&mut self, key: &EntryKey) -> Option<&mut EntrySlot> {
        let (row, col) = self.locate(key)?;
        self.rows.get_mut(row)?.entries.get_mut(col)
    }

    // ── Ordering and cursor ─────────────────────────────────────────

    /// Sorts rows under the current mode, keeping the cursor on the
    /// same file.
    pub fn resort_rows(&mut self) {
        let selected = self.current_row().map(|row| row.path.clone());
        let mode = self.sort;
        self.rows.sort_by_key(|row| row.sort_key(mode));
        if let Some(path) = selected {
            if let Some(index) = self.row_index(&path) {
                self.cursor.0 = index;
            }
        }
        self.clamp_cursor();
    }

    /// Keeps the cursor on an existing cell; clamps, never teleports.
    pub fn clamp_cursor(&mut self) {
        if self.rows.is_empty() {
            self.cursor = (0, 0);
            return;
        }
        self.cursor.0 = self.cursor.0.min(self.rows.len() - 1);
        let cols = self.rows[self.cursor.0].entries.len();
        self.cursor.1 = self.cursor.1.min(cols.saturating_sub(1));
    }

    /// The widest row, in cells.
    pub fn max_columns(&self) -> usize {
        self.rows
            .iter()
            .map(|row| row.entries.len())
            .max()
            .unwrap_or(0)
    }

    /// Cursor in grid coordinates for proximity scoring.
    pub fn cursor_pos(&self) -> (u16, u16) {
        (self.cursor.1 as u16, self.cursor.0 as u16)
    }

    // ── Job plumbing ────────────────────────────────────────────────

    pub fn build_request(&self, row: usize, col: usize, boosted: bool) -> Option<JobRequest> {
        let row_state = self.rows.get(row)?;
        let entry = row_state.entries.get(col)?;
        Some(JobRequest {
            key: EntryKey::new(row_state.path.clone(), entry.tool.name),
            abs_path: snapshot::abs_path(&self.root, &row_state.path),
            snapshot_key: entry.snapshot_key.clone(),
            timeout_s: entry.tool.timeout_s,
            pos: (col as u16, row as u16),
            boosted,
        })
    }

    /// Requests for every entry still pending.
    pub fn pending_requests(&self) -> Vec<JobRequest> {
        let mut out = Vec::new();
        for (row_index, row) in self.rows.iter().enumerate() {
            for (col_index, entry) in row.entries.iter().enumerate() {
                if entry.status == Status::Pending {
                    if let Some(request) = self.build_request(row_index, col_index, false) {
                        out.push(request);
                    }
                }
            }
        }
        out
    }

    /// Grid positions of every entry, for engine rescoring.
    pub fn positions(&self) -> Vec<(EntryKey, (u16, u16))> {
        let mut out = Vec::new();
        for (row_index, row) in self.rows.iter().enumerate() {
            for (col_index, entry) in row.entries.iter().enumerate() {
                out.push((
                    EntryKey::new(row.path.clone(), entry.tool.name),
                    (col_index as u16, row_index as u16),
                ));
            }
        }
        out
    }

    // ── Issue navigation ────────────────────────────────────────────

    /// Moves to the next issue after the cursor, wrapping; optionally
    /// restricted to the tool under the cursor.
    pub fn move_to_next_issue(&mut self, same_tool: bool) -> bool {
        if self.rows.is_empty() {
            return false;
        }
        let tool = self.current_entry().map(|e| e.tool.name);
        let total: usize = self.rows.iter().map(|row| row.entries.len()).sum();
        let (mut row, mut col) = self.cursor;
        for _ in 0..total {
            col += 1;
            while col >= self.rows[row].entries.len() {
                col = 0;
                row = (row + 1) % self.rows.len();
            }
            let entry = &self.rows[row].entries[col];
            if entry.status.is_issue() && (!same_tool || Some(entry.tool.name) == tool) {
                self.cursor = (row, col);
                return true;
            }
        }
        false
    }

    // ── Progress ────────────────────────────────────────────────────

    pub fn entry_total(&self) -> usize {
        self.rows.iter().map(|row| row.entries.len()).sum()
    }

    pub fn settled_total(&self) -> usize {
        self.rows
            .iter()
            .flat_map(|row| row.entries.iter())
            .filter(|entry| entry.is_settled())
            .count()
    }

    // ── Logging ─────────────────────────────────────────────────────

    pub fn log_message(&mut self, message: impl Into<String>) {
        self.log.push(StyledText::plain(message.into()));
    }

    pub fn log_styled(&mut self, message: StyledText) {
        self.log.push(message);
    }

    // ── Persistence ─────────────────────────────────────────────────

    /// The aggregate to persist: every entry's latest state plus the UI
    /// bits worth restoring.
    pub fn to_status_db(&self) -> StatusDb {
        let mut entries = Vec::with_capacity(self.entry_total());
        for row in &self.rows {
            for entry in &row.entries {
                entries.push(EntryRecord {
                    path: row.path.clone(),
                    tool: entry.tool.name.to_string(),
                    key: entry.snapshot_key.clone(),
                    status: entry.status,
                    body_ref: entry.body_ref.clone(),
                });
            }
        }
        StatusDb {
            entries,
            ui: UiStateRecord {
                cursor_row: self.cursor.0,
                cursor_col: self.cursor.1,
                sort_by_dir: self.sort == SortMode::DirThenType,
                portrait: self.orientation == Orientation::Portrait,
                paused: self.paused,
                log_visible: self.log_visible,
            },
        }
    }

    /// Blob digests still referenced, for startup garbage collection.
    pub fn referenced_blobs(&self) -> std::collections::HashSet<String> {
        self.rows
            .iter()
            .flat_map(|row| row.entries.iter())
            .filter_map(|entry| entry.body_ref.clone())
            .collect()
    }
}
