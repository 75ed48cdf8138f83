//! Report data model: statuses, snapshot keys, and finished reports.

use serde::{Deserialize, Serialize};

use crate::snapshot::FileSnapshot;
use crate::textstyle::StyledText;

/// The state of one (path, tool) cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Not yet run for the current snapshot.
    Pending,
    /// Assigned to a worker.
    Running,
    /// Tool ran and reported success.
    Ok,
    /// Tool ran to completion but reported defects.
    Problem,
    /// Tool declined the file.
    NotApplicable,
    /// Exceeded its timeout.
    TimedOut,
    /// Crashed, missing executable, or unclassifiable failure.
    Error,
    /// Was running when the user paused; resumable.
    Paused,
}

impl Status {
    /// Terminal statuses carry a persisted body; the rest do not.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Status::Ok | Status::Problem | Status::TimedOut | Status::Error
        )
    }

    /// "Issues" are what `n`/`N` navigation jumps between.
    pub fn is_issue(self) -> bool {
        matches!(self, Status::Problem | Status::TimedOut | Status::Error)
    }

    pub fn label(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Running => "running",
            Status::Ok => "ok",
            Status::Problem => "problem",
            Status::NotApplicable => "not applicable",
            Status::TimedOut => "timed out",
            Status::Error => "error",
            Status::Paused => "paused",
        }
    }
}

/// Identifies one cell of the summary: a codebase-relative path plus a
/// tool name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryKey {
    pub path: String,
    pub tool: String,
}

impl EntryKey {
    pub fn new(path: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            tool: tool.into(),
        }
    }
}

impl std::fmt::Display for EntryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.tool, self.path)
    }
}

/// Identifies the inputs a report was computed from: the file's stat
/// tuple plus a tool version tag. A report is only surfaced while its
/// key matches the live snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotKey {
    pub size: u64,
    pub mtime_ns: i64,
    pub mode: u32,
    pub ino: u64,
    pub dev: u64,
    pub tool_tag: String,
}

impl SnapshotKey {
    pub fn new(snapshot: &FileSnapshot, tool_tag: &str) -> Self {
        Self {
            size: snapshot.size,
            mtime_ns: snapshot.mtime_ns,
            mode: snapshot.mode,
            ino: snapshot.ino,
            dev: snapshot.dev,
            tool_tag: tool_tag.to_string(),
        }
    }

    /// Whether this key still describes the given snapshot.
    pub fn matches(&self, snapshot: &FileSnapshot) -> bool {
        self.size == snapshot.size
            && self.mtime_ns == snapshot.mtime_ns
            && self.mode == snapshot.mode
            && self.ino == snapshot.ino
            && self.dev == snapshot.dev
    }
}

/// A finished report for one (path, tool) cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub key: EntryKey,
    pub snapshot_key: SnapshotKey,
    pub status: Status,
    pub body: StyledText,
    /// Hex SHA-256 of the file content at run time; feeds the blob digest.
    pub content_digest: String,
    /// Milliseconds since the Unix epoch.
    pub started_at: i64,
    pub finished_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_are_exactly_the_body_carrying_ones() {
        let terminal = [Status::Ok, Status::Problem, Status::TimedOut, Status::Error];
        let transient = [
            Status::Pending,
            Status::Running,
            Status::NotApplicable,
            Status::Paused,
        ];
        assert!(terminal.iter().all(|s| s.is_terminal()));
        assert!(transient.iter().all(|s| !s.is_terminal()));
    }

    #[test]
    fn snapshot_key_matching_ignores_the_tool_tag() {
        let snap = FileSnapshot {
            size: 10,
            mtime_ns: 99,
            mode: 0o100644,
            ino: 7,
            dev: 3,
        };
        let key = SnapshotKey::new(&snap, "1");
        assert!(key.matches(&snap));
        let mut changed = snap;
        changed.mtime_ns += 1;
        assert!(!key.matches(&changed));
    }
}
