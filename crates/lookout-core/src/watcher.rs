//! Filesystem synchronization.
//!
//! Watches the codebase with OS notifications (debounced, last snapshot
//! per path wins) and backs them up with a periodic light rescan that
//! diffs the full stat map, so missed events cost staleness measured in
//! seconds, never permanent drift. Cache-directory and other hidden
//! paths are filtered at the source.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use notify_debouncer_mini::notify::RecursiveMode;
use notify_debouncer_mini::{DebounceEventResult, new_debouncer};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::snapshot::{self, FileSnapshot};

/// Coalescing window for bursts of change notifications.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(50);

/// Interval of the safety-net rescan.
pub const RESCAN_INTERVAL: Duration = Duration::from_secs(30);

/// A change to the codebase, already reduced to snapshot terms.
#[derive(Debug, Clone, PartialEq)]
pub enum FsEvent {
    Added {
        path: String,
        snapshot: FileSnapshot,
    },
    Modified {
        path: String,
        snapshot: FileSnapshot,
    },
    Removed {
        path: String,
    },
}

/// Starts the synchronizer. `initial` is the scan the model was built
/// from; subsequent diffs are relative to it. Events arrive on `tx`.
pub fn spawn(
    root: PathBuf,
    initial: BTreeMap<String, FileSnapshot>,
    rescan_interval: Duration,
    tx: mpsc::UnboundedSender<FsEvent>,
) -> Result<()> {
    let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<Vec<PathBuf>>();
    let mut debouncer = new_debouncer(DEBOUNCE_WINDOW, move |result: DebounceEventResult| {
        match result {
            Ok(events) => {
                let paths: Vec<PathBuf> = events.into_iter().map(|e| e.path).collect();
                let _ = raw_tx.send(paths);
            }
            Err(err) => warn!(%err, "file watcher error"),
        }
    })
    .context("create file watcher")?;
    debouncer
        .watcher()
        .watch(&root, RecursiveMode::Recursive)
        .with_context(|| format!("watch {}", root.display()))?;

    tokio::spawn(async move {
        // Keep the watcher alive for the life of the task.
        let _debouncer = debouncer;
        let mut known = initial;
        let mut rescan = tokio::time::interval(rescan_interval);
        rescan.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        rescan.tick().await; // the first tick fires immediately
        loop {
            tokio::select! {
                paths = raw_rx.recv() => {
                    let Some(paths) = paths else { break };
                    for abs in paths {
                        if let Some(event) = reconcile_path(&root, &abs, &mut known) {
                            if tx.send(event).is_err() {
                                return;
                            }
                        }
                    }
                }
                _ = rescan.tick() => {
                    match snapshot::scan(&root) {
                        Ok(fresh) => {
                            for event in diff_maps(&known, &fresh) {
                                if tx.send(event).is_err() {
                                    return;
                                }
                            }
                            known = fresh;
                        }
                        Err(err) => warn!(%err, "periodic rescan failed"),
                    }
                }
            }
        }
    });
    Ok(())
}

/// Re-stats one notified path against the known map.
fn reconcile_path(
    root: &std::path::Path,
    abs: &std::path::Path,
    known: &mut BTreeMap<String, FileSnapshot>,
) -> Option<FsEvent> {
    let rel = snapshot::rel_path(root, abs)?;
    if snapshot::is_hidden_rel(&rel) {
        return None;
    }
    match FileSnapshot::take(root, abs) {
        Some(fresh) => match known.get(&rel) {
            Some(old) if *old == fresh => None,
            Some(_) => {
                known.insert(rel.clone(), fresh);
                debug!(path = %rel, "file modified");
                Some(FsEvent::Modified {
                    path: rel,
                    snapshot: fresh,
                })
            }
            None => {
                known.insert(rel.clone(), fresh);
                debug!(path = %rel, "file added");
                Some(FsEvent::Added {
                    path: rel,
                    snapshot: fresh,
                })
            }
        },
        None => {
            if known.remove(&rel).is_some() {
                debug!(path = %rel, "file removed");
                Some(FsEvent::Removed { path: rel })
            } else {
                None
            }
        }
    }
}

/// Diff of two scans; moves surface as a removal plus an addition.
pub fn diff_maps(
    old: &BTreeMap<String, FileSnapshot>,
    new: &BTreeMap<String, FileSnapshot>,
) -> Vec<FsEvent> {
    let mut events = Vec::new();
    for (path, snapshot) in new {
        match old.get(path) {
            None => events.push(FsEvent::Added {
                path: path.clone(),
                snapshot: *snapshot,
            }),
            Some(previous) if previous != snapshot => events.push(FsEvent::Modified {
                path: path.clone(),
                snapshot: *snapshot,
            }),
            Some(_) => {}
        }
    }
    for path in old.keys() {
        if !new.contains_key(path) {
            events.push(FsEvent::Removed { path: path.clone() });
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn snap(size: u64) -> FileSnapshot {
        FileSnapshot {
            size,
            mtime_ns: 1,
            mode: 0o100644,
            ino: size,
            dev: 1,
        }
    }

    #[test]
    fn diff_reports_added_modified_and_removed() {
        let mut old = BTreeMap::new();
        old.insert("keep.py".to_string(), snap(1));
        old.insert("gone.py".to_string(), snap(2));
        old.insert("changed.py".to_string(), snap(3));
        let mut new = BTreeMap::new();
        new.insert("keep.py".to_string(), snap(1));
        new.insert("changed.py".to_string(), snap(30));
        new.insert("fresh.py".to_string(), snap(4));

        let events = diff_maps(&old, &new);
        assert!(events.contains(&FsEvent::Added {
            path: "fresh.py".to_string(),
            snapshot: snap(4)
        }));
        assert!(events.contains(&FsEvent::Modified {
            path: "changed.py".to_string(),
            snapshot: snap(30)
        }));
        assert!(events.contains(&FsEvent::Removed {
            path: "gone.py".to_string()
        }));
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn a_move_is_a_removal_plus_an_addition() {
        let mut old = BTreeMap::new();
        old.insert("old_name.py".to_string(), snap(5));
        let mut new = BTreeMap::new();
        new.insert("new_name.py".to_string(), snap(5));
        let events = diff_maps(&old, &new);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], FsEvent::Added { path, .. } if path == "new_name.py"));
        assert!(matches!(&events[1], FsEvent::Removed { path } if path == "old_name.py"));
    }

    #[test]
    fn reconcile_filters_hidden_paths() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::create_dir(root.join(".lookout")).unwrap();
        fs::write(root.join(".lookout/status.db"), "x").unwrap();
        let mut known = BTreeMap::new();
        assert_eq!(
            reconcile_path(&root, &root.join(".lookout/status.db"), &mut known),
            None
        );
    }

    #[tokio::test]
    async fn watcher_reports_the_lifecycle_of_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let initial = snapshot::scan(&root).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        // Short rescan interval doubles as the fallback if the notify
        // backend is unavailable in this environment.
        spawn(root.clone(), initial, Duration::from_millis(200), tx).unwrap();

        async fn next_for(
            rx: &mut mpsc::UnboundedReceiver<FsEvent>,
            path: &str,
        ) -> Option<FsEvent> {
            tokio::time::timeout(Duration::from_secs(10), async {
                loop {
                    let event = rx.recv().await?;
                    let matches = match &event {
                        FsEvent::Added { path: p, .. }
                        | FsEvent::Modified { path: p, .. }
                        | FsEvent::Removed { path: p } => p == path,
                    };
                    if matches {
                        return Some(event);
                    }
                }
            })
            .await
            .ok()
            .flatten()
        }

        fs::write(root.join("hello.py"), "print(\"hi\")\n").unwrap();
        let added = next_for(&mut rx, "hello.py").await.unwrap();
        assert!(matches!(added, FsEvent::Added { .. }));

        fs::write(root.join("hello.py"), "print(\"hi\")  # comment\n").unwrap();
        let modified = next_for(&mut rx, "hello.py").await.unwrap();
        assert!(matches!(modified, FsEvent::Modified { .. }));

        fs::remove_file(root.join("hello.py")).unwrap();
        let removed = next_for(&mut rx, "hello.py").await.unwrap();
        assert!(matches!(removed, FsEvent::Removed { .. }));
    }
}
