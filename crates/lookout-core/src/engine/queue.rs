//! Pending-job bookkeeping and the priority order.
//!
//! Priority is a three-level tier followed by enqueue order:
//! tier 0 is the cell under the cursor, tier 1 is a requested
//! refresh-all of one tool, tier 2 is everything else ordered by
//! Manhattan distance from the cursor. The queue is small (one slot per
//! entry, low thousands at worst), so selection is a linear scan against
//! the live cursor instead of a heap with stale priorities.

use std::collections::{HashMap, HashSet};

use crate::report::{EntryKey, SnapshotKey};

use super::JobRequest;

/// A queued job plus its retry count.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingJob {
    pub seq: u64,
    pub attempt: u8,
    pub request: JobRequest,
}

/// Priority value; smaller runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Score {
    pub tier: u8,
    pub distance: u32,
    pub seq: u64,
}

/// Scores one pending job against the current cursor and focus.
pub fn score_job(
    job: &PendingJob,
    cursor: (u16, u16),
    focus: Option<&EntryKey>,
    positions: &HashMap<EntryKey, (u16, u16)>,
) -> Score {
    if focus == Some(&job.request.key) {
        return Score {
            tier: 0,
            distance: 0,
            seq: job.seq,
        };
    }
    if job.request.boosted {
        return Score {
            tier: 1,
            distance: 0,
            seq: job.seq,
        };
    }
    let pos = positions
        .get(&job.request.key)
        .copied()
        .unwrap_or(job.request.pos);
    let distance = u32::from(pos.0.abs_diff(cursor.0)) + u32::from(pos.1.abs_diff(cursor.1));
    Score {
        tier: 2,
        distance,
        seq: job.seq,
    }
}

/// The pending set with duplicate suppression.
#[derive(Debug, Default)]
pub struct PendingQueue {
    jobs: Vec<PendingJob>,
    keys: HashSet<(EntryKey, SnapshotKey)>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Whether an identical (entry, snapshot) is already queued.
    pub fn contains(&self, key: &EntryKey, snapshot: &SnapshotKey) -> bool {
        self.keys.contains(&(key.clone(), snapshot.clone()))
    }

    /// Queues a job; a no-op (returning false) when an identical
    /// (entry, snapshot) is already pending.
    pub fn push(&mut self, job: PendingJob) -> bool {
        let id = (job.request.key.clone(), job.request.snapshot_key.clone());
        if !self.keys.insert(id) {
            return false;
        }
        self.jobs.push(job);
        true
    }

    /// The best score currently in the queue, skipping entries whose key
    /// is blocked by a running job.
    pub fn best_score(
        &self,
        cursor: (u16, u16),
        focus: Option<&EntryKey>,
        positions: &HashMap<EntryKey, (u16, u16)>,
        blocked: &HashSet<EntryKey>,
    ) -> Option<Score> {
        self.jobs
            .iter()
            .filter(|job| !blocked.contains(&job.request.key))
            .map(|job| score_job(job, cursor, focus, positions))
            .min()
    }

    /// Removes and returns the job with the minimum score, ties broken
    /// by enqueue sequence. Jobs whose entry already has a running job
    /// are skipped so one entry never has two in flight.
    pub fn pop_best(
        &mut self,
        cursor: (u16, u16),
        focus: Option<&EntryKey>,
        positions: &HashMap<EntryKey, (u16, u16)>,
        blocked: &HashSet<EntryKey>,
    ) -> Option<PendingJob> {
        let best = self
            .jobs
            .iter()
            .enumerate()
            .filter(|(_, job)| !blocked.contains(&job.request.key))
            .min_by_key(|(_, job)| score_job(job, cursor, focus, positions))
            .map(|(index, _)| index)?;
        let job = self.jobs.swap_remove(best);
        self.keys
            .remove(&(job.request.key.clone(), job.request.snapshot_key.clone()));
        Some(job)
    }

    /// Drops every pending job for a path (the file changed or went
    /// away).
    pub fn remove_path(&mut self, path: &str) {
        self.jobs.retain(|job| {
            let keep = job.request.key.path != path;
            if !keep {
                self.keys
                    .remove(&(job.request.key.clone(), job.request.snapshot_key.clone()));
            }
            keep
        });
    }
}
