//! On-disk result cache.
//!
//! Lives in `.lookout/` under the codebase root:
//!
//! - `creation-time`: ownership token; a process that sees the token
//!   change underneath it treats the cache as foreign and stops writing.
//! - `status.db`: the framed status aggregate, see [`status_db`].
//! - `results/<xx>/<digest>`: one gzip blob per report body, addressed
//!   by SHA-256 over (relative path, tool name, content digest).
//! - `log`: the tracing log file.
//!
//! Every write goes through tmp + fsync + atomic rename; a failed write
//! leaves no tmp behind.

mod status_db;

pub use status_db::{EntryRecord, StatusDb, UiStateRecord};

use std::collections::HashSet;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::report::Report;

/// Unrecoverable cache damage; the binary maps this to its own exit
/// code.
#[derive(Debug)]
pub struct CacheCorruption(pub String);

impl std::fmt::Display for CacheCorruption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cache corruption: {}", self.0)
    }
}

impl std::error::Error for CacheCorruption {}

const CREATION_TIME_FILE: &str = "creation-time";
const STATUS_FILE: &str = "status.db";
const RESULTS_DIR: &str = "results";
const LOG_FILE: &str = "log";

/// Handle on the cache directory of one codebase.
#[derive(Debug)]
pub struct CacheDir {
    dir: PathBuf,
    creation_token: String,
    writes_enabled: bool,
    compression: Compression,
}

impl CacheDir {
    /// Opens (creating if necessary) the cache under `cache_dir`.
    pub fn open(cache_dir: &Path, compression: u32) -> Result<Self> {
        fs::create_dir_all(cache_dir.join(RESULTS_DIR))
            .with_context(|| CacheCorruption(format!("create {}", cache_dir.display())))?;
        let token_path = cache_dir.join(CREATION_TIME_FILE);
        if !token_path.exists() {
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            atomic_write(&token_path, now.to_string().as_bytes())
                .context("write creation-time")?;
        }
        let creation_token = fs::read_to_string(&token_path)
            .with_context(|| CacheCorruption("unreadable creation-time".to_string()))?;
        Ok(Self {
            dir: cache_dir.to_path_buf(),
            creation_token,
            writes_enabled: true,
            compression: Compression::new(compression.min(9)),
        })
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    /// Whether this process still owns the cache. Re-reads the token and
    /// permanently disables writes on mismatch.
    fn writes_allowed(&mut self) -> bool {
        if !self.writes_enabled {
            return false;
        }
        match fs::read_to_string(self.dir.join(CREATION_TIME_FILE)) {
            Ok(token) if token == self.creation_token => true,
            _ => {
                warn!("cache creation-time changed underneath us; writes disabled");
                self.writes_enabled = false;
                false
            }
        }
    }

    /// Blob digest for one report: same content under the same relative
    /// path and tool always lands in the same blob, across runs.
    pub fn blob_digest(path: &str, tool: &str, content_digest: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(path.as_bytes());
        hasher.update([0]);
        hasher.update(tool.as_bytes());
        hasher.update([0]);
        hasher.update(content_digest.as_bytes());
        let digest = hasher.finalize();
        use std::fmt::Write;
        let mut out = String::with_capacity(64);
        for byte in digest {
            let _ = write!(&mut out, "{byte:02x}");
        }
        out
    }

    fn blob_path(&self, digest: &str) -> PathBuf {
        self.dir.join(RESULTS_DIR).join(&digest[..2]).join(digest)
    }

    /// Persists a report body blob. Failures are logged, not fatal; the
    /// in-memory report stays valid either way.
    pub fn store_blob(&mut self, digest: &str, report: &Report) -> Result<()> {
        if !self.writes_allowed() {
            return Ok(());
        }
        let path = self.blob_path(digest);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("create blob dir")?;
        }
        let json = serde_json::to_vec(report).context("encode report")?;
        let mut encoder = GzEncoder::new(Vec::new(), self.compression);
        encoder.write_all(&json).context("compress report")?;
        let compressed = encoder.finish().context("compress report")?;
        atomic_write(&path, &compressed)
    }

    /// Loads a report blob, or `None` when absent or unreadable.
    pub fn load_blob(&self, digest: &str) -> Option<Report> {
        let bytes = fs::read(self.blob_path(digest)).ok()?;
        let mut decoder = GzDecoder::new(&bytes[..]);
        let mut json = Vec::new();
        decoder.read_to_end(&mut json).ok()?;
        serde_json::from_slice(&json).ok()
    }

    /// Loads the status aggregate. A torn or invalid file reads as
    /// absent, which triggers a full rescan upstream.
    pub fn load_status(&self) -> Option<StatusDb> {
        let bytes = fs::read(self.dir.join(STATUS_FILE)).ok()?;
        status_db::decode(&bytes)
    }

    /// Atomically replaces the status aggregate.
    pub fn store_status(&mut self, db: &StatusDb) -> Result<()> {
        if !self.writes_allowed() {
            return Ok(());
        }
        let bytes = status_db::encode(db)?;
        atomic_write(&self.dir.join(STATUS_FILE), &bytes)
    }

    /// Startup garbage collection: removes blobs the aggregate no longer
    /// references, plus any abandoned tmp files.
    pub fn collect_garbage(&mut self, referenced: &HashSet<String>) -> usize {
        if !self.writes_allowed() {
            return 0;
        }
        let mut removed = 0usize;
        let results = self.dir.join(RESULTS_DIR);
        let Ok(prefixes) = fs::read_dir(&results) else {
            return 0;
        };
        for prefix in prefixes.flatten() {
            let Ok(blobs) = fs::read_dir(prefix.path()) else {
                continue;
            };
            for blob in blobs.flatten() {
                let name = blob.file_name().to_string_lossy().into_owned();
                let stale = name.starts_with('.') || !referenced.contains(&name);
                if stale && fs::remove_file(blob.path()).is_ok() {
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            info!(removed, "collected unreferenced cache blobs");
        }
        removed
    }
}

/// Writes via a hidden tmp file, fsyncs, then renames into place. The
/// tmp is removed on any failure.
fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().context("atomic write target has no parent")?;
    let name = path.file_name().context("atomic write target has no name")?;
    let tmp = dir.join(format!(".{}.tmp", name.to_string_lossy()));
    let result = (|| -> Result<()> {
        let mut file = fs::File::create(&tmp).context("create tmp")?;
        file.write_all(bytes).context("write tmp")?;
        file.sync_all().context("fsync tmp")?;
        fs::rename(&tmp, path).context("rename tmp into place")?;
        Ok(())
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{EntryKey, Report, SnapshotKey, Status};
    use crate::snapshot::FileSnapshot;
    use crate::textstyle::StyledText;

    fn sample_report() -> Report {
        let snap = FileSnapshot {
            size: 12,
            mtime_ns: 345,
            mode: 0o100644,
            ino: 9,
            dev: 2,
        };
        Report {
            key: EntryKey::new("src/main.py", "python_syntax"),
            snapshot_key: SnapshotKey::new(&snap, "1"),
            status: Status::Ok,
            body: StyledText::from_tool_output(b"\x1b[32mall good\x1b[0m\n"),
            content_digest: "abc123".to_string(),
            started_at: 1_000,
            finished_at: 2_000,
        }
    }

    fn open_cache(dir: &Path) -> CacheDir {
        CacheDir::open(&dir.join(".lookout"), 1).unwrap()
    }

    #[test]
    fn blob_round_trip_is_bit_exact() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cache = open_cache(tmp.path());
        let report = sample_report();
        let digest = CacheDir::blob_digest(
            &report.key.path,
            &report.key.tool,
            &report.content_digest,
        );
        cache.store_blob(&digest, &report).unwrap();
        let loaded = cache.load_blob(&digest).unwrap();
        assert_eq!(loaded, report);
    }

    #[test]
    fn blob_digests_are_stable_and_distinct() {
        let a = CacheDir::blob_digest("a.py", "python_syntax", "d1");
        let b = CacheDir::blob_digest("a.py", "python_syntax", "d1");
        assert_eq!(a, b);
        assert_ne!(a, CacheDir::blob_digest("b.py", "python_syntax", "d1"));
        assert_ne!(a, CacheDir::blob_digest("a.py", "pyflakes", "d1"));
        assert_ne!(a, CacheDir::blob_digest("a.py", "python_syntax", "d2"));
    }

    #[test]
    fn missing_blobs_read_as_none() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = open_cache(tmp.path());
        assert!(cache.load_blob(&"0".repeat(64)).is_none());
    }

    #[test]
    fn foreign_creation_time_disables_writes() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cache = open_cache(tmp.path());
        // Another instance recreates the cache underneath us.
        fs::write(tmp.path().join(".lookout/creation-time"), "other").unwrap();
        let report = sample_report();
        let digest = CacheDir::blob_digest("x", "y", "z");
        cache.store_blob(&digest, &report).unwrap();
        assert!(cache.load_blob(&digest).is_none());
    }

    #[test]
    fn garbage_collection_keeps_only_referenced_blobs() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cache = open_cache(tmp.path());
        let report = sample_report();
        let keep = CacheDir::blob_digest("keep.py", "contents", "d");
        let drop = CacheDir::blob_digest("drop.py", "contents", "d");
        cache.store_blob(&keep, &report).unwrap();
        cache.store_blob(&drop, &report).unwrap();

        let mut referenced = HashSet::new();
        referenced.insert(keep.clone());
        let removed = cache.collect_garbage(&referenced);
        assert_eq!(removed, 1);
        assert!(cache.load_blob(&keep).is_some());
        assert!(cache.load_blob(&drop).is_none());
    }

    #[test]
    fn atomic_write_leaves_no_tmp_behind() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("out.bin");
        atomic_write(&target, b"hello").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"hello");
        let names: Vec<String> = fs::read_dir(tmp.path())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["out.bin"]);
    }
}
