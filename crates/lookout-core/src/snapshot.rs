//! File snapshots and the initial codebase scan.
//!
//! A snapshot is the stat tuple that identifies a file's content without
//! reading it. Two snapshots are equivalent iff every field compares
//! equal; mtime alone is not trusted.

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::os::unix::fs::MetadataExt;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use ignore::WalkBuilder;
use sha2::{Digest, Sha256};

/// Stat identity of one file. `dev` disambiguates inodes across mounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct FileSnapshot {
    pub size: u64,
    pub mtime_ns: i64,
    pub mode: u32,
    pub ino: u64,
    pub dev: u64,
}

impl FileSnapshot {
    pub fn of(metadata: &fs::Metadata) -> Self {
        Self {
            size: metadata.size(),
            mtime_ns: metadata
                .mtime()
                .saturating_mul(1_000_000_000)
                .saturating_add(metadata.mtime_nsec()),
            mode: metadata.mode(),
            ino: metadata.ino(),
            dev: metadata.dev(),
        }
    }

    /// Snapshot of a path, following a symlink only when its target is a
    /// file inside `root`. Returns `None` for anything that should not
    /// get a row: directories, broken or escaping symlinks.
    pub fn take(root: &Path, abs: &Path) -> Option<Self> {
        let meta = fs::symlink_metadata(abs).ok()?;
        if meta.file_type().is_symlink() {
            let target = fs::canonicalize(abs).ok()?;
            if !target.starts_with(root) {
                return None;
            }
            let target_meta = fs::metadata(&target).ok()?;
            if !target_meta.is_file() {
                return None;
            }
            return Some(Self::of(&target_meta));
        }
        if !meta.is_file() {
            return None;
        }
        Some(Self::of(&meta))
    }
}

/// Converts an absolute path under `root` to the codebase-relative form:
/// forward slashes on every host.
pub fn rel_path(root: &Path, abs: &Path) -> Option<String> {
    let rel = abs.strip_prefix(root).ok()?;
    let mut out = String::new();
    for component in rel.components() {
        if let Component::Normal(part) = component {
            if !out.is_empty() {
                out.push('/');
            }
            out.push_str(&part.to_string_lossy());
        }
    }
    if out.is_empty() { None } else { Some(out) }
}

/// Whether any component of a relative path is hidden. Hidden paths
/// (including the cache directory) never get rows.
pub fn is_hidden_rel(rel: &str) -> bool {
    rel.split('/').any(|part| part.starts_with('.'))
}

/// Recursively scans the codebase, producing the relative-path to
/// snapshot map.
///
/// Hidden entries are skipped and gitignore semantics are disabled. The
/// walker never descends through symlinked directories; file symlinks
/// are resolved through `canonicalize`, so a cycle fails resolution and
/// the link is omitted like any other broken link. Every resolvable
/// link gets its own row, even when several point at one target.
pub fn scan(root: &Path) -> Result<BTreeMap<String, FileSnapshot>> {
    let root = root
        .canonicalize()
        .with_context(|| format!("canonicalize {}", root.display()))?;
    let mut walker = WalkBuilder::new(&root);
    walker
        .hidden(true)
        .ignore(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .parents(false)
        .follow_links(false);

    let mut map = BTreeMap::new();
    for entry in walker.build() {
        let Ok(entry) = entry else { continue };
        let Some(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            continue;
        }
        let abs = entry.path();
        let Some(snapshot) = FileSnapshot::take(&root, abs) else {
            continue;
        };
        if let Some(rel) = rel_path(&root, abs) {
            map.insert(rel, snapshot);
        }
    }
    Ok(map)
}

/// Joins a codebase-relative path back onto the root.
pub fn abs_path(root: &Path, rel: &str) -> PathBuf {
    let mut out = root.to_path_buf();
    for part in rel.split('/') {
        out.push(part);
    }
    out
}

/// Hex SHA-256 of a file's content, streamed so large files do not get
/// buffered whole.
pub fn content_digest(path: &Path) -> std::io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex(&hasher.finalize()))
}

/// Hex SHA-256 of a byte slice.
pub fn digest_bytes(bytes: &[u8]) -> String {
    hex(&Sha256::digest(bytes))
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}
