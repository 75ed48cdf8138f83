//! The framed status aggregate.
//!
//! A single file mapping every (path, tool) cell to its latest snapshot
//! key, status, and body reference, plus the bits of UI state worth
//! restoring. The payload is JSON inside a versioned binary frame:
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ magic: b"LKST" (4)           │
//! │ version: u16 LE              │
//! │ payload_len: u32 LE          │
//! │ payload: JSON                │
//! │ payload_crc32: u32 LE        │
//! └──────────────────────────────┘
//! ```
//!
//! Anything that fails to verify reads as "no aggregate": a torn write
//! costs a rescan, never a crash.

use anyhow::{Context, Result};
use crc32fast::Hasher as Crc32;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::report::{SnapshotKey, Status};

const MAGIC: [u8; 4] = *b"LKST";
const VERSION: u16 = 1;
/// Magic + version + length prefix.
const HEADER_LEN: usize = 10;

/// One persisted (path, tool) cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRecord {
    pub path: String,
    pub tool: String,
    pub key: SnapshotKey,
    pub status: Status,
    /// Blob digest of the persisted body, when the status carries one.
    pub body_ref: Option<String>,
}

/// UI state restored across runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UiStateRecord {
    pub cursor_row: usize,
    pub cursor_col: usize,
    pub sort_by_dir: bool,
    pub portrait: bool,
    pub paused: bool,
    pub log_visible: bool,
}

/// The whole aggregate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusDb {
    pub entries: Vec<EntryRecord>,
    pub ui: UiStateRecord,
}

/// Encodes an aggregate into its framed form.
pub fn encode(db: &StatusDb) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(db).context("encode status aggregate")?;
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len() + 4);
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&payload);
    let mut crc = Crc32::new();
    crc.update(&payload);
    out.extend_from_slice(&crc.finalize().to_le_bytes());
    Ok(out)
}

/// Decodes a framed aggregate; `None` for anything torn, truncated, or
/// from a different version.
pub fn decode(bytes: &[u8]) -> Option<StatusDb> {
    if bytes.len() < HEADER_LEN + 4 || bytes[..4] != MAGIC {
        warn!("status aggregate missing header, ignoring");
        return None;
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != VERSION {
        warn!(version, "status aggregate from a different version, ignoring");
        return None;
    }
    let len = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]) as usize;
    let Some(payload) = bytes.get(HEADER_LEN..HEADER_LEN + len) else {
        warn!("status aggregate truncated, ignoring");
        return None;
    };
    let Some(stored_crc) = bytes.get(HEADER_LEN + len..HEADER_LEN + len + 4) else {
        warn!("status aggregate missing checksum, ignoring");
        return None;
    };
    let mut crc = Crc32::new();
    crc.update(payload);
    if crc.finalize().to_le_bytes() != stored_crc {
        warn!("status aggregate checksum mismatch, ignoring");
        return None;
    }
    match serde_json::from_slice(payload) {
        Ok(db) => Some(db),
        Err(err) => {
            warn!(%err, "status aggregate payload invalid, ignoring");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::FileSnapshot;

    fn sample_db() -> StatusDb {
        let snap = FileSnapshot {
            size: 1,
            mtime_ns: 2,
            mode: 3,
            ino: 4,
            dev: 5,
        };
        StatusDb {
            entries: vec![EntryRecord {
                path: "src/app.py".to_string(),
                tool: "pyflakes".to_string(),
                key: SnapshotKey::new(&snap, "1"),
                status: Status::Problem,
                body_ref: Some("deadbeef".to_string()),
            }],
            ui: UiStateRecord {
                cursor_row: 3,
                cursor_col: 1,
                sort_by_dir: true,
                portrait: false,
                paused: true,
                log_visible: true,
            },
        }
    }

    #[test]
    fn round_trip_preserves_everything() {
        let db = sample_db();
        let bytes = encode(&db).unwrap();
        assert_eq!(decode(&bytes), Some(db));
    }

    #[test]
    fn truncated_files_read_as_absent() {
        let bytes = encode(&sample_db()).unwrap();
        for cut in [0, 3, HEADER_LEN, bytes.len() - 1] {
            assert_eq!(decode(&bytes[..cut]), None, "cut at {cut}");
        }
    }

    #[test]
    fn corrupted_payloads_read_as_absent() {
        let mut bytes = encode(&sample_db()).unwrap();
        let mid = HEADER_LEN + 5;
        bytes[mid] ^= 0xff;
        assert_eq!(decode(&bytes), None);
    }

    #[test]
    fn other_versions_read_as_absent() {
        let mut bytes = encode(&sample_db()).unwrap();
        bytes[4] = 0xfe;
        assert_eq!(decode(&bytes), None);
    }
}
