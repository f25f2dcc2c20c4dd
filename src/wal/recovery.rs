use std::path::Path;

use crate::error::Result;
use crate::wal::index::WalIndex;
use crate::wal::reader;
use crate::wal::{WalHeader, WAL_HEADER_SIZE};

/// Outcome of open-time WAL recovery.
#[derive(Debug)]
pub struct RecoveryResult {
    pub header: WalHeader,
    /// Index over the surviving committed frames: the starting state.
    pub index: WalIndex,
    /// Page count as of the last surviving commit (0 when the WAL holds
    /// no committed transaction).
    pub db_size: u32,
    /// Number of frames discarded from the torn tail.
    pub frames_discarded: u64,
}

/// Scan the WAL at open time and build the index that defines the visible
/// database state. The torn tail past the last valid commit frame is
/// discarded (the caller truncates through `WalWriter::open_after_recovery`).
///
/// Returns `None` when no WAL file exists or it is empty, meaning the main
/// file alone is authoritative. A WAL that exists but cannot be read is
/// fatal for the open.
pub fn recover(wal_path: &Path, image_len: usize) -> Result<Option<RecoveryResult>> {
    if !wal_path.exists() {
        return Ok(None);
    }
    let file_len = std::fs::metadata(wal_path)?.len();
    if file_len == 0 {
        return Ok(None);
    }

    let scan = reader::scan(wal_path, image_len)?;
    let frame_len = crate::wal::record::FRAME_HEADER_SIZE as u64 + image_len as u64;
    let valid_frames = (scan.committed_len - WAL_HEADER_SIZE as u64) / frame_len;
    let total_frames = (file_len.saturating_sub(WAL_HEADER_SIZE as u64)) / frame_len;
    let frames_discarded = total_frames.saturating_sub(valid_frames);

    if frames_discarded > 0 {
        log::warn!(
            "WAL recovery: discarding {} frame(s) past the last commit in {}",
            frames_discarded,
            wal_path.display()
        );
    }

    let mut index = WalIndex::new(scan.db_size, WAL_HEADER_SIZE as u64);
    index.apply_commit(&scan.committed_frames, scan.db_size, scan.committed_len);

    Ok(Some(RecoveryResult {
        header: scan.header,
        index,
        db_size: scan.db_size,
        frames_discarded,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::writer::WalWriter;
    use tempfile::TempDir;

    #[test]
    fn missing_wal_is_fresh() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("none.wal");
        assert!(recover(&path, 32).unwrap().is_none());
    }

    #[test]
    fn partial_transaction_discarded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.wal");
        let mut writer = WalWriter::create(&path, 4096, 32).unwrap();
        writer.append(1, 2, &[1u8; 32]).unwrap();
        // Second transaction: frame written, commit frame missing.
        writer.append(5, 0, &[5u8; 32]).unwrap();
        writer.sync().unwrap();
        drop(writer);

        let result = recover(&path, 32).unwrap().unwrap();
        assert_eq!(result.index.len(), 1);
        assert_eq!(result.index.lookup(1), Some(WAL_HEADER_SIZE as u64));
        assert_eq!(result.index.lookup(5), None);
        assert_eq!(result.db_size, 2);
        assert_eq!(result.frames_discarded, 1);
    }
}
