use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::wal::record::{encode_frame, FRAME_HEADER_SIZE};
use crate::wal::{WalHeader, WAL_HEADER_SIZE};

/// Append-only WAL writer.
///
/// Frames are appended but not durable until `sync`. Commit protocol:
/// append every dirty page as a non-commit frame, append the final frame
/// with db_size_after_commit set, then fsync once.
pub struct WalWriter {
    file: File,
    path: PathBuf,
    header: WalHeader,
    /// Size of one encoded page image (page size + codec overhead).
    image_len: usize,
    /// Next append position.
    end_offset: u64,
}

impl WalWriter {
    /// Create or reset the WAL file with a fresh header.
    pub fn create(path: &Path, page_size: u32, image_len: usize) -> Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let header = WalHeader::fresh(page_size);
        file.write_all(&header.encode())?;
        file.sync_all()?;
        Ok(WalWriter {
            file,
            path: path.to_path_buf(),
            header,
            image_len,
            end_offset: WAL_HEADER_SIZE as u64,
        })
    }

    /// Open an existing WAL for appending after recovery has validated it.
    /// The tail past `valid_len` is discarded.
    pub fn open_after_recovery(
        path: &Path,
        header: WalHeader,
        image_len: usize,
        valid_len: u64,
    ) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        file.set_len(valid_len)?;
        file.sync_all()?;
        Ok(WalWriter {
            file,
            path: path.to_path_buf(),
            header,
            image_len,
            end_offset: valid_len,
        })
    }

    pub fn header(&self) -> WalHeader {
        self.header
    }

    pub fn frame_len(&self) -> u64 {
        (FRAME_HEADER_SIZE + self.image_len) as u64
    }

    /// Append one frame. Returns the byte offset the frame starts at.
    pub fn append(&mut self, page_no: u32, db_size_after_commit: u32, image: &[u8]) -> Result<u64> {
        assert_eq!(
            image.len(),
            self.image_len,
            "BUG: image length does not match WAL configuration"
        );
        let offset = self.end_offset;
        let frame = encode_frame(
            page_no,
            db_size_after_commit,
            self.header.salt,
            self.header.checksum_seed,
            image,
        );
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&frame)?;
        self.end_offset = offset + frame.len() as u64;
        Ok(offset)
    }

    /// Fsync the WAL file. The commit point of every transaction.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Truncate the log and start a new generation: both salts and the
    /// checksum seed are regenerated so stale frames cannot validate.
    pub fn truncate_reset(&mut self) -> Result<WalHeader> {
        self.header = WalHeader::fresh(self.header.page_size);
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&self.header.encode())?;
        self.file.sync_all()?;
        self.end_offset = WAL_HEADER_SIZE as u64;

        // Best-effort directory fsync so the truncation is durable.
        if let Some(parent) = self.path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }
        Ok(self.header)
    }

    pub fn end_offset(&self) -> u64 {
        self.end_offset
    }

    pub fn file_size_bytes(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn wal_path(&self) -> &Path {
        &self.path
    }
}
