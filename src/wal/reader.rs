use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{Result, ZqError};
use crate::storage::page::PageId;
use crate::wal::record::{verify_frame, FrameHeader, FRAME_HEADER_SIZE};
use crate::wal::{WalHeader, WAL_HEADER_SIZE};

/// Result of a full WAL scan: everything up to and including the last
/// valid commit frame.
#[derive(Debug)]
pub struct WalScan {
    pub header: WalHeader,
    /// (page_no, frame offset) in append order, committed frames only.
    pub committed_frames: Vec<(PageId, u64)>,
    /// Database page count as of the last commit frame (0 when none).
    pub db_size: u32,
    /// Offset just past the last valid commit frame.
    pub committed_len: u64,
}

/// Scan a WAL file from the start, stopping at the first invalid frame
/// (salt mismatch, checksum failure, or short read). Frames of a
/// transaction whose commit frame never made it are discarded.
pub fn scan(path: &Path, image_len: usize) -> Result<WalScan> {
    let mut file = File::open(path)?;
    let mut header_buf = [0u8; WAL_HEADER_SIZE];
    file.read_exact(&mut header_buf).map_err(|_| {
        ZqError::Corrupt("WAL file exists but its header cannot be read".into())
    })?;
    let header = WalHeader::decode(&header_buf)?;

    let frame_len = FRAME_HEADER_SIZE + image_len;
    let mut offset = WAL_HEADER_SIZE as u64;
    let mut committed_frames = Vec::new();
    let mut pending: Vec<(PageId, u64)> = Vec::new();
    let mut db_size = 0u32;
    let mut committed_len = offset;

    let mut frame_buf = vec![0u8; frame_len];
    loop {
        match file.read_exact(&mut frame_buf) {
            Ok(()) => {}
            Err(_) => break, // short tail: torn final frame, discard
        }
        let frame_header = match FrameHeader::decode(&frame_buf) {
            Some(h) => h,
            None => break,
        };
        let image = &frame_buf[FRAME_HEADER_SIZE..];
        if !verify_frame(&frame_header, header.salt, header.checksum_seed, image) {
            break;
        }
        pending.push((frame_header.page_no, offset));
        offset += frame_len as u64;
        if frame_header.is_commit() {
            committed_frames.append(&mut pending);
            db_size = frame_header.db_size_after_commit;
            committed_len = offset;
        }
    }

    Ok(WalScan {
        header,
        committed_frames,
        db_size,
        committed_len,
    })
}

/// Read and verify one frame's page image at a known offset.
pub fn read_frame_image(
    file: &mut File,
    offset: u64,
    image_len: usize,
    salt: u64,
    checksum_seed: u64,
) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; FRAME_HEADER_SIZE + image_len];
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut buf)?;
    let header = FrameHeader::decode(&buf)
        .ok_or_else(|| ZqError::Corrupt(format!("short WAL frame at offset {}", offset)))?;
    let image = &buf[FRAME_HEADER_SIZE..];
    if !verify_frame(&header, salt, checksum_seed, image) {
        return Err(ZqError::Corrupt(format!(
            "WAL frame at offset {} failed verification",
            offset
        )));
    }
    Ok(image.to_vec())
}
