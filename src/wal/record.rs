/// WAL frame format.
///
/// Frame on disk:
///   [page_no: u32] [db_size_after_commit: u32] [salt: u64] [checksum: u64]
///   [encoded page image]
///
/// A commit frame has db_size_after_commit > 0 (the database page count
/// after the transaction); non-commit frames carry zero. The salt must
/// match the WAL header salt of the current generation. The checksum is
/// xxh3 seeded with the header's checksum_seed, over the three header
/// fields plus the encoded page image, so a frame is verifiable without
/// running the page codec.
use xxhash_rust::xxh3::xxh3_64_with_seed;

pub const FRAME_HEADER_SIZE: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub page_no: u32,
    pub db_size_after_commit: u32,
    pub salt: u64,
    pub checksum: u64,
}

impl FrameHeader {
    pub fn is_commit(&self) -> bool {
        self.db_size_after_commit > 0
    }

    pub fn decode(buf: &[u8]) -> Option<FrameHeader> {
        if buf.len() < FRAME_HEADER_SIZE {
            return None;
        }
        Some(FrameHeader {
            page_no: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            db_size_after_commit: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            salt: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            checksum: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
        })
    }
}

/// Serialize a complete frame, computing its checksum.
pub fn encode_frame(
    page_no: u32,
    db_size_after_commit: u32,
    salt: u64,
    checksum_seed: u64,
    image: &[u8],
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + image.len());
    buf.extend_from_slice(&page_no.to_le_bytes());
    buf.extend_from_slice(&db_size_after_commit.to_le_bytes());
    buf.extend_from_slice(&salt.to_le_bytes());
    let checksum = frame_checksum(page_no, db_size_after_commit, salt, checksum_seed, image);
    buf.extend_from_slice(&checksum.to_le_bytes());
    buf.extend_from_slice(image);
    buf
}

pub fn frame_checksum(
    page_no: u32,
    db_size_after_commit: u32,
    salt: u64,
    checksum_seed: u64,
    image: &[u8],
) -> u64 {
    let mut material = Vec::with_capacity(16 + image.len());
    material.extend_from_slice(&page_no.to_le_bytes());
    material.extend_from_slice(&db_size_after_commit.to_le_bytes());
    material.extend_from_slice(&salt.to_le_bytes());
    material.extend_from_slice(image);
    xxh3_64_with_seed(&material, checksum_seed)
}

/// Validate a decoded frame header against the image it prefixed and the
/// current WAL generation.
pub fn verify_frame(
    header: &FrameHeader,
    wal_salt: u64,
    checksum_seed: u64,
    image: &[u8],
) -> bool {
    if header.salt != wal_salt {
        return false;
    }
    header.checksum
        == frame_checksum(
            header.page_no,
            header.db_size_after_commit,
            header.salt,
            checksum_seed,
            image,
        )
}
