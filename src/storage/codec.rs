/// Pluggable page codec: the seam where encryption-at-rest plugs in.
///
/// The pager pushes every page image through the codec on its way to the
/// main file or the WAL and back. The default codec is the identity; an
/// encrypting codec adds a fixed per-page overhead and may fail to decode
/// (tamper, wrong key), which surfaces as `Corrupt`.
use crate::error::{Result, ZqError};
use crate::storage::page::PageId;

pub trait PageCodec: Send {
    /// Transform a page image for storage. Output length must be
    /// `input.len() + overhead()`.
    fn encode(&self, page_no: PageId, plain: &[u8]) -> Vec<u8>;

    /// Inverse of `encode`. Fails with `Corrupt` when the stored image
    /// cannot be authenticated or restored.
    fn decode(&self, page_no: PageId, stored: &[u8]) -> Result<Vec<u8>>;

    /// Fixed number of bytes the codec adds per page on disk.
    fn overhead(&self) -> usize;
}

/// Identity codec: pages are stored as-is.
pub struct PlainCodec;

impl PageCodec for PlainCodec {
    fn encode(&self, _page_no: PageId, plain: &[u8]) -> Vec<u8> {
        plain.to_vec()
    }

    fn decode(&self, page_no: PageId, stored: &[u8]) -> Result<Vec<u8>> {
        if stored.is_empty() {
            return Err(ZqError::Corrupt(format!(
                "empty stored image for page {}",
                page_no
            )));
        }
        Ok(stored.to_vec())
    }

    fn overhead(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_codec_round_trip() {
        let codec = PlainCodec;
        let data = vec![0xABu8; 64];
        let stored = codec.encode(3, &data);
        assert_eq!(stored.len(), data.len() + codec.overhead());
        assert_eq!(codec.decode(3, &stored).unwrap(), data);
    }
}
