/// Overflow chains for row payloads above the spill threshold.
///
/// A stored value is either inline or spilled:
///   [0x00][payload]                      inline
///   [0x01][total_len u32][first_page u32] spill marker
///
/// Each overflow page holds a chunk in its raw area after the header:
///   data[24..28] = chunk length (u32), chunk bytes follow; right_sibling
/// links the next page of the chain.
use crate::error::{Result, ZqError};
use crate::storage::page::{Page, PageId, PageKind, PAGE_HEADER_SIZE, PAGE_SIZE, SPILL_THRESHOLD};
use crate::storage::page_store::PageStore;

const INLINE: u8 = 0x00;
const SPILLED: u8 = 0x01;

/// Usable chunk bytes per overflow page.
const CHUNK_CAPACITY: usize = PAGE_SIZE - PAGE_HEADER_SIZE - 4;

/// Wrap a row payload for storage in a leaf cell, spilling when it exceeds
/// the threshold.
pub fn store_payload(store: &mut impl PageStore, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() <= SPILL_THRESHOLD {
        let mut out = Vec::with_capacity(1 + payload.len());
        out.push(INLINE);
        out.extend_from_slice(payload);
        return Ok(out);
    }

    // Build the chain back to front so each page can link to its successor.
    let chunks: Vec<&[u8]> = payload.chunks(CHUNK_CAPACITY).collect();
    let mut next: PageId = 0;
    for chunk in chunks.iter().rev() {
        let mut page = store.allocate_page(PageKind::Overflow)?;
        page.set_right_sibling(next);
        let base = PAGE_HEADER_SIZE;
        page.data[base..base + 4].copy_from_slice(&(chunk.len() as u32).to_le_bytes());
        page.data[base + 4..base + 4 + chunk.len()].copy_from_slice(chunk);
        store.write_page(&page)?;
        next = page.page_no();
    }

    let mut out = Vec::with_capacity(9);
    out.push(SPILLED);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&next.to_le_bytes());
    Ok(out)
}

/// Recover a row payload from a stored cell value, following the overflow
/// chain when spilled.
pub fn load_payload(store: &mut impl PageStore, stored: &[u8]) -> Result<Vec<u8>> {
    match stored.first() {
        Some(&INLINE) => Ok(stored[1..].to_vec()),
        Some(&SPILLED) => {
            if stored.len() < 9 {
                return Err(ZqError::Corrupt("truncated spill marker".into()));
            }
            let total = u32::from_le_bytes(stored[1..5].try_into().unwrap()) as usize;
            let mut page_no = u32::from_le_bytes(stored[5..9].try_into().unwrap());
            let mut out = Vec::with_capacity(total);
            while page_no != 0 {
                let page = store.read_page(page_no)?;
                if page.kind()? != PageKind::Overflow {
                    return Err(ZqError::Corrupt(format!(
                        "page {} in overflow chain is not an overflow page",
                        page_no
                    )));
                }
                let base = PAGE_HEADER_SIZE;
                let len =
                    u32::from_le_bytes(page.data[base..base + 4].try_into().unwrap()) as usize;
                if len > CHUNK_CAPACITY {
                    return Err(ZqError::Corrupt("overflow chunk length out of range".into()));
                }
                out.extend_from_slice(&page.data[base + 4..base + 4 + len]);
                if out.len() > total {
                    return Err(ZqError::Corrupt("overflow chain longer than payload".into()));
                }
                page_no = page.right_sibling();
            }
            if out.len() != total {
                return Err(ZqError::Corrupt(format!(
                    "overflow chain yielded {} bytes, expected {}",
                    out.len(),
                    total
                )));
            }
            Ok(out)
        }
        _ => Err(ZqError::Corrupt("unknown payload marker".into())),
    }
}

/// Return a stored value's overflow pages (if any) to the free list. Called
/// on row delete and on update when the old value is replaced.
pub fn free_payload(store: &mut impl PageStore, stored: &[u8]) -> Result<()> {
    if stored.first() != Some(&SPILLED) || stored.len() < 9 {
        return Ok(());
    }
    let mut page_no = u32::from_le_bytes(stored[5..9].try_into().unwrap());
    let mut hops = 0usize;
    while page_no != 0 {
        let page = store.read_page(page_no)?;
        store.free_page(page_no);
        page_no = page.right_sibling();
        hops += 1;
        if hops > u32::MAX as usize / CHUNK_CAPACITY {
            return Err(ZqError::Corrupt("overflow chain does not terminate".into()));
        }
    }
    Ok(())
}
