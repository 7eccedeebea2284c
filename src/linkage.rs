//! Chain linkage maintainer: keeps every block's `next_hash` pointing at the
//! block one height above it.
//!
//! Two regimes, chosen by the caller: [`repair`] recomputes pointers over a
//! range after bulk ingestion, and the `on_block_*` hooks maintain them one
//! block at a time. The hooks must run in the same unit of work as the insert
//! or delete they accompany.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use tracing::{debug, error, info};

use crate::error::{IndexError, Result};
use crate::store::UnitOfWork;

/// Points the predecessor of a freshly inserted block at it.
pub fn on_block_inserted(uow: &mut dyn UnitOfWork, height: u32, hash: &[u8]) -> Result<()> {
    if height == 0 {
        return Ok(());
    }
    if !uow.set_next_hash(height - 1, Some(hash))? {
        return Err(IndexError::MissingPredecessor {
            height: height - 1,
            successor: height,
        });
    }
    debug!("Linked block {} -> {}", height - 1, height);
    Ok(())
}

/// Turns the predecessor of a deleted block back into the chain tip.
pub fn on_block_deleted(uow: &mut dyn UnitOfWork, height: u32) -> Result<()> {
    if height == 0 {
        return Ok(());
    }
    if !uow.set_next_hash(height - 1, None)? {
        return Err(IndexError::MissingPredecessor {
            height: height - 1,
            successor: height,
        });
    }
    debug!("Unlinked block {} from deleted {}", height - 1, height);
    Ok(())
}

/// Recomputes `next_hash` for every block in `range` and returns how many
/// pointers changed. Afterwards at most one block in the whole store may be
/// without a successor; anything else means the stored heights are not
/// contiguous.
pub fn repair(uow: &mut dyn UnitOfWork, range: RangeInclusive<u32>) -> Result<usize> {
    let (from, to) = (*range.start(), *range.end());
    // one extra height so the last block of the range can be linked too
    let links = uow.block_links(from, to.saturating_add(1))?;
    let hashes: BTreeMap<u32, &[u8]> = links
        .iter()
        .map(|link| (link.height, link.hash.as_slice()))
        .collect();

    let mut updated = 0;
    for link in links.iter().filter(|link| link.height <= to) {
        let expected = link
            .height
            .checked_add(1)
            .and_then(|next| hashes.get(&next).copied());
        if link.next_hash.as_deref() != expected {
            uow.set_next_hash(link.height, expected)?;
            updated += 1;
        }
    }

    let tips = uow.tip_heights()?;
    if tips.len() > 1 {
        error!(
            "Linkage repair over {}..={} left {} chain tips: {:?}",
            from,
            to,
            tips.len(),
            tips
        );
        return Err(IndexError::MultipleChainTips { heights: tips });
    }

    info!(
        "Linkage repair over {}..={}: {} blocks checked, {} pointers updated",
        from,
        to,
        links.iter().filter(|link| link.height <= to).count(),
        updated
    );
    Ok(updated)
}
