//! Entry points exposed to the ingestion coordinator.
//!
//! Every call runs in exactly one unit of work of the underlying store, so a
//! failure leaves nothing behind. `transform` additionally holds the
//! per-height lock for the duration of its unit.

use std::ops::RangeInclusive;

use tracing::{info, warn};

use crate::error::{IndexError, Result};
use crate::gaps::{self, SkippedHeights};
use crate::linkage;
use crate::linker;
use crate::locks::HeightLocks;
use crate::model::{AddressHistoryEntry, AddressStats, Block, StagedBlock, Transaction, UnspentOutput};
use crate::stats;
use crate::store::Store;
use crate::transform::{self, UnspentPolicy};

pub struct Indexer<S> {
    store: S,
    locks: HeightLocks,
    unspent_policy: UnspentPolicy,
}

impl<S: Store> Indexer<S> {
    pub fn new(store: S, unspent_policy: UnspentPolicy) -> Self {
        Self {
            store,
            locks: HeightLocks::new(),
            unspent_policy,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn unspent_policy(&self) -> UnspentPolicy {
        self.unspent_policy
    }

    /// Stages a block without touching chain linkage. Used during bulk sync,
    /// which repairs linkage once at the end.
    pub fn stage_block(&self, block: &StagedBlock) -> Result<()> {
        self.store.atomically(|uow| uow.stage_block(block))
    }

    /// Stages a block and links its predecessor to it in the same unit.
    pub fn insert_block(&self, block: &StagedBlock) -> Result<()> {
        let height = block.header.height;
        self.store.atomically(|uow| {
            uow.stage_block(block)?;
            linkage::on_block_inserted(uow, height, &block.header.hash)
        })?;
        info!("Inserted block {}", height);
        Ok(())
    }

    /// Deletes a block with everything it owns and makes its predecessor the
    /// chain tip again. Under [`UnspentPolicy::DeleteOnSpend`] the outputs it
    /// spent become unspent again.
    pub fn delete_block(&self, height: u32) -> Result<()> {
        let policy = self.unspent_policy;
        self.store.atomically(|uow| {
            if policy == UnspentPolicy::DeleteOnSpend {
                transform::restore_spent_outputs(uow, height)?;
            }
            if !uow.delete_block(height)? {
                return Err(IndexError::MissingBlock(height));
            }
            linkage::on_block_deleted(uow, height)
        })?;
        info!("Deleted block {}", height);
        Ok(())
    }

    /// Rebuilds the input-output link relation over everything staged.
    pub fn link(&self) -> Result<usize> {
        self.store.atomically(linker::relink)
    }

    /// Transforms the block at `height`. Returns the number of store queries
    /// issued; a processed block costs one.
    pub fn transform(&self, height: u32) -> Result<u64> {
        let _guard = self.locks.acquire(height);
        let policy = self.unspent_policy;
        self.store
            .atomically(|uow| transform::transform_block(uow, height, policy))
            .map_err(|e| {
                warn!("Transform of block {} failed: {}", height, e);
                e
            })
    }

    pub fn repair_linkage(&self, range: RangeInclusive<u32>) -> Result<usize> {
        self.store.atomically(|uow| linkage::repair(uow, range))
    }

    /// Insert hook for blocks written through some other path. The hook then
    /// runs in a unit of its own.
    pub fn on_block_inserted(&self, height: u32, hash: &[u8]) -> Result<()> {
        self.store
            .atomically(|uow| linkage::on_block_inserted(uow, height, hash))
    }

    pub fn on_block_deleted(&self, height: u32) -> Result<()> {
        self.store
            .atomically(|uow| linkage::on_block_deleted(uow, height))
    }

    pub fn skipped_heights(&self, start: u32) -> Result<SkippedHeights> {
        self.store
            .atomically(|uow| gaps::skipped_heights(uow, start))
    }

    /// Recomputes every address's stats. Must not overlap with transforms.
    pub fn refresh_address_stats(&self) -> Result<usize> {
        self.store.atomically(stats::refresh)
    }

    /// Stored heights from `start` upwards, ascending.
    pub fn heights_from(&self, start: u32) -> Result<Vec<u32>> {
        self.store.atomically(|uow| uow.heights_from(start))
    }

    pub fn block(&self, height: u32) -> Result<Option<Block>> {
        self.store.atomically(|uow| uow.block(height))
    }

    pub fn transaction(&self, txid: &[u8]) -> Result<Option<Transaction>> {
        self.store.atomically(|uow| uow.transaction(txid))
    }

    pub fn address_history(&self, address: &str) -> Result<Vec<AddressHistoryEntry>> {
        self.store.atomically(|uow| uow.address_history(address))
    }

    pub fn unspent_outputs(&self, address: &str) -> Result<Vec<UnspentOutput>> {
        self.store.atomically(|uow| uow.unspent_outputs(address))
    }

    pub fn address_stats(&self, address: &str) -> Result<Option<AddressStats>> {
        self.store.atomically(|uow| uow.address_stats(address))
    }
}
