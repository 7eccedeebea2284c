//! Storage seam between the indexing engine and its backends.
//!
//! Every engine operation runs inside one [`UnitOfWork`], which either
//! commits entirely or leaves no trace. Backends enforce the relational
//! rules (unique keys, foreign keys, cascading deletes); the engine owns all
//! algorithmic decisions.

use crate::error::Result;
use crate::model::{
    AddressHistoryEntry, AddressStats, Amount, Block, BlockLink, HistoryTotals, Link,
    StagedBlock, StagedInput, StagedOutput, StagedTransaction, Transaction, UnspentOutput,
};

pub mod memory;

pub use memory::MemoryStore;

pub trait Store: Send + Sync {
    /// Runs `work` atomically: on `Err` every write made through the unit is
    /// discarded and the error is returned unchanged.
    fn atomically<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&mut dyn UnitOfWork) -> Result<T>;
}

pub trait UnitOfWork {
    // blocks

    /// Inserts the block row and all of its staged transactions, inputs and
    /// outputs.
    fn stage_block(&mut self, block: &StagedBlock) -> Result<()>;

    /// Deletes the block at `height` along with everything it owns. Returns
    /// false if no such block exists.
    fn delete_block(&mut self, height: u32) -> Result<bool>;

    /// Takes the exclusive hold on the block row and returns its processed
    /// flag, or None if the block does not exist.
    fn lock_block(&mut self, height: u32) -> Result<Option<bool>>;

    fn block(&mut self, height: u32) -> Result<Option<Block>>;

    fn block_hash(&mut self, height: u32) -> Result<Option<Vec<u8>>>;

    /// Forward pointers of every block in `[from, to]`, ascending by height.
    fn block_links(&mut self, from: u32, to: u32) -> Result<Vec<BlockLink>>;

    /// Heights of blocks with no forward pointer, ascending.
    fn tip_heights(&mut self) -> Result<Vec<u32>>;

    /// Sets the forward pointer of the block at `height`. Returns false if no
    /// such block exists.
    fn set_next_hash(&mut self, height: u32, next_hash: Option<&[u8]>) -> Result<bool>;

    /// Marks the block processed and records its totals.
    fn finish_block(&mut self, height: u32, inputs_total: Amount, outputs_total: Amount)
        -> Result<()>;

    /// Stored heights greater than or equal to `start`, ascending.
    fn heights_from(&mut self, start: u32) -> Result<Vec<u32>>;

    // staging

    /// Staged transactions of the block at `height`, ascending by index.
    fn staged_transactions(&mut self, height: u32) -> Result<Vec<StagedTransaction>>;

    fn staged_inputs(&mut self) -> Result<Vec<StagedInput>>;

    fn staged_outputs(&mut self) -> Result<Vec<StagedOutput>>;

    // links

    fn replace_links(&mut self, links: &[Link]) -> Result<()>;

    /// Links whose input belongs to `txid` and whose output side is resolved,
    /// ascending by input position.
    fn links_spent_by(&mut self, txid: &[u8]) -> Result<Vec<Link>>;

    /// Links whose output belongs to `txid`, ascending by output position.
    fn links_created_by(&mut self, txid: &[u8]) -> Result<Vec<Link>>;

    // transform results

    fn insert_transaction(&mut self, tx: &Transaction) -> Result<()>;

    fn insert_history(&mut self, rows: &[AddressHistoryEntry]) -> Result<()>;

    fn insert_unspent(&mut self, rows: &[UnspentOutput]) -> Result<()>;

    /// Removes every unspent row recorded for the output `txid:vout`,
    /// returning how many were removed.
    fn delete_unspent(&mut self, txid: &[u8], vout: u32) -> Result<usize>;

    fn transaction(&mut self, txid: &[u8]) -> Result<Option<Transaction>>;

    /// History of `address`, ascending by (block_height, tx_index).
    fn address_history(&mut self, address: &str) -> Result<Vec<AddressHistoryEntry>>;

    /// Unspent outputs of `address`, ascending by (block_height, txid, vout).
    fn unspent_outputs(&mut self, address: &str) -> Result<Vec<UnspentOutput>>;

    // address stats

    /// History grouped by address, ascending by address.
    fn history_totals(&mut self) -> Result<Vec<HistoryTotals>>;

    /// Number of unspent rows per address, ascending by address.
    fn unspent_counts(&mut self) -> Result<Vec<(String, i64)>>;

    fn replace_address_stats(&mut self, rows: &[AddressStats]) -> Result<()>;

    fn address_stats(&mut self, address: &str) -> Result<Option<AddressStats>>;
}
