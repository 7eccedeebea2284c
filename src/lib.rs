//! Transform and indexing layer of a blockchain ledger indexer.
//!
//! Staged blocks are linked input to output, transformed block by block into
//! transactions, address history and unspent outputs, and summarized into
//! per-address stats. Chain linkage is kept consistent in bulk or per block.

pub mod db;
pub mod error;
pub mod gaps;
pub mod indexer;
pub mod linkage;
pub mod linker;
pub mod locks;
pub mod model;
pub mod processor;
pub mod settings;
pub mod source;
pub mod stats;
pub mod store;
pub mod transform;

pub use error::{IndexError, Result};
pub use indexer::Indexer;
pub use store::{MemoryStore, Store, UnitOfWork};
pub use transform::UnspentPolicy;
