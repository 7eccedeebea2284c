//! Block transform engine.
//!
//! A block is either unprocessed or processed. Transforming an unprocessed
//! block turns its staged transactions and their links into finalized
//! transaction rows, address history, unspent outputs and block totals, then
//! marks it processed. Transforming a processed block does nothing.

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::debug;

use crate::error::{IndexError, Result};
use crate::model::{
    AddressHistoryEntry, Amount, Link, OutPoint, StagedTransaction, Transaction, UnspentOutput,
};
use crate::store::UnitOfWork;

/// What happens to an address's unspent row once a later block spends it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnspentPolicy {
    /// Rows are only ever inserted. An output spent after it was recorded
    /// stays in the unspent set.
    #[default]
    Retain,
    /// The spending block's transform deletes the rows of every output it
    /// spends.
    DeleteOnSpend,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Delta {
    received: Amount,
    sent: Amount,
}

/// Result of transforming one transaction, ready to be written
#[derive(Debug, PartialEq, Eq)]
pub struct TransformedTx {
    pub transaction: Transaction,
    pub history: Vec<AddressHistoryEntry>,
    pub unspent: Vec<UnspentOutput>,
    pub spent: Vec<OutPoint>,
}

/// Accumulates one transaction's value flow.
///
/// `spent` are its links with a resolved output, by input position;
/// `created` are the links of its own outputs, by output position.
pub fn transform_transaction(
    tx: &StagedTransaction,
    spent: &[Link],
    created: &[Link],
) -> TransformedTx {
    let mut inputs_total = Amount::ZERO;
    let mut deltas: BTreeMap<&str, Delta> = BTreeMap::new();
    let mut spent_outpoints = Vec::with_capacity(spent.len());

    for output in spent.iter().filter_map(|link| link.output.as_ref()) {
        inputs_total += output.value;
        for address in &output.addresses {
            deltas.entry(address).or_default().sent += output.value;
        }
        spent_outpoints.push(OutPoint {
            txid: output.txid.clone(),
            vout: output.vout,
        });
    }

    let mut unspent = Vec::new();
    for link in created {
        let Some(output) = &link.output else {
            continue;
        };
        for address in &output.addresses {
            deltas.entry(address).or_default().received += output.value;
            // still unspent when the links were built
            if link.input.is_none() {
                unspent.push(UnspentOutput {
                    address: address.clone(),
                    block_height: tx.block_height,
                    txid: tx.txid.clone(),
                    vout: output.vout,
                    value: output.value,
                });
            }
        }
    }

    let history = deltas
        .into_iter()
        .map(|(address, delta)| AddressHistoryEntry {
            address: address.to_string(),
            block_height: tx.block_height,
            txid: tx.txid.clone(),
            tx_index: tx.index,
            timestamp: tx.timestamp,
            received: delta.received,
            sent: delta.sent,
        })
        .collect();

    TransformedTx {
        transaction: Transaction {
            block_height: tx.block_height,
            index: tx.index,
            txid: tx.txid.clone(),
            raw: tx.raw.clone(),
            timestamp: tx.timestamp,
            input_count: tx.input_count,
            output_count: tx.output_count,
            inputs_total,
            outputs_total: tx.outputs_total,
        },
        history,
        unspent,
        spent: spent_outpoints,
    }
}

/// Transforms the block at `height` inside `uow` and returns the number of
/// store queries issued. The caller must hold the height's lock and run this
/// in a unit of work of its own so a failure discards every write.
pub fn transform_block(
    uow: &mut dyn UnitOfWork,
    height: u32,
    policy: UnspentPolicy,
) -> Result<u64> {
    // 1. Row hold and idempotency check
    let mut queries = 1;
    match uow.lock_block(height)? {
        None => return Err(IndexError::MissingBlock(height)),
        Some(true) => {
            debug!("Block {} already processed, nothing to do", height);
            return Ok(queries);
        }
        Some(false) => {}
    }

    let staged = uow.staged_transactions(height)?;
    queries += 1;

    // 2. Transactions in index order
    let mut inputs_total = Amount::ZERO;
    let mut outputs_total = Amount::ZERO;
    for tx in &staged {
        let spent = uow.links_spent_by(&tx.txid)?;
        let created = uow.links_created_by(&tx.txid)?;
        queries += 2;

        let transformed = transform_transaction(tx, &spent, &created);

        uow.insert_transaction(&transformed.transaction)?;
        queries += 1;
        if !transformed.history.is_empty() {
            uow.insert_history(&transformed.history)?;
            queries += 1;
        }
        if !transformed.unspent.is_empty() {
            uow.insert_unspent(&transformed.unspent)?;
            queries += 1;
        }
        if policy == UnspentPolicy::DeleteOnSpend {
            for outpoint in &transformed.spent {
                uow.delete_unspent(&outpoint.txid, outpoint.vout)?;
                queries += 1;
            }
        }

        inputs_total += transformed.transaction.inputs_total;
        outputs_total += transformed.transaction.outputs_total;
    }

    // 3. Totals and the processed flag
    uow.finish_block(height, inputs_total, outputs_total)?;
    queries += 1;

    debug!(
        "Transformed block {}: {} transactions, inputs {} outputs {}, {} queries",
        height,
        staged.len(),
        inputs_total,
        outputs_total,
        queries
    );
    Ok(queries)
}

/// Puts back the unspent rows of every output the block at `height` spends,
/// for use right before the block is deleted under
/// [`UnspentPolicy::DeleteOnSpend`]. Outputs created in the block itself, or
/// by a transaction that was never transformed, are left alone. Returns the
/// number of rows written.
pub fn restore_spent_outputs(uow: &mut dyn UnitOfWork, height: u32) -> Result<usize> {
    let mut restored = Vec::new();
    for tx in uow.staged_transactions(height)? {
        for link in uow.links_spent_by(&tx.txid)? {
            let Some(output) = link.output else {
                continue;
            };
            if output.block_height == height || uow.transaction(&output.txid)?.is_none() {
                continue;
            }
            // the creating transform may already have recorded it
            uow.delete_unspent(&output.txid, output.vout)?;
            restored.extend(output.addresses.iter().map(|address| UnspentOutput {
                address: address.clone(),
                block_height: output.block_height,
                txid: output.txid.clone(),
                vout: output.vout,
                value: output.value,
            }));
        }
    }
    if !restored.is_empty() {
        uow.insert_unspent(&restored)?;
    }
    debug!(
        "Restored {} unspent rows spent by block {}",
        restored.len(),
        height
    );
    Ok(restored.len())
}
