//! Address stats aggregator. A full recompute from address history and the
//! unspent set; it must not run while transforms of the batch are in flight.

use std::collections::HashMap;

use tracing::info;

use crate::error::Result;
use crate::model::{AddressStats, HistoryTotals};
use crate::store::UnitOfWork;

/// Left-joins history totals with unspent counts. Only addresses with
/// history get a row; unconfirmed columns stay zero since nothing here
/// tracks unconfirmed activity.
pub fn aggregate(history: Vec<HistoryTotals>, unspent: Vec<(String, i64)>) -> Vec<AddressStats> {
    let unspent: HashMap<String, i64> = unspent.into_iter().collect();
    history
        .into_iter()
        .map(|totals| AddressStats {
            count_unspent_confirmed: unspent.get(&totals.address).copied().unwrap_or(0),
            count_history_confirmed: totals.count,
            received_confirmed: totals.received,
            sent_confirmed: totals.sent,
            address: totals.address,
            ..AddressStats::default()
        })
        .collect()
}

/// Rebuilds the stats table and returns the number of addresses written.
pub fn refresh(uow: &mut dyn UnitOfWork) -> Result<usize> {
    let history = uow.history_totals()?;
    let unspent = uow.unspent_counts()?;
    let rows = aggregate(history, unspent);
    uow.replace_address_stats(&rows)?;
    info!("Address stats refreshed for {} addresses", rows.len());
    Ok(rows.len())
}
