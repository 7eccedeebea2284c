//! In-process backend. Each unit of work holds the table lock for its whole
//! duration and journals an undo action for every mutation, so a failed unit
//! is rolled back before the lock is released.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::{IndexError, Result};
use crate::model::{
    AddressHistoryEntry, AddressStats, Amount, Block, BlockHash, BlockLink, HistoryTotals, Link,
    StagedBlock, StagedInput, StagedOutput, StagedTransaction, Transaction, Txid, UnspentOutput,
};
use crate::store::{Store, UnitOfWork};

#[derive(Default)]
struct Tables {
    blocks: BTreeMap<u32, Block>,
    block_hashes: BTreeMap<BlockHash, u32>,
    staged_transactions: BTreeMap<(u32, u32), StagedTransaction>,
    staged_txids: BTreeMap<Txid, (u32, u32)>,
    staged_inputs: BTreeMap<(Txid, u32), StagedInput>,
    staged_outputs: BTreeMap<(Txid, u32), StagedOutput>,
    links_by_input: BTreeMap<(Txid, u32), Link>,
    links_by_output: BTreeMap<(Txid, u32), Link>,
    transactions: BTreeMap<Txid, Transaction>,
    tx_positions: BTreeMap<(u32, u32), Txid>,
    history: BTreeMap<(String, Txid), AddressHistoryEntry>,
    // keyed by outpoint first so spends can find their rows without a scan
    unspent: BTreeMap<(Txid, u32, String), UnspentOutput>,
    stats: BTreeMap<String, AddressStats>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn atomically<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&mut dyn UnitOfWork) -> Result<T>,
    {
        // a panicked unit never rolled back, so its tables cannot be trusted
        let mut guard = self.tables.lock().map_err(|_| IndexError::Poisoned)?;
        let mut unit = MemoryUnit {
            tables: &mut guard,
            undo: Vec::new(),
        };
        let result = work(&mut unit);
        if result.is_err() {
            unit.rollback();
        }
        result
    }
}

type Undo = Box<dyn FnOnce(&mut Tables)>;
type Select<K, V> = fn(&mut Tables) -> &mut BTreeMap<K, V>;

struct MemoryUnit<'a> {
    tables: &'a mut Tables,
    undo: Vec<Undo>,
}

impl MemoryUnit<'_> {
    fn rollback(&mut self) {
        while let Some(undo) = self.undo.pop() {
            undo(self.tables);
        }
    }

    fn put<K, V>(&mut self, select: Select<K, V>, key: K, value: V)
    where
        K: Ord + Clone + 'static,
        V: 'static,
    {
        let previous = select(self.tables).insert(key.clone(), value);
        self.undo.push(Box::new(move |tables| {
            let table = select(tables);
            match previous {
                Some(value) => {
                    table.insert(key, value);
                }
                None => {
                    table.remove(&key);
                }
            }
        }));
    }

    fn take<K, V>(&mut self, select: Select<K, V>, key: &K) -> Option<V>
    where
        K: Ord + Clone + 'static,
        V: Clone + 'static,
    {
        let removed = select(self.tables).remove(key)?;
        let key = key.clone();
        let restored = removed.clone();
        self.undo.push(Box::new(move |tables| {
            select(tables).insert(key, restored);
        }));
        Some(removed)
    }

    fn replace<K, V>(&mut self, select: Select<K, V>, table: BTreeMap<K, V>)
    where
        K: 'static,
        V: 'static,
    {
        let previous = std::mem::replace(select(self.tables), table);
        self.undo.push(Box::new(move |tables| {
            *select(tables) = previous;
        }));
    }
}

fn violation(table: &'static str, detail: String) -> IndexError {
    IndexError::ConstraintViolation { table, detail }
}

fn txid_range(txid: &[u8]) -> std::ops::RangeInclusive<(Txid, u32)> {
    (txid.to_vec(), 0)..=(txid.to_vec(), u32::MAX)
}

impl UnitOfWork for MemoryUnit<'_> {
    fn stage_block(&mut self, block: &StagedBlock) -> Result<()> {
        let row = block.block_row();
        if self.tables.blocks.contains_key(&row.height) {
            return Err(violation(
                "blocks",
                format!("duplicate height {}", row.height),
            ));
        }
        if self.tables.block_hashes.contains_key(&row.hash) {
            return Err(violation(
                "blocks",
                format!("duplicate hash {}", hex::encode(&row.hash)),
            ));
        }
        self.put(|t| &mut t.block_hashes, row.hash.clone(), row.height);
        self.put(|t| &mut t.blocks, row.height, row);

        for staged in &block.transactions {
            let tx = &staged.transaction;
            if self.tables.staged_txids.contains_key(&tx.txid) {
                return Err(violation(
                    "staged_transactions",
                    format!("duplicate txid {}", hex::encode(&tx.txid)),
                ));
            }
            let position = (tx.block_height, tx.index);
            if self.tables.staged_transactions.contains_key(&position) {
                return Err(violation(
                    "staged_transactions",
                    format!("duplicate position {}:{}", position.0, position.1),
                ));
            }
            self.put(|t| &mut t.staged_txids, tx.txid.clone(), position);
            self.put(|t| &mut t.staged_transactions, position, tx.clone());

            for input in &staged.inputs {
                let key = (input.txid.clone(), input.vin);
                if self.tables.staged_inputs.contains_key(&key) {
                    return Err(violation(
                        "staged_inputs",
                        format!("duplicate input {}:{}", hex::encode(&key.0), key.1),
                    ));
                }
                self.put(|t| &mut t.staged_inputs, key, input.clone());
            }
            for output in &staged.outputs {
                let key = (output.txid.clone(), output.vout);
                if self.tables.staged_outputs.contains_key(&key) {
                    return Err(violation(
                        "staged_outputs",
                        format!("duplicate output {}:{}", hex::encode(&key.0), key.1),
                    ));
                }
                self.put(|t| &mut t.staged_outputs, key, output.clone());
            }
        }
        Ok(())
    }

    fn delete_block(&mut self, height: u32) -> Result<bool> {
        let Some(block) = self.take(|t| &mut t.blocks, &height) else {
            return Ok(false);
        };
        self.take(|t| &mut t.block_hashes, &block.hash);

        // staging rows
        let positions: Vec<(u32, u32)> = self
            .tables
            .staged_transactions
            .range((height, 0)..=(height, u32::MAX))
            .map(|(position, _)| *position)
            .collect();
        for position in positions {
            let Some(tx) = self.take(|t| &mut t.staged_transactions, &position) else {
                continue;
            };
            self.take(|t| &mut t.staged_txids, &tx.txid);
            let inputs: Vec<_> = self
                .tables
                .staged_inputs
                .range(txid_range(&tx.txid))
                .map(|(key, _)| key.clone())
                .collect();
            for key in inputs {
                self.take(|t| &mut t.staged_inputs, &key);
            }
            let outputs: Vec<_> = self
                .tables
                .staged_outputs
                .range(txid_range(&tx.txid))
                .map(|(key, _)| key.clone())
                .collect();
            for key in outputs {
                self.take(|t| &mut t.staged_outputs, &key);
            }
        }

        // links touching the block on either side
        let touches = |link: &Link| {
            link.input.as_ref().is_some_and(|i| i.block_height == height)
                || link.output.as_ref().is_some_and(|o| o.block_height == height)
        };
        let by_input: BTreeMap<_, _> = self
            .tables
            .links_by_input
            .iter()
            .filter(|&(_, link)| !touches(link))
            .map(|(key, link)| (key.clone(), link.clone()))
            .collect();
        let by_output: BTreeMap<_, _> = self
            .tables
            .links_by_output
            .iter()
            .filter(|&(_, link)| !touches(link))
            .map(|(key, link)| (key.clone(), link.clone()))
            .collect();
        self.replace(|t| &mut t.links_by_input, by_input);
        self.replace(|t| &mut t.links_by_output, by_output);

        // finalized transactions and everything hanging off them
        let positions: Vec<(u32, u32)> = self
            .tables
            .tx_positions
            .range((height, 0)..=(height, u32::MAX))
            .map(|(position, _)| *position)
            .collect();
        for position in positions {
            let Some(txid) = self.take(|t| &mut t.tx_positions, &position) else {
                continue;
            };
            self.take(|t| &mut t.transactions, &txid);

            let history: Vec<_> = self
                .tables
                .history
                .keys()
                .filter(|(_, entry_txid)| *entry_txid == txid)
                .cloned()
                .collect();
            for key in history {
                self.take(|t| &mut t.history, &key);
            }
            let unspent: Vec<_> = self
                .tables
                .unspent
                .range((txid.clone(), 0, String::new())..)
                .take_while(|((row_txid, _, _), _)| *row_txid == txid)
                .map(|(key, _)| key.clone())
                .collect();
            for key in unspent {
                self.take(|t| &mut t.unspent, &key);
            }
        }
        Ok(true)
    }

    fn lock_block(&mut self, height: u32) -> Result<Option<bool>> {
        Ok(self.tables.blocks.get(&height).map(|b| b.processed))
    }

    fn block(&mut self, height: u32) -> Result<Option<Block>> {
        Ok(self.tables.blocks.get(&height).cloned())
    }

    fn block_hash(&mut self, height: u32) -> Result<Option<Vec<u8>>> {
        Ok(self.tables.blocks.get(&height).map(|b| b.hash.clone()))
    }

    fn block_links(&mut self, from: u32, to: u32) -> Result<Vec<BlockLink>> {
        if from > to {
            return Ok(Vec::new());
        }
        Ok(self
            .tables
            .blocks
            .range(from..=to)
            .map(|(_, b)| BlockLink {
                height: b.height,
                hash: b.hash.clone(),
                next_hash: b.next_hash.clone(),
            })
            .collect())
    }

    fn tip_heights(&mut self) -> Result<Vec<u32>> {
        Ok(self
            .tables
            .blocks
            .values()
            .filter(|b| b.next_hash.is_none())
            .map(|b| b.height)
            .collect())
    }

    fn set_next_hash(&mut self, height: u32, next_hash: Option<&[u8]>) -> Result<bool> {
        let Some(mut block) = self.tables.blocks.get(&height).cloned() else {
            return Ok(false);
        };
        block.next_hash = next_hash.map(<[u8]>::to_vec);
        self.put(|t| &mut t.blocks, height, block);
        Ok(true)
    }

    fn finish_block(
        &mut self,
        height: u32,
        inputs_total: Amount,
        outputs_total: Amount,
    ) -> Result<()> {
        let Some(mut block) = self.tables.blocks.get(&height).cloned() else {
            return Err(IndexError::MissingBlock(height));
        };
        block.processed = true;
        block.inputs_total = Some(inputs_total);
        block.outputs_total = Some(outputs_total);
        self.put(|t| &mut t.blocks, height, block);
        Ok(())
    }

    fn heights_from(&mut self, start: u32) -> Result<Vec<u32>> {
        Ok(self.tables.blocks.range(start..).map(|(h, _)| *h).collect())
    }

    fn staged_transactions(&mut self, height: u32) -> Result<Vec<StagedTransaction>> {
        Ok(self
            .tables
            .staged_transactions
            .range((height, 0)..=(height, u32::MAX))
            .map(|(_, tx)| tx.clone())
            .collect())
    }

    fn staged_inputs(&mut self) -> Result<Vec<StagedInput>> {
        Ok(self.tables.staged_inputs.values().cloned().collect())
    }

    fn staged_outputs(&mut self) -> Result<Vec<StagedOutput>> {
        Ok(self.tables.staged_outputs.values().cloned().collect())
    }

    fn replace_links(&mut self, links: &[Link]) -> Result<()> {
        let mut by_input = BTreeMap::new();
        let mut by_output = BTreeMap::new();
        for link in links {
            if let Some(input) = &link.input {
                let key = (input.txid.clone(), input.vin);
                if by_input.insert(key, link.clone()).is_some() {
                    return Err(violation(
                        "links",
                        format!("input {}:{} linked twice", hex::encode(&input.txid), input.vin),
                    ));
                }
            }
            if let Some(output) = &link.output {
                let key = (output.txid.clone(), output.vout);
                if by_output.insert(key, link.clone()).is_some() {
                    return Err(violation(
                        "links",
                        format!(
                            "output {}:{} linked twice",
                            hex::encode(&output.txid),
                            output.vout
                        ),
                    ));
                }
            }
        }
        self.replace(|t| &mut t.links_by_input, by_input);
        self.replace(|t| &mut t.links_by_output, by_output);
        Ok(())
    }

    fn links_spent_by(&mut self, txid: &[u8]) -> Result<Vec<Link>> {
        Ok(self
            .tables
            .links_by_input
            .range(txid_range(txid))
            .filter(|(_, link)| link.output.is_some())
            .map(|(_, link)| link.clone())
            .collect())
    }

    fn links_created_by(&mut self, txid: &[u8]) -> Result<Vec<Link>> {
        Ok(self
            .tables
            .links_by_output
            .range(txid_range(txid))
            .map(|(_, link)| link.clone())
            .collect())
    }

    fn insert_transaction(&mut self, tx: &Transaction) -> Result<()> {
        if !self.tables.blocks.contains_key(&tx.block_height) {
            return Err(IndexError::MissingBlock(tx.block_height));
        }
        if self.tables.transactions.contains_key(&tx.txid) {
            return Err(violation(
                "transactions",
                format!("duplicate txid {}", hex::encode(&tx.txid)),
            ));
        }
        let position = (tx.block_height, tx.index);
        if self.tables.tx_positions.contains_key(&position) {
            return Err(violation(
                "transactions",
                format!("duplicate position {}:{}", position.0, position.1),
            ));
        }
        self.put(|t| &mut t.tx_positions, position, tx.txid.clone());
        self.put(|t| &mut t.transactions, tx.txid.clone(), tx.clone());
        Ok(())
    }

    fn insert_history(&mut self, rows: &[AddressHistoryEntry]) -> Result<()> {
        for row in rows {
            if !self.tables.transactions.contains_key(&row.txid) {
                return Err(violation(
                    "address_history",
                    format!("unknown txid {}", hex::encode(&row.txid)),
                ));
            }
            let key = (row.address.clone(), row.txid.clone());
            if self.tables.history.contains_key(&key) {
                return Err(violation(
                    "address_history",
                    format!("duplicate entry {} {}", row.address, hex::encode(&row.txid)),
                ));
            }
            self.put(|t| &mut t.history, key, row.clone());
        }
        Ok(())
    }

    fn insert_unspent(&mut self, rows: &[UnspentOutput]) -> Result<()> {
        for row in rows {
            if !self.tables.transactions.contains_key(&row.txid) {
                return Err(violation(
                    "unspent_outputs",
                    format!("unknown txid {}", hex::encode(&row.txid)),
                ));
            }
            let key = (row.txid.clone(), row.vout, row.address.clone());
            if self.tables.unspent.contains_key(&key) {
                return Err(violation(
                    "unspent_outputs",
                    format!(
                        "duplicate entry {} {}:{}",
                        row.address,
                        hex::encode(&row.txid),
                        row.vout
                    ),
                ));
            }
            self.put(|t| &mut t.unspent, key, row.clone());
        }
        Ok(())
    }

    fn delete_unspent(&mut self, txid: &[u8], vout: u32) -> Result<usize> {
        let keys: Vec<_> = self
            .tables
            .unspent
            .range((txid.to_vec(), vout, String::new())..)
            .take_while(|((row_txid, row_vout, _), _)| row_txid == txid && *row_vout == vout)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            self.take(|t| &mut t.unspent, key);
        }
        Ok(keys.len())
    }

    fn transaction(&mut self, txid: &[u8]) -> Result<Option<Transaction>> {
        Ok(self.tables.transactions.get(txid).cloned())
    }

    fn address_history(&mut self, address: &str) -> Result<Vec<AddressHistoryEntry>> {
        let mut rows: Vec<_> = self
            .tables
            .history
            .range((address.to_string(), Vec::new())..)
            .take_while(|((row_address, _), _)| row_address == address)
            .map(|(_, row)| row.clone())
            .collect();
        rows.sort_by_key(|row| (row.block_height, row.tx_index));
        Ok(rows)
    }

    fn unspent_outputs(&mut self, address: &str) -> Result<Vec<UnspentOutput>> {
        let mut rows: Vec<_> = self
            .tables
            .unspent
            .values()
            .filter(|row| row.address == address)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            (a.block_height, &a.txid, a.vout).cmp(&(b.block_height, &b.txid, b.vout))
        });
        Ok(rows)
    }

    fn history_totals(&mut self) -> Result<Vec<HistoryTotals>> {
        let mut totals: BTreeMap<&str, HistoryTotals> = BTreeMap::new();
        for row in self.tables.history.values() {
            let entry = totals
                .entry(row.address.as_str())
                .or_insert_with(|| HistoryTotals {
                    address: row.address.clone(),
                    count: 0,
                    received: Amount::ZERO,
                    sent: Amount::ZERO,
                });
            entry.count += 1;
            entry.received += row.received;
            entry.sent += row.sent;
        }
        Ok(totals.into_values().collect())
    }

    fn unspent_counts(&mut self) -> Result<Vec<(String, i64)>> {
        let mut counts: BTreeMap<String, i64> = BTreeMap::new();
        for row in self.tables.unspent.values() {
            *counts.entry(row.address.clone()).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }

    fn replace_address_stats(&mut self, rows: &[AddressStats]) -> Result<()> {
        let table = rows
            .iter()
            .map(|row| (row.address.clone(), row.clone()))
            .collect();
        self.replace(|t| &mut t.stats, table);
        Ok(())
    }

    fn address_stats(&mut self, address: &str) -> Result<Option<AddressStats>> {
        Ok(self.tables.stats.get(address).cloned())
    }
}
