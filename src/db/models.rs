use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde_json::Value;

use super::schema::{
    address_history, address_stats, blocks, links, staged_inputs, staged_outputs,
    staged_transactions, transactions, unspent_outputs,
};
use crate::error::Result;
use crate::model::{
    AddressHistoryEntry, AddressStats, Amount, Block, Link, LinkedInput, LinkedOutput, OutPoint,
    StagedInput, StagedOutput, StagedTransaction, Transaction, UnspentOutput,
};

// Model for querying and inserting into 'blocks' table
#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = blocks)]
pub struct BlockRow {
    pub height: i32,
    pub hash: Vec<u8>, // BYTEA
    pub prev_hash: Vec<u8>,
    pub next_hash: Option<Vec<u8>>,
    pub size: i32,
    pub block_timestamp: NaiveDateTime,
    pub transaction_count: i32,
    pub input_count: i32,
    pub output_count: i32,
    pub inputs_total: Option<BigDecimal>, // NUMERIC
    pub outputs_total: Option<BigDecimal>,
    pub processed: bool,
}

impl From<&Block> for BlockRow {
    fn from(block: &Block) -> Self {
        Self {
            height: block.height as i32,
            hash: block.hash.clone(),
            prev_hash: block.prev_hash.clone(),
            next_hash: block.next_hash.clone(),
            size: block.size as i32,
            block_timestamp: block.timestamp,
            transaction_count: block.transaction_count as i32,
            input_count: block.input_count as i32,
            output_count: block.output_count as i32,
            inputs_total: block.inputs_total.map(Amount::to_bigdecimal),
            outputs_total: block.outputs_total.map(Amount::to_bigdecimal),
            processed: block.processed,
        }
    }
}

impl BlockRow {
    pub fn into_block(self) -> Result<Block> {
        Ok(Block {
            height: self.height as u32,
            hash: self.hash,
            prev_hash: self.prev_hash,
            next_hash: self.next_hash,
            size: self.size as u32,
            timestamp: self.block_timestamp,
            transaction_count: self.transaction_count as u32,
            input_count: self.input_count as u32,
            output_count: self.output_count as u32,
            inputs_total: self
                .inputs_total
                .as_ref()
                .map(Amount::from_bigdecimal)
                .transpose()?,
            outputs_total: self
                .outputs_total
                .as_ref()
                .map(Amount::from_bigdecimal)
                .transpose()?,
            processed: self.processed,
        })
    }
}

// Model for the 'staged_transactions' table
#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = staged_transactions)]
pub struct StagedTransactionRow {
    pub txid: Vec<u8>,
    pub block_height: i32,
    pub tx_index: i32,
    pub raw: Vec<u8>,
    pub block_timestamp: NaiveDateTime,
    pub input_count: i32,
    pub output_count: i32,
    pub outputs_total: BigDecimal,
}

impl From<&StagedTransaction> for StagedTransactionRow {
    fn from(tx: &StagedTransaction) -> Self {
        Self {
            txid: tx.txid.clone(),
            block_height: tx.block_height as i32,
            tx_index: tx.index as i32,
            raw: tx.raw.clone(),
            block_timestamp: tx.timestamp,
            input_count: tx.input_count as i32,
            output_count: tx.output_count as i32,
            outputs_total: tx.outputs_total.to_bigdecimal(),
        }
    }
}

impl StagedTransactionRow {
    pub fn into_staged(self) -> Result<StagedTransaction> {
        Ok(StagedTransaction {
            block_height: self.block_height as u32,
            index: self.tx_index as u32,
            txid: self.txid,
            raw: self.raw,
            timestamp: self.block_timestamp,
            input_count: self.input_count as u32,
            output_count: self.output_count as u32,
            outputs_total: Amount::from_bigdecimal(&self.outputs_total)?,
        })
    }
}

// Model for the 'staged_inputs' table
#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = staged_inputs)]
pub struct StagedInputRow {
    pub txid: Vec<u8>,
    pub vin: i32,
    pub block_height: i32,
    pub data: Value, // JSONB
    pub output_txid: Option<Vec<u8>>,
    pub output_vout: Option<i32>,
}

impl From<&StagedInput> for StagedInputRow {
    fn from(input: &StagedInput) -> Self {
        Self {
            txid: input.txid.clone(),
            vin: input.vin as i32,
            block_height: input.block_height as i32,
            data: input.data.clone(),
            output_txid: input.spends.as_ref().map(|o| o.txid.clone()),
            output_vout: input.spends.as_ref().map(|o| o.vout as i32),
        }
    }
}

impl From<StagedInputRow> for StagedInput {
    fn from(row: StagedInputRow) -> Self {
        let spends = match (row.output_txid, row.output_vout) {
            (Some(txid), Some(vout)) => Some(OutPoint {
                txid,
                vout: vout as u32,
            }),
            _ => None,
        };
        StagedInput {
            block_height: row.block_height as u32,
            txid: row.txid,
            vin: row.vin as u32,
            data: row.data,
            spends,
        }
    }
}

// Model for the 'staged_outputs' table
#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = staged_outputs)]
pub struct StagedOutputRow {
    pub txid: Vec<u8>,
    pub vout: i32,
    pub block_height: i32,
    pub data: Value,
}

impl From<&StagedOutput> for StagedOutputRow {
    fn from(output: &StagedOutput) -> Self {
        Self {
            txid: output.txid.clone(),
            vout: output.vout as i32,
            block_height: output.block_height as i32,
            data: output.data.clone(),
        }
    }
}

impl From<StagedOutputRow> for StagedOutput {
    fn from(row: StagedOutputRow) -> Self {
        StagedOutput {
            block_height: row.block_height as u32,
            txid: row.txid,
            vout: row.vout as u32,
            data: row.data,
        }
    }
}

// Model for inserting into the 'links' table
#[derive(Insertable)]
#[diesel(table_name = links)]
pub struct NewLink {
    pub input_txid: Option<Vec<u8>>,
    pub input_vin: Option<i32>,
    pub input_block_height: Option<i32>,
    pub output_txid: Option<Vec<u8>>,
    pub output_vout: Option<i32>,
    pub output_block_height: Option<i32>,
    pub output_value: Option<BigDecimal>,
    pub output_addresses: Vec<String>, // TEXT[]
}

impl From<&Link> for NewLink {
    fn from(link: &Link) -> Self {
        let input = link.input.as_ref();
        let output = link.output.as_ref();
        Self {
            input_txid: input.map(|i| i.txid.clone()),
            input_vin: input.map(|i| i.vin as i32),
            input_block_height: input.map(|i| i.block_height as i32),
            output_txid: output.map(|o| o.txid.clone()),
            output_vout: output.map(|o| o.vout as i32),
            output_block_height: output.map(|o| o.block_height as i32),
            output_value: output.map(|o| o.value.to_bigdecimal()),
            output_addresses: output.map(|o| o.addresses.clone()).unwrap_or_default(),
        }
    }
}

// Model for querying the 'links' table
#[derive(Queryable, Selectable)]
#[diesel(table_name = links)]
pub struct LinkRow {
    pub id: i64,
    pub input_txid: Option<Vec<u8>>,
    pub input_vin: Option<i32>,
    pub input_block_height: Option<i32>,
    pub output_txid: Option<Vec<u8>>,
    pub output_vout: Option<i32>,
    pub output_block_height: Option<i32>,
    pub output_value: Option<BigDecimal>,
    pub output_addresses: Vec<String>,
}

impl LinkRow {
    pub fn into_link(self) -> Result<Link> {
        let input = match (self.input_txid, self.input_vin, self.input_block_height) {
            (Some(txid), Some(vin), Some(block_height)) => Some(LinkedInput {
                block_height: block_height as u32,
                txid,
                vin: vin as u32,
            }),
            _ => None,
        };
        let output = match (
            self.output_txid,
            self.output_vout,
            self.output_block_height,
            self.output_value,
        ) {
            (Some(txid), Some(vout), Some(block_height), Some(value)) => Some(LinkedOutput {
                block_height: block_height as u32,
                txid,
                vout: vout as u32,
                value: Amount::from_bigdecimal(&value)?,
                addresses: self.output_addresses,
            }),
            _ => None,
        };
        Ok(Link { input, output })
    }
}

// Model for querying and inserting into the 'transactions' table
#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = transactions)]
pub struct TransactionRow {
    pub txid: Vec<u8>,
    pub block_height: i32,
    pub tx_index: i32,
    pub raw: Vec<u8>,
    pub block_timestamp: NaiveDateTime,
    pub input_count: i32,
    pub output_count: i32,
    pub inputs_total: BigDecimal,
    pub outputs_total: BigDecimal,
}

impl From<&Transaction> for TransactionRow {
    fn from(tx: &Transaction) -> Self {
        Self {
            txid: tx.txid.clone(),
            block_height: tx.block_height as i32,
            tx_index: tx.index as i32,
            raw: tx.raw.clone(),
            block_timestamp: tx.timestamp,
            input_count: tx.input_count as i32,
            output_count: tx.output_count as i32,
            inputs_total: tx.inputs_total.to_bigdecimal(),
            outputs_total: tx.outputs_total.to_bigdecimal(),
        }
    }
}

impl TransactionRow {
    pub fn into_transaction(self) -> Result<Transaction> {
        Ok(Transaction {
            block_height: self.block_height as u32,
            index: self.tx_index as u32,
            txid: self.txid,
            raw: self.raw,
            timestamp: self.block_timestamp,
            input_count: self.input_count as u32,
            output_count: self.output_count as u32,
            inputs_total: Amount::from_bigdecimal(&self.inputs_total)?,
            outputs_total: Amount::from_bigdecimal(&self.outputs_total)?,
        })
    }
}

// Model for the 'address_history' table
#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = address_history)]
pub struct HistoryRow {
    pub address: String,
    pub block_height: i32,
    pub txid: Vec<u8>,
    pub tx_index: i32,
    pub block_timestamp: NaiveDateTime,
    pub received: BigDecimal,
    pub sent: BigDecimal,
}

impl From<&AddressHistoryEntry> for HistoryRow {
    fn from(entry: &AddressHistoryEntry) -> Self {
        Self {
            address: entry.address.clone(),
            block_height: entry.block_height as i32,
            txid: entry.txid.clone(),
            tx_index: entry.tx_index as i32,
            block_timestamp: entry.timestamp,
            received: entry.received.to_bigdecimal(),
            sent: entry.sent.to_bigdecimal(),
        }
    }
}

impl HistoryRow {
    pub fn into_entry(self) -> Result<AddressHistoryEntry> {
        Ok(AddressHistoryEntry {
            address: self.address,
            block_height: self.block_height as u32,
            txid: self.txid,
            tx_index: self.tx_index as u32,
            timestamp: self.block_timestamp,
            received: Amount::from_bigdecimal(&self.received)?,
            sent: Amount::from_bigdecimal(&self.sent)?,
        })
    }
}

// Model for the 'unspent_outputs' table
#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = unspent_outputs)]
pub struct UnspentRow {
    pub address: String,
    pub block_height: i32,
    pub txid: Vec<u8>,
    pub vout: i32,
    pub value: BigDecimal,
}

impl From<&UnspentOutput> for UnspentRow {
    fn from(output: &UnspentOutput) -> Self {
        Self {
            address: output.address.clone(),
            block_height: output.block_height as i32,
            txid: output.txid.clone(),
            vout: output.vout as i32,
            value: output.value.to_bigdecimal(),
        }
    }
}

impl UnspentRow {
    pub fn into_unspent(self) -> Result<UnspentOutput> {
        Ok(UnspentOutput {
            address: self.address,
            block_height: self.block_height as u32,
            txid: self.txid,
            vout: self.vout as u32,
            value: Amount::from_bigdecimal(&self.value)?,
        })
    }
}

// Model for the 'address_stats' table
#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = address_stats)]
pub struct AddressStatsRow {
    pub address: String,
    pub count_history_confirmed: i64,
    pub count_history_unconfirmed: i64,
    pub count_unspent_confirmed: i64,
    pub count_unspent_unconfirmed: i64,
    pub received_confirmed: BigDecimal,
    pub received_unconfirmed: BigDecimal,
    pub sent_confirmed: BigDecimal,
    pub sent_unconfirmed: BigDecimal,
}

impl From<&AddressStats> for AddressStatsRow {
    fn from(stats: &AddressStats) -> Self {
        Self {
            address: stats.address.clone(),
            count_history_confirmed: stats.count_history_confirmed,
            count_history_unconfirmed: stats.count_history_unconfirmed,
            count_unspent_confirmed: stats.count_unspent_confirmed,
            count_unspent_unconfirmed: stats.count_unspent_unconfirmed,
            received_confirmed: stats.received_confirmed.to_bigdecimal(),
            received_unconfirmed: stats.received_unconfirmed.to_bigdecimal(),
            sent_confirmed: stats.sent_confirmed.to_bigdecimal(),
            sent_unconfirmed: stats.sent_unconfirmed.to_bigdecimal(),
        }
    }
}

impl AddressStatsRow {
    pub fn into_stats(self) -> Result<AddressStats> {
        Ok(AddressStats {
            address: self.address,
            count_history_confirmed: self.count_history_confirmed,
            count_history_unconfirmed: self.count_history_unconfirmed,
            count_unspent_confirmed: self.count_unspent_confirmed,
            count_unspent_unconfirmed: self.count_unspent_unconfirmed,
            received_confirmed: Amount::from_bigdecimal(&self.received_confirmed)?,
            received_unconfirmed: Amount::from_bigdecimal(&self.received_unconfirmed)?,
            sent_confirmed: Amount::from_bigdecimal(&self.sent_confirmed)?,
            sent_unconfirmed: Amount::from_bigdecimal(&self.sent_unconfirmed)?,
        })
    }
}
