//! PostgreSQL backend. One unit of work is one database transaction; the
//! per-block hold is a row lock taken with `SELECT ... FOR UPDATE`.

use anyhow::{Context, Result as AnyResult};
use bigdecimal::BigDecimal;
use diesel::dsl::{count_star, sum};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use std::time::Duration;
use tracing::info;

use crate::error::{IndexError, Result};
use crate::model::{
    AddressHistoryEntry, AddressStats, Amount, Block, BlockLink, HistoryTotals, Link,
    StagedBlock, StagedInput, StagedOutput, StagedTransaction, Transaction, UnspentOutput,
};
use crate::store::{Store, UnitOfWork};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

pub mod models;
pub mod schema;

use models::{
    AddressStatsRow, BlockRow, HistoryRow, LinkRow, NewLink, StagedInputRow, StagedOutputRow,
    StagedTransactionRow, TransactionRow, UnspentRow,
};

/// Type alias for database connection pool
pub type DbPool = Pool<ConnectionManager<PgConnection>>;

// keeps multi-row inserts well under the bind parameter limit
const INSERT_CHUNK: usize = 1_000;

/// Creates a Postgres connection pool
pub fn create_connection_pool(
    database_url: &str,
    pool_size: u32,
    connection_timeout: Duration,
) -> AnyResult<DbPool> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);

    Pool::builder()
        .max_size(pool_size)
        .connection_timeout(connection_timeout)
        .test_on_check_out(true)
        .build(manager)
        .context("Failed to create database connection pool")
}

/// Runs database migrations
pub fn run_migrations(conn: &mut PgConnection) -> Result<()> {
    info!("Running database migrations");

    match conn.run_pending_migrations(MIGRATIONS) {
        Ok(applied) => {
            info!(
                "Database migrations completed successfully ({} applied)",
                applied.len()
            );
            Ok(())
        }
        Err(e) => Err(IndexError::Migration(e.to_string())),
    }
}

// Heights are INTEGER columns. Range bounds past i32::MAX clamp to it.
fn db_height(height: u32) -> i32 {
    i32::try_from(height).unwrap_or(i32::MAX)
}

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

impl Store for PgStore {
    fn atomically<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&mut dyn UnitOfWork) -> Result<T>,
    {
        let mut pooled = self.pool.get()?;
        let conn: &mut PgConnection = &mut pooled;
        conn.transaction(|conn| work(&mut PgUnit { conn }))
    }
}

struct PgUnit<'a> {
    conn: &'a mut PgConnection,
}

impl UnitOfWork for PgUnit<'_> {
    fn stage_block(&mut self, block: &StagedBlock) -> Result<()> {
        use schema::{blocks, staged_inputs, staged_outputs, staged_transactions};

        let row = BlockRow::from(&block.block_row());
        diesel::insert_into(blocks::table)
            .values(&row)
            .execute(self.conn)?;

        let txs: Vec<StagedTransactionRow> = block
            .transactions
            .iter()
            .map(|tx| StagedTransactionRow::from(&tx.transaction))
            .collect();
        for chunk in txs.chunks(INSERT_CHUNK) {
            diesel::insert_into(staged_transactions::table)
                .values(chunk)
                .execute(self.conn)?;
        }

        let inputs: Vec<StagedInputRow> = block
            .transactions
            .iter()
            .flat_map(|tx| tx.inputs.iter().map(StagedInputRow::from))
            .collect();
        for chunk in inputs.chunks(INSERT_CHUNK) {
            diesel::insert_into(staged_inputs::table)
                .values(chunk)
                .execute(self.conn)?;
        }

        let outputs: Vec<StagedOutputRow> = block
            .transactions
            .iter()
            .flat_map(|tx| tx.outputs.iter().map(StagedOutputRow::from))
            .collect();
        for chunk in outputs.chunks(INSERT_CHUNK) {
            diesel::insert_into(staged_outputs::table)
                .values(chunk)
                .execute(self.conn)?;
        }
        Ok(())
    }

    fn delete_block(&mut self, height_val: u32) -> Result<bool> {
        use schema::blocks::dsl::*;

        // everything else goes with it through ON DELETE CASCADE
        let deleted = diesel::delete(blocks.find(db_height(height_val))).execute(self.conn)?;
        Ok(deleted > 0)
    }

    fn lock_block(&mut self, height_val: u32) -> Result<Option<bool>> {
        use schema::blocks::dsl::*;

        let flag = blocks
            .find(db_height(height_val))
            .select(processed)
            .for_update()
            .first::<bool>(self.conn)
            .optional()?;
        Ok(flag)
    }

    fn block(&mut self, height_val: u32) -> Result<Option<Block>> {
        use schema::blocks::dsl::*;

        blocks
            .find(db_height(height_val))
            .select(BlockRow::as_select())
            .first(self.conn)
            .optional()?
            .map(BlockRow::into_block)
            .transpose()
    }

    fn block_hash(&mut self, height_val: u32) -> Result<Option<Vec<u8>>> {
        use schema::blocks::dsl::*;

        Ok(blocks
            .find(db_height(height_val))
            .select(hash)
            .first::<Vec<u8>>(self.conn)
            .optional()?)
    }

    fn block_links(&mut self, from: u32, to: u32) -> Result<Vec<BlockLink>> {
        use schema::blocks::dsl::*;

        let rows = blocks
            .filter(height.between(db_height(from), db_height(to)))
            .order(height.asc())
            .select((height, hash, next_hash))
            .load::<(i32, Vec<u8>, Option<Vec<u8>>)>(self.conn)?;
        Ok(rows
            .into_iter()
            .map(|(h, block_hash, next)| BlockLink {
                height: h as u32,
                hash: block_hash,
                next_hash: next,
            })
            .collect())
    }

    fn tip_heights(&mut self) -> Result<Vec<u32>> {
        use schema::blocks::dsl::*;

        let rows = blocks
            .filter(next_hash.is_null())
            .order(height.asc())
            .select(height)
            .load::<i32>(self.conn)?;
        Ok(rows.into_iter().map(|h| h as u32).collect())
    }

    fn set_next_hash(&mut self, height_val: u32, next_hash_val: Option<&[u8]>) -> Result<bool> {
        use schema::blocks::dsl::*;

        let updated = diesel::update(blocks.find(db_height(height_val)))
            .set(next_hash.eq(next_hash_val.map(<[u8]>::to_vec)))
            .execute(self.conn)?;
        Ok(updated > 0)
    }

    fn finish_block(
        &mut self,
        height_val: u32,
        inputs_total_val: Amount,
        outputs_total_val: Amount,
    ) -> Result<()> {
        use schema::blocks::dsl::*;

        let updated = diesel::update(blocks.find(db_height(height_val)))
            .set((
                processed.eq(true),
                inputs_total.eq(Some(inputs_total_val.to_bigdecimal())),
                outputs_total.eq(Some(outputs_total_val.to_bigdecimal())),
            ))
            .execute(self.conn)?;
        if updated == 0 {
            return Err(IndexError::MissingBlock(height_val));
        }
        Ok(())
    }

    fn heights_from(&mut self, start: u32) -> Result<Vec<u32>> {
        use schema::blocks::dsl::*;

        let rows = blocks
            .filter(height.ge(db_height(start)))
            .order(height.asc())
            .select(height)
            .load::<i32>(self.conn)?;
        Ok(rows.into_iter().map(|h| h as u32).collect())
    }

    fn staged_transactions(&mut self, height_val: u32) -> Result<Vec<StagedTransaction>> {
        use schema::staged_transactions::dsl::*;

        staged_transactions
            .filter(block_height.eq(db_height(height_val)))
            .order(tx_index.asc())
            .select(StagedTransactionRow::as_select())
            .load(self.conn)?
            .into_iter()
            .map(StagedTransactionRow::into_staged)
            .collect()
    }

    fn staged_inputs(&mut self) -> Result<Vec<StagedInput>> {
        use schema::staged_inputs::dsl::*;

        let rows = staged_inputs
            .order((txid.asc(), vin.asc()))
            .select(StagedInputRow::as_select())
            .load(self.conn)?;
        Ok(rows.into_iter().map(StagedInput::from).collect())
    }

    fn staged_outputs(&mut self) -> Result<Vec<StagedOutput>> {
        use schema::staged_outputs::dsl::*;

        let rows = staged_outputs
            .order((txid.asc(), vout.asc()))
            .select(StagedOutputRow::as_select())
            .load(self.conn)?;
        Ok(rows.into_iter().map(StagedOutput::from).collect())
    }

    fn replace_links(&mut self, new_links: &[Link]) -> Result<()> {
        use schema::links::dsl::*;

        diesel::delete(links).execute(self.conn)?;
        let rows: Vec<NewLink> = new_links.iter().map(NewLink::from).collect();
        for chunk in rows.chunks(INSERT_CHUNK) {
            diesel::insert_into(links).values(chunk).execute(self.conn)?;
        }
        Ok(())
    }

    fn links_spent_by(&mut self, txid_val: &[u8]) -> Result<Vec<Link>> {
        use schema::links::dsl::*;

        links
            .filter(input_txid.eq(txid_val))
            .filter(output_txid.is_not_null())
            .order(input_vin.asc())
            .select(LinkRow::as_select())
            .load(self.conn)?
            .into_iter()
            .map(LinkRow::into_link)
            .collect()
    }

    fn links_created_by(&mut self, txid_val: &[u8]) -> Result<Vec<Link>> {
        use schema::links::dsl::*;

        links
            .filter(output_txid.eq(txid_val))
            .order(output_vout.asc())
            .select(LinkRow::as_select())
            .load(self.conn)?
            .into_iter()
            .map(LinkRow::into_link)
            .collect()
    }

    fn insert_transaction(&mut self, tx: &Transaction) -> Result<()> {
        use schema::transactions;

        diesel::insert_into(transactions::table)
            .values(&TransactionRow::from(tx))
            .execute(self.conn)?;
        Ok(())
    }

    fn insert_history(&mut self, rows: &[AddressHistoryEntry]) -> Result<()> {
        use schema::address_history;

        let rows: Vec<HistoryRow> = rows.iter().map(HistoryRow::from).collect();
        for chunk in rows.chunks(INSERT_CHUNK) {
            diesel::insert_into(address_history::table)
                .values(chunk)
                .execute(self.conn)?;
        }
        Ok(())
    }

    fn insert_unspent(&mut self, rows: &[UnspentOutput]) -> Result<()> {
        use schema::unspent_outputs;

        let rows: Vec<UnspentRow> = rows.iter().map(UnspentRow::from).collect();
        for chunk in rows.chunks(INSERT_CHUNK) {
            diesel::insert_into(unspent_outputs::table)
                .values(chunk)
                .execute(self.conn)?;
        }
        Ok(())
    }

    fn delete_unspent(&mut self, txid_val: &[u8], vout_val: u32) -> Result<usize> {
        use schema::unspent_outputs::dsl::*;

        Ok(diesel::delete(
            unspent_outputs
                .filter(txid.eq(txid_val))
                .filter(vout.eq(vout_val as i32)),
        )
        .execute(self.conn)?)
    }

    fn transaction(&mut self, txid_val: &[u8]) -> Result<Option<Transaction>> {
        use schema::transactions::dsl::*;

        transactions
            .find(txid_val)
            .select(TransactionRow::as_select())
            .first(self.conn)
            .optional()?
            .map(TransactionRow::into_transaction)
            .transpose()
    }

    fn address_history(&mut self, address_val: &str) -> Result<Vec<AddressHistoryEntry>> {
        use schema::address_history::dsl::*;

        address_history
            .filter(address.eq(address_val))
            .order((block_height.asc(), tx_index.asc()))
            .select(HistoryRow::as_select())
            .load(self.conn)?
            .into_iter()
            .map(HistoryRow::into_entry)
            .collect()
    }

    fn unspent_outputs(&mut self, address_val: &str) -> Result<Vec<UnspentOutput>> {
        use schema::unspent_outputs::dsl::*;

        unspent_outputs
            .filter(address.eq(address_val))
            .order((block_height.asc(), txid.asc(), vout.asc()))
            .select(UnspentRow::as_select())
            .load(self.conn)?
            .into_iter()
            .map(UnspentRow::into_unspent)
            .collect()
    }

    fn history_totals(&mut self) -> Result<Vec<HistoryTotals>> {
        use schema::address_history::dsl::*;

        let rows = address_history
            .group_by(address)
            .select((address, count_star(), sum(received), sum(sent)))
            .order(address.asc())
            .load::<(String, i64, Option<BigDecimal>, Option<BigDecimal>)>(self.conn)?;

        rows.into_iter()
            .map(|(address_val, count, received_sum, sent_sum)| {
                Ok(HistoryTotals {
                    address: address_val,
                    count,
                    received: received_sum
                        .as_ref()
                        .map(Amount::from_bigdecimal)
                        .transpose()?
                        .unwrap_or_default(),
                    sent: sent_sum
                        .as_ref()
                        .map(Amount::from_bigdecimal)
                        .transpose()?
                        .unwrap_or_default(),
                })
            })
            .collect()
    }

    fn unspent_counts(&mut self) -> Result<Vec<(String, i64)>> {
        use schema::unspent_outputs::dsl::*;

        Ok(unspent_outputs
            .group_by(address)
            .select((address, count_star()))
            .order(address.asc())
            .load::<(String, i64)>(self.conn)?)
    }

    fn replace_address_stats(&mut self, rows: &[AddressStats]) -> Result<()> {
        use schema::address_stats;

        diesel::delete(address_stats::table).execute(self.conn)?;
        let rows: Vec<AddressStatsRow> = rows.iter().map(AddressStatsRow::from).collect();
        for chunk in rows.chunks(INSERT_CHUNK) {
            diesel::insert_into(address_stats::table)
                .values(chunk)
                .execute(self.conn)?;
        }
        Ok(())
    }

    fn address_stats(&mut self, address_val: &str) -> Result<Option<AddressStats>> {
        use schema::address_stats::dsl::*;

        address_stats
            .find(address_val)
            .select(AddressStatsRow::as_select())
            .first(self.conn)
            .optional()?
            .map(AddressStatsRow::into_stats)
            .transpose()
    }
}
