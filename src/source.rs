//! JSON-lines block source: one decoded block per line, as produced by the
//! upstream decoder.
//!
//! ```json
//! {"height":1,"hash":"..","prev_hash":"..","size":215,"time":1231469665,
//!  "transactions":[{"txid":"..","raw":"..",
//!    "inputs":[{"spends":{"txid":"..","vout":0},"script_sig":".."}],
//!    "outputs":[{"value":5000000000,"addresses":["1A1z.."]}]}]}
//! ```
//!
//! Input and output objects are stored verbatim as descriptors; an input's
//! `spends` is lifted out as its resolved reference, absent for coinbase.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use crate::model::{
    Amount, BlockHeader, OutPoint, OutputDescriptor, StagedBlock, StagedInput, StagedOutput,
    StagedTransaction, StagedTx,
};

#[derive(Debug, Deserialize)]
pub struct RawBlock {
    pub height: u32,
    #[serde(with = "hex")]
    pub hash: Vec<u8>,
    #[serde(with = "hex")]
    pub prev_hash: Vec<u8>,
    pub size: u32,
    #[serde(with = "chrono::naive::serde::ts_seconds")]
    pub time: NaiveDateTime,
    #[serde(default)]
    pub transactions: Vec<RawTransaction>,
}

#[derive(Debug, Deserialize)]
pub struct RawTransaction {
    #[serde(with = "hex")]
    pub txid: Vec<u8>,
    #[serde(with = "hex")]
    pub raw: Vec<u8>,
    #[serde(default)]
    pub inputs: Vec<Value>,
    #[serde(default)]
    pub outputs: Vec<Value>,
}

impl RawBlock {
    pub fn into_staged(self) -> Result<StagedBlock> {
        let height = self.height;
        let timestamp = self.time;
        let transactions = self
            .transactions
            .into_iter()
            .enumerate()
            .map(|(index, tx)| tx.into_staged(height, index as u32, timestamp))
            .collect::<Result<Vec<_>>>()?;

        Ok(StagedBlock {
            header: BlockHeader {
                height,
                hash: self.hash,
                prev_hash: self.prev_hash,
                size: self.size,
                timestamp,
            },
            transactions,
        })
    }
}

impl RawTransaction {
    fn into_staged(self, height: u32, index: u32, timestamp: NaiveDateTime) -> Result<StagedTx> {
        let txid_hex = hex::encode(&self.txid);

        let inputs = self
            .inputs
            .into_iter()
            .enumerate()
            .map(|(vin, data)| {
                let spends = match data.get("spends") {
                    None | Some(Value::Null) => None,
                    Some(reference) => Some(
                        serde_json::from_value::<OutPoint>(reference.clone()).with_context(
                            || format!("Invalid spend reference on input {}:{}", txid_hex, vin),
                        )?,
                    ),
                };
                Ok(StagedInput {
                    block_height: height,
                    txid: self.txid.clone(),
                    vin: vin as u32,
                    data,
                    spends,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut outputs_total = Amount::ZERO;
        let outputs = self
            .outputs
            .into_iter()
            .enumerate()
            .map(|(vout, data)| {
                let descriptor: OutputDescriptor = serde_json::from_value(data.clone())
                    .with_context(|| format!("Invalid output {}:{}", txid_hex, vout))?;
                outputs_total += Amount::from_sat(descriptor.value);
                Ok(StagedOutput {
                    block_height: height,
                    txid: self.txid.clone(),
                    vout: vout as u32,
                    data,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(StagedTx {
            transaction: StagedTransaction {
                block_height: height,
                index,
                txid: self.txid,
                raw: self.raw,
                timestamp,
                input_count: inputs.len() as u32,
                output_count: outputs.len() as u32,
                outputs_total,
            },
            inputs,
            outputs,
        })
    }
}

/// Reads staged blocks from a JSON-lines stream, skipping blank lines.
pub struct BlockSource<R> {
    lines: Lines<R>,
    line: usize,
}

impl BlockSource<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open block file {}", path.display()))?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> BlockSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line: 0,
        }
    }
}

impl<R: BufRead> Iterator for BlockSource<R> {
    type Item = Result<StagedBlock>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = self.lines.next()?;
            self.line += 1;
            let number = self.line;
            let line = match line.with_context(|| format!("Failed to read line {}", number)) {
                Ok(line) => line,
                Err(e) => return Some(Err(e)),
            };
            if line.trim().is_empty() {
                continue;
            }
            return Some(
                serde_json::from_str::<RawBlock>(&line)
                    .map_err(anyhow::Error::from)
                    .and_then(RawBlock::into_staged)
                    .with_context(|| format!("Invalid block on line {}", number)),
            );
        }
    }
}
