use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

use bigdecimal::num_bigint::BigInt;
use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{IndexError, Result};

/// Block hashes are stored as raw bytes (BYTEA)
pub type BlockHash = Vec<u8>;
/// Transaction ids are stored as raw bytes (BYTEA)
pub type Txid = Vec<u8>;

/// Satoshi-denominated value. Accumulation happens in 128 bits so block and
/// address totals never wrap; persisted as NUMERIC.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(u128);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn from_sat(sat: u64) -> Self {
        Amount(u128::from(sat))
    }

    pub fn as_u128(self) -> u128 {
        self.0
    }

    pub fn to_bigdecimal(self) -> BigDecimal {
        BigDecimal::new(BigInt::from(self.0), 0)
    }

    pub fn from_bigdecimal(value: &BigDecimal) -> Result<Self> {
        let (int_val, scale) = value.with_scale(0).into_bigint_and_exponent();
        debug_assert_eq!(scale, 0);
        u128::try_from(int_val)
            .map(Amount)
            .map_err(|_| IndexError::AmountOutOfRange(value.to_string()))
    }
}

impl Add for Amount {
    type Output = Amount;

    fn add(self, rhs: Amount) -> Amount {
        Amount(self.0 + rhs.0)
    }
}

impl AddAssign for Amount {
    fn add_assign(&mut self, rhs: Amount) {
        self.0 += rhs.0;
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Amount {
        iter.fold(Amount::ZERO, Add::add)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference from an input to the output it spends
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    #[serde(with = "hex")]
    pub txid: Txid,
    pub vout: u32,
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", hex::encode(&self.txid), self.vout)
    }
}

/// Output descriptor: the value and owning addresses of an output. Any other
/// fields the decoder attached are carried through untouched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutputDescriptor {
    pub value: u64,
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl OutputDescriptor {
    pub fn new(value: u64, addresses: Vec<String>) -> Self {
        Self {
            value,
            addresses,
            extra: Map::new(),
        }
    }
}

/// Header fields of a block as delivered by the decoder
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub height: u32,
    pub hash: BlockHash,
    pub prev_hash: BlockHash,
    pub size: u32,
    pub timestamp: NaiveDateTime,
}

/// Row of the blocks table
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub height: u32,
    pub hash: BlockHash,
    pub prev_hash: BlockHash,
    pub next_hash: Option<BlockHash>,
    pub size: u32,
    pub timestamp: NaiveDateTime,
    pub transaction_count: u32,
    pub input_count: u32,
    pub output_count: u32,
    pub inputs_total: Option<Amount>,
    pub outputs_total: Option<Amount>,
    pub processed: bool,
}

/// Forward-pointer view of a block, used by the linkage maintainer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockLink {
    pub height: u32,
    pub hash: BlockHash,
    pub next_hash: Option<BlockHash>,
}

/// Transaction row as staged by the decoder, before its input total is known
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagedTransaction {
    pub block_height: u32,
    pub index: u32,
    pub txid: Txid,
    pub raw: Vec<u8>,
    pub timestamp: NaiveDateTime,
    pub input_count: u32,
    pub output_count: u32,
    pub outputs_total: Amount,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StagedInput {
    pub block_height: u32,
    pub txid: Txid,
    pub vin: u32,
    pub data: Value,
    /// None for coinbase inputs
    pub spends: Option<OutPoint>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StagedOutput {
    pub block_height: u32,
    pub txid: Txid,
    pub vout: u32,
    pub data: Value,
}

impl StagedOutput {
    pub fn descriptor(&self) -> Result<OutputDescriptor> {
        serde_json::from_value(self.data.clone()).map_err(|source| IndexError::Descriptor {
            outpoint: self.outpoint().to_string(),
            source,
        })
    }

    pub fn outpoint(&self) -> OutPoint {
        OutPoint {
            txid: self.txid.clone(),
            vout: self.vout,
        }
    }
}

/// A transaction with its staged inputs and outputs
#[derive(Clone, Debug, PartialEq)]
pub struct StagedTx {
    pub transaction: StagedTransaction,
    pub inputs: Vec<StagedInput>,
    pub outputs: Vec<StagedOutput>,
}

/// Everything the staging store receives for one block
#[derive(Clone, Debug, PartialEq)]
pub struct StagedBlock {
    pub header: BlockHeader,
    pub transactions: Vec<StagedTx>,
}

impl StagedBlock {
    /// The blocks row for this staged block: unlinked, untotalled, unprocessed
    pub fn block_row(&self) -> Block {
        let input_count = self.transactions.iter().map(|tx| tx.inputs.len() as u32).sum();
        let output_count = self.transactions.iter().map(|tx| tx.outputs.len() as u32).sum();
        Block {
            height: self.header.height,
            hash: self.header.hash.clone(),
            prev_hash: self.header.prev_hash.clone(),
            next_hash: None,
            size: self.header.size,
            timestamp: self.header.timestamp,
            transaction_count: self.transactions.len() as u32,
            input_count,
            output_count,
            inputs_total: None,
            outputs_total: None,
            processed: false,
        }
    }
}

/// Input side of a link
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkedInput {
    pub block_height: u32,
    pub txid: Txid,
    pub vin: u32,
}

/// Output side of a link, with its descriptor already resolved
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkedOutput {
    pub block_height: u32,
    pub txid: Txid,
    pub vout: u32,
    pub value: Amount,
    pub addresses: Vec<String>,
}

/// One row of the input-output link relation. At least one side is present.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Link {
    pub input: Option<LinkedInput>,
    pub output: Option<LinkedOutput>,
}

/// Finalized transactions row
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub block_height: u32,
    pub index: u32,
    pub txid: Txid,
    pub raw: Vec<u8>,
    pub timestamp: NaiveDateTime,
    pub input_count: u32,
    pub output_count: u32,
    pub inputs_total: Amount,
    pub outputs_total: Amount,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressHistoryEntry {
    pub address: String,
    pub block_height: u32,
    pub txid: Txid,
    pub tx_index: u32,
    pub timestamp: NaiveDateTime,
    pub received: Amount,
    pub sent: Amount,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnspentOutput {
    pub address: String,
    pub block_height: u32,
    pub txid: Txid,
    pub vout: u32,
    pub value: Amount,
}

/// Per-address history aggregate as produced by the store
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryTotals {
    pub address: String,
    pub count: i64,
    pub received: Amount,
    pub sent: Amount,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AddressStats {
    pub address: String,
    pub count_history_confirmed: i64,
    pub count_history_unconfirmed: i64,
    pub count_unspent_confirmed: i64,
    pub count_unspent_unconfirmed: i64,
    pub received_confirmed: Amount,
    pub received_unconfirmed: Amount,
    pub sent_confirmed: Amount,
    pub sent_unconfirmed: Amount,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn amount_survives_numeric_with_negative_scale() {
        // postgres hands back 5000000000 as digits [50] with a base-10000 weight
        let value = BigDecimal::from_str("50e8").unwrap();
        assert_eq!(
            Amount::from_bigdecimal(&value).unwrap(),
            Amount::from_sat(5_000_000_000)
        );
    }

    #[test]
    fn amount_above_u64_range() {
        let big = Amount::from_sat(u64::MAX) + Amount::from_sat(u64::MAX);
        let back = Amount::from_bigdecimal(&big.to_bigdecimal()).unwrap();
        assert_eq!(back, big);
        assert_eq!(back.as_u128(), 2 * u128::from(u64::MAX));
    }

    #[test]
    fn negative_numeric_is_rejected() {
        let value = BigDecimal::from_str("-1").unwrap();
        assert!(Amount::from_bigdecimal(&value).is_err());
    }

    #[test]
    fn descriptor_keeps_unknown_fields() {
        let output = StagedOutput {
            block_height: 0,
            txid: vec![0x11; 32],
            vout: 0,
            data: serde_json::json!({"value": 50, "addresses": ["A"], "script_type": "p2pkh"}),
        };
        let descriptor = output.descriptor().unwrap();
        assert_eq!(descriptor.value, 50);
        assert_eq!(descriptor.addresses, vec!["A".to_string()]);
        assert_eq!(descriptor.extra["script_type"], "p2pkh");
    }

    #[test]
    fn descriptor_without_value_is_an_error() {
        let output = StagedOutput {
            block_height: 0,
            txid: vec![0x11; 32],
            vout: 3,
            data: serde_json::json!({"addresses": ["A"]}),
        };
        assert!(matches!(
            output.descriptor(),
            Err(IndexError::Descriptor { .. })
        ));
    }
}
