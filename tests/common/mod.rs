#![allow(dead_code)]

use chrono::{DateTime, NaiveDateTime};
use serde_json::{json, Value};

use ledger_indexer::model::{
    Amount, BlockHeader, OutPoint, StagedBlock, StagedInput, StagedOutput, StagedTransaction,
    StagedTx,
};

pub fn txid(tag: u8) -> Vec<u8> {
    vec![tag; 32]
}

pub fn block_hash(height: u32) -> Vec<u8> {
    let mut hash = vec![0xb0; 32];
    hash[..4].copy_from_slice(&height.to_be_bytes());
    hash
}

pub fn time(height: u32) -> NaiveDateTime {
    DateTime::from_timestamp(1_231_006_505 + 600 * i64::from(height), 0)
        .unwrap()
        .naive_utc()
}

fn outputs(height: u32, tag: u8, outs: &[(u64, &[&str])]) -> (Vec<StagedOutput>, Amount) {
    let staged = outs
        .iter()
        .enumerate()
        .map(|(vout, (value, addresses))| StagedOutput {
            block_height: height,
            txid: txid(tag),
            vout: vout as u32,
            data: json!({ "value": value, "addresses": addresses }),
        })
        .collect();
    let total = outs.iter().map(|(value, _)| Amount::from_sat(*value)).sum();
    (staged, total)
}

fn tx(height: u32, index: u32, tag: u8, inputs: Vec<StagedInput>, outs: &[(u64, &[&str])]) -> StagedTx {
    let (outputs, outputs_total) = outputs(height, tag, outs);
    StagedTx {
        transaction: StagedTransaction {
            block_height: height,
            index,
            txid: txid(tag),
            raw: vec![tag, 0x00, 0x01],
            timestamp: time(height),
            input_count: inputs.len() as u32,
            output_count: outputs.len() as u32,
            outputs_total,
        },
        inputs,
        outputs,
    }
}

/// Transaction minting new value
pub fn coinbase(height: u32, index: u32, tag: u8, outs: &[(u64, &[&str])]) -> StagedTx {
    let input = StagedInput {
        block_height: height,
        txid: txid(tag),
        vin: 0,
        data: json!({ "coinbase": "04ffff001d" }),
        spends: None,
    };
    tx(height, index, tag, vec![input], outs)
}

/// Transaction spending `spends`, given as (txid tag, vout)
pub fn spend(
    height: u32,
    index: u32,
    tag: u8,
    spends: &[(u8, u32)],
    outs: &[(u64, &[&str])],
) -> StagedTx {
    let inputs = spends
        .iter()
        .enumerate()
        .map(|(vin, (spent_tag, vout))| StagedInput {
            block_height: height,
            txid: txid(tag),
            vin: vin as u32,
            data: json!({ "spends": { "txid": hex::encode(txid(*spent_tag)), "vout": vout } }),
            spends: Some(OutPoint {
                txid: txid(*spent_tag),
                vout: *vout,
            }),
        })
        .collect();
    tx(height, index, tag, inputs, outs)
}

pub fn block(height: u32, transactions: Vec<StagedTx>) -> StagedBlock {
    StagedBlock {
        header: BlockHeader {
            height,
            hash: block_hash(height),
            prev_hash: if height == 0 {
                vec![0; 32]
            } else {
                block_hash(height - 1)
            },
            size: 285,
            timestamp: time(height),
        },
        transactions,
    }
}

/// Same block as the JSON line the block source reads
pub fn block_json(block: &StagedBlock) -> Value {
    let transactions: Vec<Value> = block
        .transactions
        .iter()
        .map(|tx| {
            json!({
                "txid": hex::encode(&tx.transaction.txid),
                "raw": hex::encode(&tx.transaction.raw),
                "inputs": tx.inputs.iter().map(|i| i.data.clone()).collect::<Vec<_>>(),
                "outputs": tx.outputs.iter().map(|o| o.data.clone()).collect::<Vec<_>>(),
            })
        })
        .collect();
    json!({
        "height": block.header.height,
        "hash": hex::encode(&block.header.hash),
        "prev_hash": hex::encode(&block.header.prev_hash),
        "size": block.header.size,
        "time": block.header.timestamp.and_utc().timestamp(),
        "transactions": transactions,
    })
}
