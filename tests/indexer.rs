mod common;

use std::sync::Arc;
use std::thread;

use common::{block, block_hash, coinbase, spend, txid};
use ledger_indexer::model::{Amount, Transaction};
use ledger_indexer::{IndexError, Indexer, MemoryStore, Store, UnspentPolicy};

fn indexer(policy: UnspentPolicy) -> Indexer<MemoryStore> {
    Indexer::new(MemoryStore::new(), policy)
}

/// Block 0 mints 50 to A; block 1 moves all of it to B. Each block is
/// inserted, linked and transformed before the next arrives.
fn two_block_chain(policy: UnspentPolicy) -> Indexer<MemoryStore> {
    let ix = indexer(policy);
    ix.insert_block(&block(0, vec![coinbase(0, 0, 0xa0, &[(50, &["A"])])]))
        .unwrap();
    ix.link().unwrap();
    ix.transform(0).unwrap();

    ix.insert_block(&block(
        1,
        vec![
            coinbase(1, 0, 0xa1, &[(50, &["M"])]),
            spend(1, 1, 0xb1, &[(0xa0, 0)], &[(50, &["B"])]),
        ],
    ))
    .unwrap();
    ix.link().unwrap();
    ix.transform(1).unwrap();
    ix
}

#[test]
fn coinbase_then_spend() {
    let ix = indexer(UnspentPolicy::Retain);
    ix.insert_block(&block(0, vec![coinbase(0, 0, 0xa0, &[(50, &["A"])])]))
        .unwrap();
    ix.link().unwrap();
    ix.transform(0).unwrap();

    let unspent = ix.unspent_outputs("A").unwrap();
    assert_eq!(unspent.len(), 1);
    assert_eq!(unspent[0].value, Amount::from_sat(50));
    let history = ix.address_history("A").unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].received, Amount::from_sat(50));
    assert_eq!(history[0].sent, Amount::ZERO);

    let ix = two_block_chain(UnspentPolicy::Retain);
    let tx = ix.transaction(&txid(0xb1)).unwrap().unwrap();
    assert_eq!((tx.block_height, tx.index), (1, 1));
    assert_eq!(tx.inputs_total, Amount::from_sat(50));
    assert_eq!(tx.outputs_total, Amount::from_sat(50));

    let coinbase_tx = ix.transaction(&txid(0xa1)).unwrap().unwrap();
    assert_eq!(coinbase_tx.inputs_total, Amount::ZERO);

    let history_a = ix.address_history("A").unwrap();
    assert_eq!(history_a.len(), 2);
    assert_eq!(history_a[1].txid, txid(0xb1));
    assert_eq!(history_a[1].received, Amount::ZERO);
    assert_eq!(history_a[1].sent, Amount::from_sat(50));

    let history_b = ix.address_history("B").unwrap();
    assert_eq!(history_b.len(), 1);
    assert_eq!(history_b[0].received, Amount::from_sat(50));
    assert_eq!(history_b[0].tx_index, 1);

    let block1 = ix.block(1).unwrap().unwrap();
    assert!(block1.processed);
    assert_eq!(block1.inputs_total, Some(Amount::from_sat(50)));
    assert_eq!(block1.outputs_total, Some(Amount::from_sat(100)));
    assert_eq!(
        ix.block(0).unwrap().unwrap().next_hash,
        Some(block_hash(1))
    );

    assert_eq!(ix.refresh_address_stats().unwrap(), 3);
    let a = ix.address_stats("A").unwrap().unwrap();
    assert_eq!(a.received_confirmed, Amount::from_sat(50));
    assert_eq!(a.sent_confirmed, Amount::from_sat(50));
    assert_eq!(a.count_history_confirmed, 2);
    let b = ix.address_stats("B").unwrap().unwrap();
    assert_eq!(b.received_confirmed, Amount::from_sat(50));
    assert_eq!(b.sent_confirmed, Amount::ZERO);
    assert_eq!(b.count_unspent_confirmed, 1);
    assert_eq!(b.received_unconfirmed, Amount::ZERO);
}

#[test]
fn retain_policy_keeps_spent_output_listed() {
    let ix = two_block_chain(UnspentPolicy::Retain);

    // A's output was still unspent when block 0 was transformed
    assert_eq!(ix.unspent_outputs("A").unwrap().len(), 1);
    ix.refresh_address_stats().unwrap();
    assert_eq!(
        ix.address_stats("A").unwrap().unwrap().count_unspent_confirmed,
        1
    );
}

/// received - sent == sum of unspent values, for every address given
fn assert_balanced(ix: &Indexer<MemoryStore>, addresses: &[&str]) {
    for address in addresses {
        let history = ix.address_history(address).unwrap();
        let received: Amount = history.iter().map(|h| h.received).sum();
        let sent: Amount = history.iter().map(|h| h.sent).sum();
        let unspent: Amount = ix
            .unspent_outputs(address)
            .unwrap()
            .iter()
            .map(|u| u.value)
            .sum();
        assert_eq!(received.as_u128() - sent.as_u128(), unspent.as_u128(), "{}", address);
    }
}

#[test]
fn delete_on_spend_keeps_balances_consistent() {
    let ix = two_block_chain(UnspentPolicy::DeleteOnSpend);

    assert!(ix.unspent_outputs("A").unwrap().is_empty());
    assert_balanced(&ix, &["A", "B", "M"]);
    ix.refresh_address_stats().unwrap();
    assert_eq!(
        ix.address_stats("A").unwrap().unwrap().count_unspent_confirmed,
        0
    );
}

#[test]
fn deleting_spender_under_delete_on_spend_returns_outputs() {
    let ix = two_block_chain(UnspentPolicy::DeleteOnSpend);

    ix.delete_block(1).unwrap();
    let a = ix.unspent_outputs("A").unwrap();
    assert_eq!(a.len(), 1);
    assert_eq!((a[0].block_height, a[0].vout), (0, 0));
    assert_eq!(a[0].value, Amount::from_sat(50));
    assert!(ix.unspent_outputs("B").unwrap().is_empty());
    assert_balanced(&ix, &["A", "B", "M"]);

    // a replacement block spends it again
    ix.insert_block(&block(
        1,
        vec![spend(1, 0, 0xc1, &[(0xa0, 0)], &[(50, &["C"])])],
    ))
    .unwrap();
    ix.link().unwrap();
    ix.transform(1).unwrap();
    assert!(ix.unspent_outputs("A").unwrap().is_empty());
    assert_balanced(&ix, &["A", "C"]);
}

#[test]
fn deleting_spender_from_the_same_batch_returns_outputs() {
    let ix = indexer(UnspentPolicy::DeleteOnSpend);
    ix.stage_block(&block(0, vec![coinbase(0, 0, 0xa0, &[(50, &["A"])])]))
        .unwrap();
    ix.stage_block(&block(
        1,
        vec![
            spend(1, 0, 0xb1, &[(0xa0, 0)], &[(50, &["B"])]),
            // created and spent inside the deleted block
            spend(1, 1, 0xb2, &[(0xb1, 0)], &[(50, &["C"])]),
        ],
    ))
    .unwrap();
    ix.repair_linkage(0..=1).unwrap();
    ix.link().unwrap();
    ix.transform(0).unwrap();
    ix.transform(1).unwrap();
    assert!(ix.unspent_outputs("A").unwrap().is_empty());

    ix.delete_block(1).unwrap();
    assert_eq!(ix.unspent_outputs("A").unwrap().len(), 1);
    assert!(ix.unspent_outputs("B").unwrap().is_empty());
    assert_balanced(&ix, &["A", "B", "C"]);
}

#[test]
fn deleting_spender_under_retain_leaves_unspent_rows_alone() {
    let ix = two_block_chain(UnspentPolicy::Retain);
    ix.delete_block(1).unwrap();
    assert_eq!(ix.unspent_outputs("A").unwrap().len(), 1);
}

#[test]
fn output_spent_within_the_batch_is_never_unspent() {
    let ix = indexer(UnspentPolicy::Retain);
    ix.stage_block(&block(
        0,
        vec![
            coinbase(0, 0, 0xa0, &[(50, &["A"])]),
            spend(0, 1, 0xa2, &[(0xa0, 0)], &[(30, &["B"]), (20, &["A"])]),
        ],
    ))
    .unwrap();
    ix.stage_block(&block(
        1,
        vec![spend(1, 0, 0xb1, &[(0xa2, 0)], &[(30, &["C"])])],
    ))
    .unwrap();
    ix.link().unwrap();
    ix.transform(0).unwrap();
    ix.transform(1).unwrap();

    // only A's change survives
    let a = ix.unspent_outputs("A").unwrap();
    assert_eq!(a.len(), 1);
    assert_eq!((a[0].txid.clone(), a[0].vout), (txid(0xa2), 1));
    assert!(ix.unspent_outputs("B").unwrap().is_empty());
    assert_eq!(ix.unspent_outputs("C").unwrap().len(), 1);

    // A received 50 and 20 back, sent 50, each in its own row
    let history: Vec<_> = ix
        .address_history("A")
        .unwrap()
        .iter()
        .map(|h| (h.tx_index, h.received.as_u128(), h.sent.as_u128()))
        .collect();
    assert_eq!(history, vec![(0, 50, 0), (1, 20, 50)]);
}

#[test]
fn transform_is_idempotent() {
    let ix = two_block_chain(UnspentPolicy::Retain);
    let snapshot = |ix: &Indexer<MemoryStore>| {
        (
            ix.block(1).unwrap(),
            ix.transaction(&txid(0xb1)).unwrap(),
            ix.address_history("A").unwrap(),
            ix.address_history("B").unwrap(),
            ix.unspent_outputs("B").unwrap(),
        )
    };
    let before = snapshot(&ix);

    assert_eq!(ix.transform(1).unwrap(), 1);
    assert_eq!(ix.transform(0).unwrap(), 1);
    assert_eq!(snapshot(&ix), before);
}

#[test]
fn transform_of_missing_block_fails() {
    let ix = indexer(UnspentPolicy::Retain);
    let err = ix.transform(7).unwrap_err();
    assert!(matches!(err, IndexError::MissingBlock(7)));
}

#[test]
fn failed_transform_leaves_no_rows() {
    let ix = indexer(UnspentPolicy::Retain);
    ix.insert_block(&block(0, vec![coinbase(0, 0, 0xa0, &[(50, &["A"])])]))
        .unwrap();
    ix.insert_block(&block(
        1,
        vec![
            coinbase(1, 0, 0xa1, &[(50, &["M"])]),
            spend(1, 1, 0xb1, &[(0xa0, 0)], &[(50, &["B"])]),
        ],
    ))
    .unwrap();
    ix.link().unwrap();

    // a finalized row already claims the second transaction's txid
    ix.store()
        .atomically(|uow| {
            uow.insert_transaction(&Transaction {
                block_height: 0,
                index: 9,
                txid: txid(0xb1),
                raw: Vec::new(),
                timestamp: common::time(0),
                input_count: 0,
                output_count: 0,
                inputs_total: Amount::ZERO,
                outputs_total: Amount::ZERO,
            })
        })
        .unwrap();

    let err = ix.transform(1).unwrap_err();
    assert!(err.is_integrity_violation());

    let block1 = ix.block(1).unwrap().unwrap();
    assert!(!block1.processed);
    assert_eq!(block1.inputs_total, None);
    assert!(ix.transaction(&txid(0xa1)).unwrap().is_none());
    assert!(ix.address_history("M").unwrap().is_empty());
    assert!(ix.unspent_outputs("M").unwrap().is_empty());
}

#[test]
fn double_spend_is_rejected() {
    let ix = indexer(UnspentPolicy::Retain);
    ix.stage_block(&block(0, vec![coinbase(0, 0, 0xa0, &[(50, &["A"])])]))
        .unwrap();
    ix.stage_block(&block(
        1,
        vec![
            spend(1, 0, 0xb1, &[(0xa0, 0)], &[(50, &["B"])]),
            spend(1, 1, 0xb2, &[(0xa0, 0)], &[(50, &["C"])]),
        ],
    ))
    .unwrap();

    let err = ix.link().unwrap_err();
    assert!(matches!(err, IndexError::DuplicateSpend { .. }));
    assert!(err.is_integrity_violation());
}

#[test]
fn deleting_tip_restores_predecessor_and_cascades() {
    let ix = two_block_chain(UnspentPolicy::Retain);

    ix.delete_block(1).unwrap();
    assert_eq!(ix.block(0).unwrap().unwrap().next_hash, None);
    assert!(ix.block(1).unwrap().is_none());
    assert!(ix.transaction(&txid(0xb1)).unwrap().is_none());
    assert!(ix.address_history("B").unwrap().is_empty());
    assert_eq!(ix.address_history("A").unwrap().len(), 1);

    // reinsert after the rollback
    ix.insert_block(&block(1, vec![coinbase(1, 0, 0xc1, &[(50, &["D"])])]))
        .unwrap();
    assert_eq!(
        ix.block(0).unwrap().unwrap().next_hash,
        Some(block_hash(1))
    );
}

#[test]
fn delete_of_missing_block_fails() {
    let ix = indexer(UnspentPolicy::Retain);
    assert!(matches!(
        ix.delete_block(3).unwrap_err(),
        IndexError::MissingBlock(3)
    ));
}

#[test]
fn insert_without_predecessor_is_rolled_back() {
    let ix = indexer(UnspentPolicy::Retain);
    ix.insert_block(&block(0, Vec::new())).unwrap();

    let err = ix.insert_block(&block(2, Vec::new())).unwrap_err();
    assert!(matches!(
        err,
        IndexError::MissingPredecessor {
            height: 1,
            successor: 2
        }
    ));
    assert!(ix.block(2).unwrap().is_none());
}

#[test]
fn bulk_staging_then_repair() {
    let ix = indexer(UnspentPolicy::Retain);
    for height in 0..5 {
        ix.stage_block(&block(height, Vec::new())).unwrap();
    }
    assert_eq!(ix.repair_linkage(0..=4).unwrap(), 4);
    assert_eq!(ix.repair_linkage(0..=4).unwrap(), 0);
    for height in 0..4 {
        assert_eq!(
            ix.block(height).unwrap().unwrap().next_hash,
            Some(block_hash(height + 1))
        );
    }
    assert_eq!(ix.block(4).unwrap().unwrap().next_hash, None);
}

#[test]
fn skipped_heights_over_stored_blocks() {
    let ix = indexer(UnspentPolicy::Retain);
    for height in [0, 1, 2, 5, 6] {
        ix.stage_block(&block(height, Vec::new())).unwrap();
    }
    assert_eq!(ix.skipped_heights(0).unwrap().collect::<Vec<_>>(), vec![3, 4]);
    assert!(ix.repair_linkage(0..=6).is_err());

    for height in [3, 4] {
        ix.stage_block(&block(height, Vec::new())).unwrap();
    }
    assert_eq!(ix.skipped_heights(0).unwrap().count(), 0);
    assert_eq!(ix.skipped_heights(10).unwrap().count(), 0);
}

#[test]
fn concurrent_transforms_of_one_height_process_it_once() {
    let ix = Arc::new(two_block_chain(UnspentPolicy::Retain));
    ix.insert_block(&block(2, vec![coinbase(2, 0, 0xa2, &[(50, &["E"])])]))
        .unwrap();
    ix.link().unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let ix = Arc::clone(&ix);
            thread::spawn(move || ix.transform(2).unwrap())
        })
        .collect();
    let queries: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(queries.iter().filter(|q| **q > 1).count(), 1);
    assert_eq!(ix.address_history("E").unwrap().len(), 1);
    assert_eq!(ix.unspent_outputs("E").unwrap().len(), 1);
}

#[test]
fn stats_skip_addresses_without_history() {
    let ix = two_block_chain(UnspentPolicy::Retain);
    ix.refresh_address_stats().unwrap();
    assert!(ix.address_stats("nobody").unwrap().is_none());

    // a second refresh rebuilds rather than accumulates
    ix.refresh_address_stats().unwrap();
    assert_eq!(
        ix.address_stats("A").unwrap().unwrap().count_history_confirmed,
        2
    );
}
