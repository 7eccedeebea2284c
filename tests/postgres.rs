mod common;

use std::time::Duration;

use common::{block, block_hash, coinbase, spend, txid};
use ledger_indexer::db::{self, PgStore};
use ledger_indexer::model::Amount;
use ledger_indexer::{IndexError, Indexer, UnspentPolicy};
use testcontainers::{clients, images::postgres::Postgres};

#[test]
#[ignore = "needs a Docker daemon"]
fn postgres_backend_end_to_end() {
    let docker = clients::Cli::default();
    let node = docker.run(Postgres::default());
    let url = format!(
        "postgres://postgres@127.0.0.1:{}/postgres",
        node.get_host_port_ipv4(5432)
    );

    let pool = db::create_connection_pool(&url, 4, Duration::from_secs(30)).unwrap();
    db::run_migrations(&mut pool.get().unwrap()).unwrap();
    let ix = Indexer::new(PgStore::new(pool), UnspentPolicy::DeleteOnSpend);

    ix.insert_block(&block(0, vec![coinbase(0, 0, 0xa0, &[(50, &["A"])])]))
        .unwrap();
    ix.link().unwrap();
    assert!(ix.transform(0).unwrap() > 1);
    assert_eq!(ix.unspent_outputs("A").unwrap().len(), 1);

    // value past the u64 range survives NUMERIC
    ix.insert_block(&block(
        1,
        vec![
            coinbase(1, 0, 0xa1, &[(u64::MAX, &["M"]), (u64::MAX, &["M"])]),
            spend(1, 1, 0xb1, &[(0xa0, 0)], &[(50, &["B"])]),
        ],
    ))
    .unwrap();
    ix.link().unwrap();
    ix.transform(1).unwrap();
    assert_eq!(ix.transform(1).unwrap(), 1);

    let tx = ix.transaction(&txid(0xb1)).unwrap().unwrap();
    assert_eq!(tx.inputs_total, Amount::from_sat(50));
    let block1 = ix.block(1).unwrap().unwrap();
    assert_eq!(
        block1.outputs_total.unwrap().as_u128(),
        2 * u128::from(u64::MAX) + 50
    );
    assert!(ix.unspent_outputs("A").unwrap().is_empty());
    assert_eq!(ix.block(0).unwrap().unwrap().next_hash, Some(block_hash(1)));

    assert_eq!(ix.refresh_address_stats().unwrap(), 3);
    let a = ix.address_stats("A").unwrap().unwrap();
    assert_eq!(a.received_confirmed, Amount::from_sat(50));
    assert_eq!(a.sent_confirmed, Amount::from_sat(50));
    assert_eq!(a.count_unspent_confirmed, 0);
    let m = ix.address_stats("M").unwrap().unwrap();
    assert_eq!(m.count_unspent_confirmed, 2);

    // unique violations surface as integrity errors and roll back
    let err = ix
        .insert_block(&block(2, vec![coinbase(2, 0, 0xa1, &[(1, &["X"])])]))
        .unwrap_err();
    assert!(err.is_integrity_violation());
    assert!(ix.block(2).unwrap().is_none());
    assert_eq!(ix.block(1).unwrap().unwrap().next_hash, None);

    ix.delete_block(1).unwrap();
    assert!(ix.transaction(&txid(0xb1)).unwrap().is_none());
    assert!(ix.address_history("B").unwrap().is_empty());
    assert_eq!(ix.block(0).unwrap().unwrap().next_hash, None);
    // the rolled back spend hands A its output back
    assert_eq!(ix.unspent_outputs("A").unwrap().len(), 1);
    assert!(matches!(
        ix.delete_block(1).unwrap_err(),
        IndexError::MissingBlock(1)
    ));

    for height in [1, 2, 5] {
        ix.stage_block(&block(height, Vec::new())).unwrap();
    }
    assert_eq!(ix.skipped_heights(0).unwrap().collect::<Vec<_>>(), vec![3, 4]);
    assert!(matches!(
        ix.repair_linkage(0..=5).unwrap_err(),
        IndexError::MultipleChainTips { .. }
    ));
}
