//! Block scanner integration tests.

use alloy::primitives::{Address, Bytes, TxHash, U256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use hot_wallet::blockchain::abi;
use hot_wallet::blockchain::types::Coin;
use hot_wallet::engine::coins::CoinRegistry;
use hot_wallet::engine::scanner::BlockScanner;
use hot_wallet::engine::scheduler::Scheduler;
use hot_wallet::engine::tracker::{JobOrigin, ReceiptJob};
use hot_wallet::store::KeyValueStore;

mod common;
use common::*;

struct Fixture {
    harness: Harness,
    receipts: Arc<Scheduler<ReceiptJob>>,
    _shutdown: broadcast::Sender<()>,
}

fn fixture(height: u64) -> Fixture {
    let harness = harness(height);
    let (shutdown, rx) = broadcast::channel(1);
    let receipts = Scheduler::new("scan-test", 64);
    receipts.run(rx).unwrap();
    Fixture {
        harness,
        receipts,
        _shutdown: shutdown,
    }
}

fn scanner(f: &Fixture, coin: Coin, coins: Arc<CoinRegistry>, start: u64, batch: u64) -> BlockScanner {
    BlockScanner::new(
        coin,
        f.harness.chain.clone(),
        f.harness.store.clone(),
        "wallet-",
        coins,
        f.receipts.clone(),
        start,
        batch,
        Duration::from_secs(1),
    )
}

/// Pull `count` jobs from the scheduler.
async fn drain(receipts: &Scheduler<ReceiptJob>, count: usize) -> Vec<ReceiptJob> {
    let mut inbox = receipts.work_channel();
    let mut jobs = Vec::new();
    for _ in 0..count {
        receipts.ready(&inbox).unwrap();
        let job = tokio::time::timeout(Duration::from_secs(2), inbox.recv())
            .await
            .expect("job not delivered")
            .unwrap();
        jobs.push(job);
    }
    jobs
}

#[tokio::test]
async fn test_zero_cursor_jumps_to_height() {
    let f = fixture(5_000);
    let mut scanner = scanner(&f, Coin::native("ETH"), Arc::new(CoinRegistry::new()), 0, 100);

    let pass = scanner.scan_pass().await.unwrap();
    assert!(pass.is_idle());
    assert_eq!(scanner.cursor(), 5_000);

    // Nothing new until the chain moves
    let pass = scanner.scan_pass().await.unwrap();
    assert!(pass.is_idle());
    assert_eq!(scanner.cursor(), 5_000);
}

#[tokio::test]
async fn test_pass_is_bounded_by_batch_size() {
    let f = fixture(500);
    let mut scanner = scanner(&f, Coin::native("ETH"), Arc::new(CoinRegistry::new()), 100, 100);

    let pass = scanner.scan_pass().await.unwrap();
    assert_eq!((pass.from, pass.to), (100, 200));
    assert_eq!(scanner.cursor(), 200);

    let pass = scanner.scan_pass().await.unwrap();
    assert_eq!((pass.from, pass.to), (200, 300));
}

#[tokio::test]
async fn test_native_scan_selects_custodial_transactions() {
    let f = fixture(13);
    let custodial = custodial_wallet(f.harness.store.as_ref()).address();
    let outsider = Address::repeat_byte(0x11);

    f.harness.chain.add_block_tx(10, native_tx(1, 10, outsider, custodial, 500));
    f.harness.chain.add_block_tx(11, native_tx(2, 11, outsider, Address::repeat_byte(0x22), 7));
    f.harness.chain.add_block_tx(12, native_tx(3, 12, custodial, outsider, 9));

    let mut scanner = scanner(&f, Coin::native("ETH"), Arc::new(CoinRegistry::new()), 10, 100);
    let pass = scanner.scan_pass().await.unwrap();

    assert_eq!(pass.found, 2);
    assert_eq!(scanner.cursor(), 13);

    let jobs = drain(&f.receipts, 2).await;
    let hashes: Vec<TxHash> = jobs.iter().map(|j| j.tx.hash).collect();
    assert!(hashes.contains(&TxHash::repeat_byte(1)));
    assert!(hashes.contains(&TxHash::repeat_byte(3)));
    assert!(jobs.iter().all(|j| j.origin == JobOrigin::Scanned && j.tx.coin == "ETH"));
}

#[tokio::test]
async fn test_token_call_judged_by_decoded_recipient() {
    let f = fixture(21);
    let custodial = custodial_wallet(f.harness.store.as_ref()).address();
    let token = Address::repeat_byte(0xc0);
    let coins = Arc::new(CoinRegistry::new());
    coins.register(Coin::token("USDX", token, false)).unwrap();

    // Visible `to` is the contract; the payload names the custodial address
    let mut call = native_tx(4, 20, Address::repeat_byte(0x11), token, 0);
    call.input = abi::encode_transfer(custodial, U256::from(1_000));
    f.harness.chain.add_block_tx(20, call);

    // Same contract, unrelated recipient
    let mut other = native_tx(5, 20, Address::repeat_byte(0x11), token, 0);
    other.input = abi::encode_transfer(Address::repeat_byte(0x33), U256::from(1));
    f.harness.chain.add_block_tx(20, other);

    // Undecodable payload to a monitored contract
    let mut junk = native_tx(6, 20, Address::repeat_byte(0x11), token, 0);
    junk.input = Bytes::from(vec![0xde, 0xad]);
    f.harness.chain.add_block_tx(20, junk);

    let mut scanner = scanner(&f, Coin::native("ETH"), coins, 20, 10);
    let pass = scanner.scan_pass().await.unwrap();
    assert_eq!(pass.found, 1);

    let jobs = drain(&f.receipts, 1).await;
    assert_eq!(jobs[0].tx.hash, TxHash::repeat_byte(4));
}

#[tokio::test]
async fn test_token_logs_yield_logical_recipient() {
    let f = fixture(52);
    let custodial = custodial_wallet(f.harness.store.as_ref()).address();
    let token = Address::repeat_byte(0xc0);
    let sender = Address::repeat_byte(0x11);

    f.harness.chain.add_log(transfer_log(token, 7, 50, sender, custodial, 1_000));
    f.harness.chain.add_log(transfer_log(token, 8, 50, sender, Address::repeat_byte(0x44), 5));
    // Another contract's log in range
    f.harness.chain.add_log(transfer_log(Address::repeat_byte(0xc1), 9, 51, sender, custodial, 5));

    let coin = Coin::token("USDX", token, false);
    let coins = Arc::new(CoinRegistry::new());
    coins.register(coin.clone()).unwrap();
    let mut scanner = scanner(&f, coin, coins, 50, 100);

    let pass = scanner.scan_pass().await.unwrap();
    assert_eq!(pass.found, 1);
    assert_eq!(scanner.cursor(), 52);

    let job = drain(&f.receipts, 1).await.remove(0);
    assert_eq!(job.tx.hash, TxHash::repeat_byte(7));
    assert_eq!(job.tx.to, custodial);
    assert_eq!(job.tx.value, U256::from(1_000));
    assert_eq!(job.tx.contract, Some(token));
    assert_eq!(job.tx.coin, "USDX");
}

#[tokio::test]
async fn test_deleted_wallet_no_longer_matches() {
    let f = fixture(2);
    let wallet = custodial_wallet(f.harness.store.as_ref());
    f.harness
        .store
        .delete(&hot_wallet::store::wallet_key("wallet-", &wallet.address()))
        .unwrap();
    f.harness
        .chain
        .add_block_tx(1, native_tx(1, 1, Address::repeat_byte(0x11), wallet.address(), 1));

    let mut scanner = scanner(&f, Coin::native("ETH"), Arc::new(CoinRegistry::new()), 1, 10);
    assert_eq!(scanner.scan_pass().await.unwrap().found, 0);
}

#[tokio::test]
async fn test_failed_block_resumes_at_that_block() {
    let f = fixture(14);
    let custodial = custodial_wallet(f.harness.store.as_ref()).address();
    let outsider = Address::repeat_byte(0x11);
    f.harness.chain.add_block_tx(10, native_tx(1, 10, outsider, custodial, 5));
    f.harness.chain.add_block_tx(12, native_tx(3, 12, outsider, custodial, 7));
    f.harness.chain.add_block_tx(13, native_tx(4, 13, outsider, custodial, 9));
    f.harness.chain.fail_block(12);

    let mut scanner = scanner(&f, Coin::native("ETH"), Arc::new(CoinRegistry::new()), 10, 100);
    let err = scanner.scan_pass().await.unwrap_err();
    assert!(err.is_transient());
    // Blocks 10 and 11 are done, 12 is not
    assert_eq!(scanner.cursor(), 12);

    // Still failing: the cursor does not move
    assert!(scanner.scan_pass().await.is_err());
    assert_eq!(scanner.cursor(), 12);

    f.harness.chain.heal_block(12);
    let pass = scanner.scan_pass().await.unwrap();
    assert_eq!((pass.from, pass.to, pass.found), (12, 14, 2));
    assert_eq!(scanner.cursor(), 14);

    // Every matching block delivered once, none skipped
    let mut hashes: Vec<TxHash> = drain(&f.receipts, 3).await.iter().map(|j| j.tx.hash).collect();
    hashes.sort();
    assert_eq!(
        hashes,
        vec![TxHash::repeat_byte(1), TxHash::repeat_byte(3), TxHash::repeat_byte(4)]
    );
}

#[tokio::test]
async fn test_failed_log_query_keeps_cursor() {
    let f = fixture(60);
    let custodial = custodial_wallet(f.harness.store.as_ref()).address();
    let token = Address::repeat_byte(0xc0);
    f.harness
        .chain
        .add_log(transfer_log(token, 7, 55, Address::repeat_byte(0x11), custodial, 1_000));

    let coin = Coin::token("USDX", token, false);
    let coins = Arc::new(CoinRegistry::new());
    coins.register(coin.clone()).unwrap();
    let mut scanner = scanner(&f, coin, coins, 50, 100);

    f.harness.chain.fail_next_logs();
    let err = scanner.scan_pass().await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(scanner.cursor(), 50);

    // The retry covers the same range
    let pass = scanner.scan_pass().await.unwrap();
    assert_eq!((pass.from, pass.to, pass.found), (50, 60, 1));
    assert_eq!(drain(&f.receipts, 1).await[0].tx.hash, TxHash::repeat_byte(7));
}
