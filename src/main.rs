//! Demo entry point
//!
//! Seeds a genesis UTXO, starts the miner, pumps a burst of transfer
//! requests through the node, and prints chain state while blocks commit.

use std::sync::Arc;
use std::time::Duration;

use log::info;
use nanochain::crypto::KeyPair;
use nanochain::node::{Node, TxCreateRequest};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let node = Arc::new(Node::new());

    let alice = KeyPair::generate();
    let bob = KeyPair::generate();
    info!("alice address: {}", alice.address());
    info!("bob   address: {}", bob.address());

    node.seed_genesis(500_000, &alice.address())
        .expect("seeding genesis UTXO");
    info!(
        "genesis done, utxo count for alice: {}",
        node.utxo_set().find_by_address(&alice.address()).len()
    );

    let miner = node.start_miner();

    // A single transfer, then a burst of small chained ones.
    let first = TxCreateRequest {
        private_key_hex: alice.seed_hex(),
        from_addr: alice.address(),
        to_addr: bob.address(),
        amount: 30_000,
    };
    node.handle_tx_create(&first).expect("first transfer");

    let burst_node = Arc::clone(&node);
    let seed_hex = alice.seed_hex();
    let from_addr = alice.address();
    let to_addr = bob.address();
    let burst = tokio::task::spawn_blocking(move || {
        let mut accepted = 0;
        for _ in 0..1_000 {
            let req = TxCreateRequest {
                private_key_hex: seed_hex.clone(),
                from_addr: from_addr.clone(),
                to_addr: to_addr.clone(),
                amount: 1,
            };
            if burst_node.handle_tx_create(&req).is_ok() {
                accepted += 1;
            }
        }
        accepted
    });

    for _ in 0..10 {
        info!(
            "blocks: {} | mempool: {} txs ({} bytes)",
            node.chain().len(),
            node.mempool().len(),
            node.mempool().total_size(),
        );
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    let accepted = burst.await.expect("burst task");
    info!("burst accepted {accepted} transfers");

    // Let the miner drain the pool, then stop it.
    while !node.mempool().is_empty() {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    miner.stop().await;

    let utxo_set = node.utxo_set();
    let sum = |addr: &str| {
        utxo_set
            .find_by_address(addr)
            .iter()
            .map(|u| u.output.value)
            .sum::<i64>()
    };
    info!(
        "final: blocks={} alice={} bob={}",
        node.chain().len(),
        sum(&alice.address()),
        sum(&bob.address()),
    );
}
