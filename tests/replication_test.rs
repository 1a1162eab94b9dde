//! End-to-end replication tests: a node syncs a counter chain from a scripted peer over a mock
//! network, adopts locally mined blocks, and follows fork displacement while keeping side
//! branches queryable.

mod common;

use std::thread;
use std::time::{Duration, Instant};

use ed25519_dalek::SigningKey;
use log::LevelFilter;
use rand_core::OsRng;
use tempfile::TempDir;

use chainrep::chain::policy::HeightPolicy;
use chainrep::networking::network::Network;
use chainrep::node::{Configuration, Node, NodeSpec};
use chainrep::state::redo::RedoLog;
use chainrep::sync::messages::Headers;
use chainrep::types::{
    block::Block,
    data_types::{BlockHeight, ChainID, CryptoHash},
};

use common::blocks::{build_chain, extend};
use common::counter_app::{CounterApp, CounterViewApp};
use common::logging::setup_logger;
use common::mem_headers::MemHeaderStore;
use common::mem_ledger::{MemLedger, MemLedgerFactory};
use common::network::mock_network;
use common::scripted::ScriptedPeer;

fn default_configuration() -> Configuration {
    Configuration::builder()
        .chain_id(ChainID::new(0))
        .initial_window(4)
        .header_request_limit(5)
        .response_limit(100)
        .block_request_timeout(Duration::from_secs(1))
        .header_request_timeout(Duration::from_secs(1))
        .min_outbound(1)
        .sync_quorum(1)
        .confirmation_depth(2)
        .log_events(true)
        .build()
}

/// Initialize a data directory with `chain`'s genesis, start a node on it, and wrap the second
/// network stub in a [`ScriptedPeer`] serving the whole of `chain`.
fn start_node_and_peer(
    chain: &[(Block, MemLedger, RedoLog)],
    configuration: Configuration,
) -> (
    Node<MemHeaderStore, MemLedgerFactory, CounterViewApp>,
    ScriptedPeer,
    TempDir,
) {
    let mut networks = mock_network(
        [
            SigningKey::generate(&mut OsRng),
            SigningKey::generate(&mut OsRng),
        ]
        .iter()
        .map(|key| key.verifying_key()),
    );
    let peer_network = networks.pop().unwrap();
    let node_network = networks.pop().unwrap();

    let root = TempDir::new().unwrap();
    let header_store = MemHeaderStore::new();
    let (genesis, genesis_state, _) = &chain[0];
    chainrep::node::initialize(
        header_store.clone(),
        MemLedgerFactory,
        root.path(),
        genesis.clone(),
        genesis_state.clone(),
    )
    .unwrap();

    let node = NodeSpec::builder()
        .app(CounterApp)
        .view_app(CounterViewApp)
        .network(node_network)
        .header_store(header_store)
        .ledger_factory(MemLedgerFactory)
        .policy(HeightPolicy)
        .snapshot_root(root.path().to_path_buf())
        .configuration(configuration)
        .build()
        .start()
        .unwrap();

    let peer = ScriptedPeer::new(
        peer_network,
        chain.iter().map(|(block, _, _)| block.clone()).collect(),
    );
    (node, peer, root)
}

/// Pump the scripted peer until `condition` holds, panicking after `timeout`.
fn pump_until(
    peer: &mut ScriptedPeer,
    timeout: Duration,
    mut condition: impl FnMut(&ScriptedPeer) -> bool,
) {
    let deadline = Instant::now() + timeout;
    loop {
        peer.pump();
        if condition(peer) {
            return;
        }
        if Instant::now() >= deadline {
            panic!("condition not reached within {:?}", timeout);
        }
        thread::sleep(Duration::from_millis(10));
    }
}

fn wait_for_tip(
    node: &Node<MemHeaderStore, MemLedgerFactory, CounterViewApp>,
    peer: &mut ScriptedPeer,
    height: u64,
) {
    pump_until(peer, Duration::from_secs(10), |_| {
        node.chain_reader().is_synced()
            && node
                .chain_reader()
                .best_header()
                .unwrap()
                .map(|best| best.header.height == BlockHeight::new(height))
                .unwrap_or(false)
    });
}

fn counter_at(
    node: &Node<MemHeaderStore, MemLedgerFactory, CounterViewApp>,
    at: Option<&CryptoHash>,
) -> u64 {
    let bytes = node.chain_reader().call_get(at, "get", &[]).unwrap();
    u64::from_le_bytes(bytes.try_into().unwrap())
}

#[test]
fn syncing_replicates_the_whole_chain() {
    setup_logger(LevelFilter::Trace);

    let chain = build_chain(10);
    let (node, mut peer, _root) = start_node_and_peer(&chain, default_configuration());

    wait_for_tip(&node, &mut peer, 10);

    // The tip answers queries, and so does every historical block.
    assert_eq!(counter_at(&node, None), 10);
    for height in [1usize, 4, 9] {
        let hash = chain[height].0.hash();
        assert_eq!(counter_at(&node, Some(&hash)), height as u64);
    }
}

#[test]
fn mined_blocks_are_adopted_and_announced() {
    setup_logger(LevelFilter::Trace);

    let chain = build_chain(3);
    let (node, mut peer, _root) = start_node_and_peer(&chain, default_configuration());
    wait_for_tip(&node, &mut peer, 3);

    let (tip, tip_state, _) = chain.last().unwrap();
    let (mined, mined_state, redo) = extend(&tip.header, tip_state, &[5]);
    node.add_mined_block(mined.clone(), mined_state, redo);

    pump_until(&mut peer, Duration::from_secs(10), |_| {
        node.chain_reader()
            .best_header()
            .unwrap()
            .map(|best| best.header.hash == mined.hash())
            .unwrap_or(false)
    });
    assert_eq!(counter_at(&node, None), 8);

    // The mined block is never re-executed, so its snapshot is whatever the miner handed over,
    // and the peer (known to be at height 3) hears a tip announcement for height 4.
    pump_until(&mut peer, Duration::from_secs(10), |peer| {
        !peer.announcements.is_empty()
    });
    let announced = peer.announcements.last().unwrap();
    assert_eq!(
        announced.headers.last().unwrap().height,
        BlockHeight::new(4)
    );
}

#[test]
fn a_longer_fork_displaces_the_tip() {
    setup_logger(LevelFilter::Trace);

    let chain = build_chain(10);
    let (node, mut peer, _root) = start_node_and_peer(&chain, default_configuration());
    wait_for_tip(&node, &mut peer, 10);
    let old_tip = chain[10].0.hash();

    // A competing branch forking off height 8, one block longer than the incumbent chain.
    let (fork_a, state_a, _) = extend(&chain[8].0.header, &chain[8].1, &[7]);
    let (fork_b, state_b, _) = extend(&fork_a.header, &state_a, &[7]);
    let (fork_c, _, _) = extend(&fork_b.header, &state_b, &[7]);
    peer.extra = vec![fork_a.clone(), fork_b.clone(), fork_c.clone()];

    let announcement = Headers::announcement(vec![
        fork_a.header.clone(),
        fork_b.header.clone(),
        fork_c.header.clone(),
    ]);
    peer.network.broadcast(announcement.into());

    pump_until(&mut peer, Duration::from_secs(10), |_| {
        node.chain_reader()
            .best_header()
            .unwrap()
            .map(|best| best.header.hash == fork_c.hash())
            .unwrap_or(false)
    });

    // Counter on the winning branch: 8 at the fork point, then three blocks of +7.
    assert_eq!(counter_at(&node, None), 29);

    // The displaced blocks are side branch now, but their snapshots still answer queries.
    assert_eq!(counter_at(&node, Some(&old_tip)), 10);
    assert_eq!(counter_at(&node, Some(&chain[9].0.hash())), 9);
}

#[test]
fn an_equal_height_fork_stays_a_side_branch() {
    setup_logger(LevelFilter::Trace);

    let chain = build_chain(6);
    let (node, mut peer, _root) = start_node_and_peer(&chain, default_configuration());
    wait_for_tip(&node, &mut peer, 6);

    // A branch forking off height 4 that only catches up to the incumbent's height.
    let (fork_a, state_a, _) = extend(&chain[4].0.header, &chain[4].1, &[9]);
    let (fork_b, _, _) = extend(&fork_a.header, &state_a, &[9]);
    peer.extra = vec![fork_a.clone(), fork_b.clone()];

    let announcement = Headers::announcement(vec![fork_a.header.clone(), fork_b.header.clone()]);
    peer.network.broadcast(announcement.into());

    // Wait until the fork tip is verified (its snapshot answers queries).
    let fork_tip = fork_b.hash();
    pump_until(&mut peer, Duration::from_secs(10), |_| {
        node.chain_reader().call_get(Some(&fork_tip), "get", &[]).is_ok()
    });

    // Ties favor the incumbent: the canonical tip has not moved.
    let best = node.chain_reader().best_header().unwrap().unwrap();
    assert_eq!(best.header.hash, chain[6].0.hash());
    assert_eq!(counter_at(&node, None), 6);
    assert_eq!(counter_at(&node, Some(&fork_tip)), 22);
}
