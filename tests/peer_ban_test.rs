//! Tests for the graduated peer banning rules: protocol violations cost a permanent ban, while
//! starving the block request window costs a bounded one.

mod common;

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use borsh::BorshSerialize;
use ed25519_dalek::{SigningKey, VerifyingKey};
use log::LevelFilter;
use rand_core::OsRng;
use tempfile::TempDir;

use chainrep::chain::policy::HeightPolicy;
use chainrep::events::BanPeerEvent;
use chainrep::networking::network::Network;
use chainrep::node::{Configuration, Node, NodeSpec};
use chainrep::state::redo::RedoLog;
use chainrep::sync::messages::BlockResponse;
use chainrep::sync::peer::BanLevel;
use chainrep::types::{
    block::Block,
    data_types::{BlockHeight, ChainID},
};

use common::blocks::{build_chain, extend};
use common::counter_app::{CounterApp, CounterViewApp};
use common::logging::setup_logger;
use common::mem_headers::MemHeaderStore;
use common::mem_ledger::{MemLedger, MemLedgerFactory};
use common::network::mock_network;
use common::scripted::ScriptedPeer;

type BanLog = Arc<Mutex<Vec<(VerifyingKey, BanLevel)>>>;

/// Like the replication test setup, but every [`BanPeerEvent`] is captured into the returned
/// log, and the peer's key is returned for asserting against it.
fn start_node_and_peer(
    chain: &[(Block, MemLedger, RedoLog)],
    configuration: Configuration,
) -> (
    Node<MemHeaderStore, MemLedgerFactory, CounterViewApp>,
    ScriptedPeer,
    VerifyingKey,
    BanLog,
    TempDir,
) {
    let node_key = SigningKey::generate(&mut OsRng).verifying_key();
    let peer_key = SigningKey::generate(&mut OsRng).verifying_key();
    let mut networks = mock_network([node_key, peer_key].into_iter());
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

    let bans: BanLog = Arc::new(Mutex::new(Vec::new()));
    let ban_log = bans.clone();
    let node = NodeSpec::builder()
        .app(CounterApp)
        .view_app(CounterViewApp)
        .network(node_network)
        .header_store(header_store)
        .ledger_factory(MemLedgerFactory)
        .policy(HeightPolicy)
        .snapshot_root(root.path().to_path_buf())
        .configuration(configuration)
        .on_ban_peer(move |event: &BanPeerEvent| {
            ban_log.lock().unwrap().push((event.peer, event.level));
        })
        .build()
        .start()
        .unwrap();

    let peer = ScriptedPeer::new(
        peer_network,
        chain.iter().map(|(block, _, _)| block.clone()).collect(),
    );
    (node, peer, peer_key, bans, root)
}

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

#[test]
fn unsolicited_block_bodies_cost_a_permanent_ban() {
    setup_logger(LevelFilter::Trace);

    let chain = build_chain(3);
    let configuration = Configuration::builder()
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
        .build();
    let (node, mut peer, peer_key, bans, _root) = start_node_and_peer(&chain, configuration);

    pump_until(&mut peer, Duration::from_secs(10), |_| {
        node.chain_reader().is_synced()
    });

    // A well-formed block the node never asked for.
    let (tip, tip_state, _) = chain.last().unwrap();
    let (stray, _, _) = extend(&tip.header, tip_state, &[1]);
    let response = BlockResponse {
        hash: stray.hash(),
        block_bytes: stray.try_to_vec().unwrap(),
        redo_bytes: None,
    };
    peer.network.broadcast(response.into());

    pump_until(&mut peer, Duration::from_secs(10), |_| {
        !bans.lock().unwrap().is_empty()
    });
    assert_eq!(*bans.lock().unwrap(), vec![(peer_key, BanLevel::Forever)]);

    // The stray block was dropped, not adopted.
    let best = node.chain_reader().best_header().unwrap().unwrap();
    assert_eq!(best.header.height, BlockHeight::new(3));
}

#[test]
fn starving_the_block_window_costs_an_hour_ban() {
    setup_logger(LevelFilter::Trace);

    let chain = build_chain(3);
    // A window of one, so a single lapsed block request exhausts it.
    let configuration = Configuration::builder()
        .chain_id(ChainID::new(0))
        .initial_window(1)
        .header_request_limit(5)
        .response_limit(100)
        .block_request_timeout(Duration::from_millis(100))
        .header_request_timeout(Duration::from_secs(5))
        .min_outbound(1)
        .sync_quorum(1)
        .confirmation_depth(2)
        .log_events(true)
        .build();
    let (_node, mut peer, peer_key, bans, _root) = start_node_and_peer(&chain, configuration);
    peer.serve_blocks = false;

    pump_until(&mut peer, Duration::from_secs(10), |_| {
        !bans.lock().unwrap().is_empty()
    });
    assert_eq!(*bans.lock().unwrap(), vec![(peer_key, BanLevel::Hour)]);
}
