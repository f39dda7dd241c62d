// Shared multi-peer test harness: every engine in a "mesh" wraps a
// clone of the same `Arc<MemStore>` and is registered on one shared
// `LoopbackTransport`, mirroring the single-logical-store topology the
// rest of this workspace assumes. Building this by hand in every test
// file would just be copy-pasted boilerplate, so it lives here once.

use std::sync::Arc;

use cardmesh_base::{PeerId, TxIdMinter};
use cardmesh_events::LoggingEventSink;
use cardmesh_net::LoopbackTransport;
use cardmesh_registry::Timeouts;
use cardmesh_store::{CardId, Catalog, CoordinationService, MemStore};
use cardmesh_txn::{EngineTimeouts, TransactionEngine};

pub type Engine = TransactionEngine<Arc<MemStore>>;

pub fn build_engine(
    self_id: &str,
    participants: &[&str],
    store: Arc<MemStore>,
    transport: Arc<LoopbackTransport>,
    max_retries: u32,
) -> Arc<Engine> {
    let coord = CoordinationService::with_max_retries(store, max_retries);
    let timeouts: EngineTimeouts = Timeouts::default().into();
    Arc::new(TransactionEngine::new(
        PeerId::from(self_id),
        participants.iter().map(|p| PeerId::from(*p)).collect(),
        coord,
        transport,
        Arc::new(Catalog::default()),
        Arc::new(LoggingEventSink),
        timeouts,
    ))
}

/// A mesh of `peer_ids.len()` engines sharing one `MemStore`, all
/// registered on one `LoopbackTransport`. `max_retries` is raised well
/// above the production default of 5 in tests that deliberately drive
/// heavy concurrent contention on a single key (e.g. the stock
/// exhaustion scenarios) through a store whose CAS never sleeps
/// between attempts, so a generous budget costs nothing but makes the
/// scenario's expected exact counts deterministic.
pub fn build_mesh(peer_ids: &[&str], max_retries: u32) -> (Arc<MemStore>, Arc<LoopbackTransport>, Vec<Arc<Engine>>) {
    let store = Arc::new(MemStore::new());
    let transport = Arc::new(LoopbackTransport::new());
    let engines: Vec<Arc<Engine>> = peer_ids
        .iter()
        .map(|id| build_engine(id, peer_ids, store.clone(), transport.clone(), max_retries))
        .collect();
    for (id, engine) in peer_ids.iter().zip(engines.iter()) {
        transport.register(PeerId::from(*id), engine.clone());
    }
    (store, transport, engines)
}

/// Hand a player a starting inventory directly through the
/// Coordination Service, bypassing 2PC — for test setup only, the
/// same way a real deployment's seed data wouldn't go through a
/// transaction either.
pub fn give_cards(coord: &CoordinationService<Arc<MemStore>>, minter: &TxIdMinter, player: &str, cards: &[CardId]) {
    if cards.is_empty() {
        return;
    }
    let tx = minter.mint();
    coord.reserve_pack(&tx, player, "starter").unwrap();
    coord.materialize_pack(&tx, player, cards).unwrap();
}
