// A cardmesh node collects together everything one peer needs to
// participate in the transaction mesh: a handle to the local State
// Store, the Transaction Engine that drives 2PC over it, an RPC
// server answering inbound PREPARE/DECIDE/STATUS, and a recovery
// sweeper nudging stalled transactions forward on its own thread.
//
// Every node participates in every transaction it's listed as a
// participant for; there is no passive/replica mode (spec.md's
// Non-goals rule out partial-participation topologies).

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cardmesh_base::Result;
use cardmesh_events::LoggingEventSink;
use cardmesh_net::{HttpTransport, RpcServer};
use cardmesh_registry::{Config, PeerRegistry};
use cardmesh_store::{Catalog, CoordinationService, MemStore, RedbStore, Store};
use cardmesh_txn::{RecoverySweeper, TransactionEngine};

/// The backend is chosen once at startup (`store_path` present or
/// not) and erased behind this object so the rest of the node is
/// backend-agnostic, same as `cardmesh-store`'s own `MemStore` vs.
/// `RedbStore` split.
pub type DynStore = Arc<dyn Store>;

pub struct Node {
    engine: Arc<TransactionEngine<DynStore>>,
    server: Arc<RpcServer>,
    sweeper: Arc<RecoverySweeper<DynStore>>,
    listen_addr: String,
}

impl Node {
    pub fn bootstrap(config: Config) -> Result<Node> {
        let registry = PeerRegistry::from_config(&config);

        let store: DynStore = match &config.store_path {
            Some(path) => Arc::new(RedbStore::open(path)?),
            None => Arc::new(MemStore::new()),
        };
        let coord = CoordinationService::new(store);

        let initial_stock: i64 = config.stock.initial_packs.values().map(|&n| n as i64).sum();
        coord.bootstrap_stock(initial_stock)?;

        let transport = Arc::new(HttpTransport::new(config.peer_addresses()));
        let catalog = Arc::new(Catalog::default());
        let events = Arc::new(LoggingEventSink);
        let timeouts = config.timeouts.into();

        let engine = Arc::new(TransactionEngine::new(
            registry.self_id.clone(),
            registry.all_peers(),
            coord,
            transport,
            catalog,
            events,
            timeouts,
        ));

        let server = Arc::new(RpcServer::new(engine.clone()));
        let sweeper = Arc::new(RecoverySweeper::new(
            engine.clone(),
            Duration::from_millis(config.timeouts.poll_interval_ms),
            Duration::from_millis(config.timeouts.recovery_interval_ms),
            Duration::from_millis(config.timeouts.block_max_ms),
        ));

        Ok(Node {
            engine,
            server,
            sweeper,
            listen_addr: config.listen_addr,
        })
    }

    pub fn engine(&self) -> &Arc<TransactionEngine<DynStore>> {
        &self.engine
    }

    /// Runs forever: the recovery sweeper on its own thread, the RPC
    /// server blocking the caller's thread. Returns only if the
    /// listener itself fails to bind or accept.
    pub fn run(self) -> Result<()> {
        let sweeper = self.sweeper.clone();
        thread::spawn(move || sweeper.run());

        self.server
            .serve(&self.listen_addr)
            .map_err(|e| cardmesh_base::err(format!("rpc server failed: {e}")))
    }
}
