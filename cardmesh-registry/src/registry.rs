// The static peer list a node was configured with. Membership never
// changes at runtime (spec.md's Non-goals rule out dynamic
// reconfiguration), so this is just a thin, queryable wrapper over
// `Config::peers`.

use cardmesh_base::PeerId;

use crate::config::Config;

#[derive(Clone, Debug)]
pub struct PeerRegistry {
    pub self_id: PeerId,
    peers: Vec<PeerId>,
}

impl PeerRegistry {
    pub fn from_config(config: &Config) -> Self {
        PeerRegistry {
            self_id: config.self_id.clone(),
            peers: config.peers.iter().map(|p| p.id.clone()).collect(),
        }
    }

    /// All configured peers, including this node.
    pub fn all_peers(&self) -> Vec<PeerId> {
        let mut ids = self.peers.clone();
        if !ids.contains(&self.self_id) {
            ids.push(self.self_id.clone());
        }
        ids
    }

    /// Every peer other than this node, the usual fan-out target set.
    pub fn remote_peers(&self) -> Vec<PeerId> {
        self.peers
            .iter()
            .filter(|p| **p != self.self_id)
            .cloned()
            .collect()
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        peer == &self.self_id || self.peers.contains(peer)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::PeerAddr;

    fn config() -> Config {
        Config {
            self_id: PeerId::from("a"),
            listen_addr: "127.0.0.1:9001".to_string(),
            peers: vec![
                PeerAddr { id: PeerId::from("a"), address: "127.0.0.1:9001".to_string() },
                PeerAddr { id: PeerId::from("b"), address: "127.0.0.1:9002".to_string() },
                PeerAddr { id: PeerId::from("c"), address: "127.0.0.1:9003".to_string() },
            ],
            store_path: None,
            timeouts: Default::default(),
            stock: Default::default(),
        }
    }

    #[test]
    fn remote_peers_excludes_self() {
        let registry = PeerRegistry::from_config(&config());
        let remote = registry.remote_peers();
        assert_eq!(remote.len(), 2);
        assert!(!remote.contains(&PeerId::from("a")));
    }

    #[test]
    fn all_peers_includes_self() {
        let registry = PeerRegistry::from_config(&config());
        assert_eq!(registry.all_peers().len(), 3);
    }
}
