//! Boot directory.
//!
//! The cluster-wide registry that knows which nodes exist, which superpeer is
//! the bootstrap contact, and which nodes have been reported as failed.

use corelib::{NodeId, NodeRole};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

pub trait BootDirectory: Send + Sync + 'static {
    /// Superpeer new nodes contact first.
    fn bootstrap(&self) -> Option<NodeId>;

    /// Replace a failed bootstrap with `candidate`.
    ///
    /// If another node already replaced `failed`, its choice wins.
    ///
    /// # Returns
    /// The bootstrap after the election
    fn elect_bootstrap(&self, failed: NodeId, candidate: NodeId) -> NodeId;

    /// True if `node` is a registered storage node or superpeer that has not
    /// been reported as failed. Terminals are never available.
    fn is_node_available(&self, node: NodeId) -> bool;

    fn report_failure(&self, node: NodeId, is_superpeer: bool);
}

#[derive(Debug, Default)]
struct Registry {
    bootstrap: Option<NodeId>,
    nodes: BTreeMap<NodeId, NodeRole>,
    failed: BTreeSet<NodeId>,
}

/// In-memory boot directory filled by the node launcher.
#[derive(Debug, Default)]
pub struct StaticBootDirectory {
    registry: Mutex<Registry>,
}

impl StaticBootDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `node`; the first superpeer becomes the bootstrap.
    pub fn register(&self, node: NodeId, role: NodeRole) {
        let mut registry = self.registry.lock();
        registry.nodes.insert(node, role);
        registry.failed.remove(&node);
        if role == NodeRole::Superpeer && registry.bootstrap.is_none() {
            registry.bootstrap = Some(node);
        }
    }

    pub fn role_of(&self, node: NodeId) -> Option<NodeRole> {
        self.registry.lock().nodes.get(&node).copied()
    }

    pub fn failed_nodes(&self) -> Vec<NodeId> {
        self.registry.lock().failed.iter().copied().collect()
    }
}

impl BootDirectory for StaticBootDirectory {
    fn bootstrap(&self) -> Option<NodeId> {
        self.registry.lock().bootstrap
    }

    fn elect_bootstrap(&self, failed: NodeId, candidate: NodeId) -> NodeId {
        let mut registry = self.registry.lock();
        match registry.bootstrap {
            Some(current) if current != failed => current,
            _ => {
                info!(old = %failed, new = %candidate, "electing new bootstrap");
                registry.bootstrap = Some(candidate);
                candidate
            }
        }
    }

    fn is_node_available(&self, node: NodeId) -> bool {
        let registry = self.registry.lock();
        !registry.failed.contains(&node)
            && matches!(registry.nodes.get(&node), Some(NodeRole::Peer) | Some(NodeRole::Superpeer))
    }

    fn report_failure(&self, node: NodeId, is_superpeer: bool) {
        info!(node = %node, is_superpeer, "node failure reported");
        self.registry.lock().failed.insert(node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_superpeer_is_bootstrap() {
        let boot = StaticBootDirectory::new();
        boot.register(NodeId(5), NodeRole::Peer);
        assert_eq!(boot.bootstrap(), None);
        boot.register(NodeId(2), NodeRole::Superpeer);
        boot.register(NodeId(1), NodeRole::Superpeer);
        assert_eq!(boot.bootstrap(), Some(NodeId(2)));
    }

    #[test]
    fn test_election_is_first_writer_wins() {
        let boot = StaticBootDirectory::new();
        boot.register(NodeId(1), NodeRole::Superpeer);
        assert_eq!(boot.elect_bootstrap(NodeId(1), NodeId(7)), NodeId(7));
        assert_eq!(boot.elect_bootstrap(NodeId(1), NodeId(9)), NodeId(7), "second election must not override");
    }

    #[test]
    fn test_availability() {
        let boot = StaticBootDirectory::new();
        boot.register(NodeId(1), NodeRole::Superpeer);
        boot.register(NodeId(2), NodeRole::Peer);
        boot.register(NodeId(3), NodeRole::Terminal);
        assert!(boot.is_node_available(NodeId(2)));
        assert!(!boot.is_node_available(NodeId(3)));
        assert!(!boot.is_node_available(NodeId(4)));

        boot.report_failure(NodeId(2), false);
        assert!(!boot.is_node_available(NodeId(2)));
        assert_eq!(boot.failed_nodes(), vec![NodeId(2)]);
        assert_eq!(boot.role_of(NodeId(3)), Some(NodeRole::Terminal));
    }
}
