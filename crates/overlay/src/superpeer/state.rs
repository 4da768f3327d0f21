//! Ring membership of one superpeer.

use corelib::ring::{
    insert_sorted, is_node_in_range, is_superpeer_in_range, remove_sorted, responsible_area, IntervalKind,
};
use corelib::NodeId;
use std::fmt;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Status {
    Joining,
    Stable,
}

/// Everything guarded by the overlay lock.
///
/// `superpeers` and `peers` are sorted and never contain `node` itself.
/// Neighbour pointers are `None` while the superpeer is alone; setting one
/// also inserts it into `superpeers`.
#[derive(Clone, Debug)]
pub struct RingState {
    pub node: NodeId,
    pub status: Status,
    pub predecessor: Option<NodeId>,
    pub successor: Option<NodeId>,
    pub bootstrap: Option<NodeId>,
    pub superpeers: Vec<NodeId>,
    pub peers: Vec<NodeId>,
}

impl RingState {
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            status: Status::Joining,
            predecessor: None,
            successor: None,
            bootstrap: None,
            superpeers: Vec::new(),
            peers: Vec::new(),
        }
    }

    pub fn set_successor(&mut self, successor: Option<NodeId>) {
        self.successor = successor.filter(|s| *s != self.node);
        if let Some(s) = self.successor {
            insert_sorted(&mut self.superpeers, s);
        }
    }

    pub fn set_predecessor(&mut self, predecessor: Option<NodeId>) {
        self.predecessor = predecessor.filter(|p| *p != self.node);
        if let Some(p) = self.predecessor {
            insert_sorted(&mut self.superpeers, p);
        }
    }

    pub fn is_alone(&self) -> bool {
        self.superpeers.is_empty()
    }

    /// Primary for chunks of `creator`: `creator` in `(predecessor, node)`.
    pub fn is_responsible_for(&self, creator: NodeId) -> bool {
        match self.predecessor {
            Some(p) if !self.is_alone() => is_node_in_range(creator, p, self.node, IntervalKind::Open),
            _ => true,
        }
    }

    /// Primary for a nameservice placement: `hash` in `(predecessor, node]`.
    pub fn is_responsible_for_hash(&self, hash: u16) -> bool {
        match self.predecessor {
            Some(p) if !self.is_alone() => is_node_in_range(NodeId(hash), p, self.node, IntervalKind::UpperClosed),
            _ => true,
        }
    }

    /// Accept `candidate` as predecessor if it lies in `(predecessor, node)`.
    pub fn offer_predecessor(&mut self, candidate: NodeId) -> bool {
        if Some(candidate) == self.predecessor || !is_superpeer_in_range(candidate, self.predecessor, Some(self.node)) {
            return false;
        }
        self.set_predecessor(Some(candidate));
        true
    }

    /// Accept `candidate` as successor if it lies in `(node, successor)`.
    pub fn offer_successor(&mut self, candidate: NodeId) -> bool {
        if Some(candidate) == self.successor || !is_superpeer_in_range(candidate, Some(self.node), self.successor) {
            return false;
        }
        self.set_successor(Some(candidate));
        true
    }

    /// Area this superpeer stores data for, as an open interval `(start, node)`.
    pub fn responsible_area(&self) -> (NodeId, NodeId) {
        responsible_area(self.node, self.predecessor, &self.superpeers)
    }

    /// Remove a failed superpeer and repair the neighbour pointers by list position.
    ///
    /// # Returns
    /// `false` if `failed` was not a known superpeer
    pub fn remove_superpeer(&mut self, failed: NodeId) -> bool {
        let index = match remove_sorted(&mut self.superpeers, failed) {
            Some(index) => index,
            None => return false,
        };
        let size = self.superpeers.len();
        if self.successor == Some(failed) {
            self.successor = match size {
                0 => None,
                _ if index < size => Some(self.superpeers[index]),
                _ => Some(self.superpeers[0]),
            };
        }
        if self.predecessor == Some(failed) {
            self.predecessor = match size {
                0 => None,
                _ if index > 0 => Some(self.superpeers[index - 1]),
                _ => Some(self.superpeers[size - 1]),
            };
        }
        true
    }
}

impl fmt::Display for RingState {
    /// `Superpeers: 0x1000 '0x2000' 0x3000 Peers: 0x2500`, own id quoted.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Superpeers:")?;
        let mut printed = false;
        for sp in &self.superpeers {
            if !printed && *sp > self.node {
                write!(f, " '{}'", self.node)?;
                printed = true;
            }
            write!(f, " {}", sp)?;
        }
        if !printed {
            write!(f, " '{}'", self.node)?;
        }
        if !self.peers.is_empty() {
            write!(f, " Peers:")?;
            for peer in &self.peers {
                write!(f, " {}", peer)?;
            }
        }
        Ok(())
    }
}
