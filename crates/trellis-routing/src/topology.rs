//! Topology model -- an adjacency map keyed by stable node ids.
//!
//! Nodes and links are value types; cycles are just edges, never object
//! references. Mutation is serialized by the owning protocol manager;
//! readers get disconnected snapshots.

use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use trellis_model::NodeId;

use crate::lsa::{LinkStateAdvertisement, LsaBatch, LsaLink, LsaReason};

/// A node as known to the topology model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyNode {
    pub node_id: NodeId,
    pub display_name: String,
    pub is_workflow_host: bool,
    pub sequence_number: u64,
}

impl TopologyNode {
    fn stub(node_id: NodeId) -> Self {
        let display_name = node_id.as_str().to_string();
        Self {
            node_id,
            display_name,
            is_workflow_host: false,
            sequence_number: 0,
        }
    }
}

/// A directed edge, identified by the connection that realizes it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopologyLink {
    pub from: NodeId,
    pub to: NodeId,
    pub connection_id: String,
}

/// A hop-by-hop path through the topology.
#[derive(Debug, Clone)]
pub struct NetworkRoute {
    pub path: Vec<TopologyLink>,
}

impl NetworkRoute {
    pub fn first_link(&self) -> Option<&TopologyLink> {
        self.path.first()
    }

    pub fn len(&self) -> usize {
        self.path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }
}

/// The local topology view, seeded with the owning node.
#[derive(Debug)]
pub struct TopologyMap {
    own_node_id: NodeId,
    nodes: HashMap<NodeId, TopologyNode>,
    links: HashSet<TopologyLink>,
}

impl TopologyMap {
    pub fn new(own: TopologyNode) -> Self {
        let own_node_id = own.node_id.clone();
        let mut nodes = HashMap::new();
        nodes.insert(own_node_id.clone(), own);
        Self {
            own_node_id,
            nodes,
            links: HashSet::new(),
        }
    }

    pub fn own_node_id(&self) -> &NodeId {
        &self.own_node_id
    }

    pub fn contains_node(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node(&self, id: &NodeId) -> Option<&TopologyNode> {
        self.nodes.get(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Ensure a node exists; unknown nodes start as stubs awaiting an LSA.
    pub fn add_node(&mut self, id: NodeId) -> &mut TopologyNode {
        self.nodes.entry(id.clone()).or_insert_with(|| TopologyNode::stub(id))
    }

    pub fn add_link(&mut self, from: NodeId, to: NodeId, connection_id: impl Into<String>) {
        self.add_node(from.clone());
        self.add_node(to.clone());
        self.links.insert(TopologyLink {
            from,
            to,
            connection_id: connection_id.into(),
        });
    }

    pub fn has_link_for_connection(&self, connection_id: &str) -> bool {
        self.links.iter().any(|l| l.connection_id == connection_id)
    }

    /// Remove the own-node link realized by the given connection.
    pub fn remove_link_for_connection(&mut self, connection_id: &str) -> bool {
        let before = self.links.len();
        self.links
            .retain(|l| !(l.from == self.own_node_id && l.connection_id == connection_id));
        self.links.len() != before
    }

    /// Direct successors of a node (targets of its outgoing links).
    pub fn successors_of(&self, id: &NodeId) -> Vec<NodeId> {
        let mut out: BTreeSet<NodeId> = BTreeSet::new();
        for link in self.links.iter().filter(|l| &l.from == id) {
            out.insert(link.to.clone());
        }
        out.into_iter().collect()
    }

    /// Outgoing links of the own node.
    pub fn own_links(&self) -> Vec<TopologyLink> {
        let mut links: Vec<_> = self
            .links
            .iter()
            .filter(|l| l.from == self.own_node_id)
            .cloned()
            .collect();
        links.sort();
        links
    }

    /// The link (if any) from the own node realized by a connection id.
    pub fn link_for_connection(&self, connection_id: &str) -> Option<TopologyLink> {
        self.links
            .iter()
            .find(|l| l.from == self.own_node_id && l.connection_id == connection_id)
            .cloned()
    }

    /// Merge a received LSA. Returns true if the model changed.
    ///
    /// Acceptance is sequence-numbered: an LSA older than or equal to the
    /// stored state of its owner is rejected, which also kills echoes of a
    /// node's own advertisements.
    pub fn update(&mut self, lsa: &LinkStateAdvertisement) -> bool {
        if lsa.reason == LsaReason::Shutdown {
            return self.remove_node(&lsa.owner);
        }

        if let Some(existing) = self.nodes.get(&lsa.owner) {
            if lsa.sequence_number <= existing.sequence_number {
                return false;
            }
        }

        let entry = self.add_node(lsa.owner.clone());
        entry.display_name = lsa.display_name.clone();
        entry.is_workflow_host = lsa.is_workflow_host;
        entry.sequence_number = lsa.sequence_number;

        // replace the owner's outgoing edge set with the advertised one
        self.links.retain(|l| l.from != lsa.owner);
        for link in &lsa.links {
            self.add_link(
                lsa.owner.clone(),
                link.to.clone(),
                link.connection_id.clone(),
            );
        }
        true
    }

    /// Remove a node and every link touching it.
    pub fn remove_node(&mut self, id: &NodeId) -> bool {
        if id == &self.own_node_id {
            return false;
        }
        let existed = self.nodes.remove(id).is_some();
        let before = self.links.len();
        self.links.retain(|l| &l.from != id && &l.to != id);
        existed || self.links.len() != before
    }

    /// Generate a fresh own-node LSA, bumping the sequence number.
    pub fn generate_lsa(&mut self, reason: LsaReason) -> LinkStateAdvertisement {
        let links = self
            .own_links()
            .into_iter()
            .map(|l| LsaLink {
                to: l.to,
                connection_id: l.connection_id,
            })
            .collect();
        let own = self
            .nodes
            .get_mut(&self.own_node_id)
            .expect("own node is always present");
        own.sequence_number += 1;
        LinkStateAdvertisement {
            owner: own.node_id.clone(),
            sequence_number: own.sequence_number,
            display_name: own.display_name.clone(),
            is_workflow_host: own.is_workflow_host,
            reason,
            links,
        }
    }

    /// Full-state batch for the initial exchange on a new connection.
    /// The own entry is freshly generated so the new link set is accepted
    /// by peers that already know this node.
    pub fn generate_lsa_batch_of_all_nodes(&mut self) -> LsaBatch {
        let mut batch = LsaBatch::default();
        let node_ids: Vec<NodeId> = self.nodes.keys().cloned().collect();
        for id in node_ids {
            if id == self.own_node_id {
                continue;
            }
            let node = &self.nodes[&id];
            let links = self
                .links
                .iter()
                .filter(|l| l.from == id)
                .map(|l| LsaLink {
                    to: l.to.clone(),
                    connection_id: l.connection_id.clone(),
                })
                .collect();
            batch.insert(LinkStateAdvertisement {
                owner: node.node_id.clone(),
                sequence_number: node.sequence_number,
                display_name: node.display_name.clone(),
                is_workflow_host: node.is_workflow_host,
                reason: LsaReason::Update,
                links,
            });
        }
        batch.insert(self.generate_lsa(LsaReason::Update));
        batch
    }

    /// BFS shortest path (fewest hops) along directed links.
    pub fn shortest_path(&self, from: &NodeId, to: &NodeId) -> Option<NetworkRoute> {
        if from == to {
            return Some(NetworkRoute { path: Vec::new() });
        }
        let mut predecessor: HashMap<NodeId, TopologyLink> = HashMap::new();
        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut queue = VecDeque::new();
        visited.insert(from.clone());
        queue.push_back(from.clone());

        while let Some(current) = queue.pop_front() {
            let mut outgoing: Vec<&TopologyLink> =
                self.links.iter().filter(|l| l.from == current).collect();
            outgoing.sort();
            for link in outgoing {
                if visited.insert(link.to.clone()) {
                    predecessor.insert(link.to.clone(), link.clone());
                    if &link.to == to {
                        let mut path = Vec::new();
                        let mut cursor = to.clone();
                        while &cursor != from {
                            let link = predecessor[&cursor].clone();
                            cursor = link.from.clone();
                            path.push(link);
                        }
                        path.reverse();
                        return Some(NetworkRoute { path });
                    }
                    queue.push_back(link.to.clone());
                }
            }
        }
        None
    }

    /// All nodes reachable from `from` (including itself).
    pub fn reachable_from(&self, from: &NodeId) -> BTreeSet<NodeId> {
        let mut visited: BTreeSet<NodeId> = BTreeSet::new();
        let mut queue = VecDeque::new();
        visited.insert(from.clone());
        queue.push_back(from.clone());
        while let Some(current) = queue.pop_front() {
            for link in self.links.iter().filter(|l| l.from == current) {
                if visited.insert(link.to.clone()) {
                    queue.push_back(link.to.clone());
                }
            }
        }
        visited
    }

    /// Structural hash: two maps are converged iff their hashes are equal.
    /// Covers the sorted node set and the sorted edge set, nothing else.
    pub fn topology_hash(&self) -> String {
        let mut hasher = Sha256::new();
        let mut node_ids: Vec<&NodeId> = self.nodes.keys().collect();
        node_ids.sort();
        for id in node_ids {
            hasher.update(b"n:");
            hasher.update(id.as_str().as_bytes());
            hasher.update(b"\n");
        }
        let mut links: Vec<&TopologyLink> = self.links.iter().collect();
        links.sort();
        for link in links {
            hasher.update(b"e:");
            hasher.update(link.from.as_str().as_bytes());
            hasher.update(b">");
            hasher.update(link.to.as_str().as_bytes());
            hasher.update(b"#");
            hasher.update(link.connection_id.as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }

    /// Disconnected snapshot of all nodes, for state models and formatting.
    pub fn node_snapshots(&self) -> Vec<TopologyNode> {
        let mut nodes: Vec<_> = self.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        nodes
    }

    /// Disconnected snapshot of all links.
    pub fn link_snapshots(&self) -> Vec<TopologyLink> {
        let mut links: Vec<_> = self.links.iter().cloned().collect();
        links.sort();
        links
    }
}
