//! Link-state routing protocol manager.
//!
//! Owns the topology map behind a single lock and keeps it in sync with the
//! rest of the mesh: accepted LSAs are merged and re-flooded to every
//! neighbor except the one they arrived from; a freshly established
//! connection triggers a full-state batch exchange so the new peer catches
//! up in one round trip. Sequence numbers kill duplicates and echoes; a
//! hop-count ceiling bounds pathological floods.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use trellis_model::{MetaData, NetworkRequest, NodeId};
use trellis_transport::{ConnectionListener, ConnectionService, NetworkConnection};

use crate::lsa::{LinkStateAdvertisement, LsaBatch, LsaMessage, LsaReason};
use crate::stats::NetworkStats;
use crate::topology::{TopologyLink, TopologyMap, TopologyNode};

/// Protocol manager for one node. Register it as a connection listener on
/// the node's `ConnectionService` so connects and disconnects feed the map.
pub struct LinkStateRoutingManager {
    connection_service: Arc<ConnectionService>,
    topology: Mutex<TopologyMap>,
    /// Live neighbor connections keyed by connection id; the flood targets.
    neighbors: Mutex<HashMap<String, Arc<dyn NetworkConnection>>>,
    stats: Arc<Mutex<NetworkStats>>,
    topology_version: watch::Sender<u64>,
}

impl LinkStateRoutingManager {
    pub fn new(connection_service: Arc<ConnectionService>) -> Arc<Self> {
        let own = connection_service.own_information();
        let seed = TopologyNode {
            node_id: own.node_id.clone(),
            display_name: own.display_name.clone(),
            is_workflow_host: own.is_workflow_host,
            sequence_number: 0,
        };
        let (topology_version, _) = watch::channel(0);
        Arc::new(Self {
            connection_service,
            topology: Mutex::new(TopologyMap::new(seed)),
            neighbors: Mutex::new(HashMap::new()),
            stats: Arc::new(Mutex::new(NetworkStats::default())),
            topology_version,
        })
    }

    pub fn own_node_id(&self) -> NodeId {
        self.connection_service.own_node_id().clone()
    }

    /// Subscribe to topology change notifications (a bumped version counter).
    pub fn subscribe_topology_changes(&self) -> watch::Receiver<u64> {
        self.topology_version.subscribe()
    }

    fn notify_topology_changed(&self) {
        self.topology_version.send_modify(|version| *version += 1);
    }

    pub fn topology_hash(&self) -> String {
        self.topology.lock().expect("topology lock").topology_hash()
    }

    /// Disconnected snapshots of the current node and link sets.
    pub fn topology_snapshot(&self) -> (Vec<TopologyNode>, Vec<TopologyLink>) {
        let topology = self.topology.lock().expect("topology lock");
        (topology.node_snapshots(), topology.link_snapshots())
    }

    pub fn stats_snapshot(&self) -> NetworkStats {
        self.stats.lock().expect("stats lock").clone()
    }

    /// All nodes currently reachable from this node, including itself.
    pub fn reachable_node_ids(&self) -> Vec<NodeId> {
        let topology = self.topology.lock().expect("topology lock");
        topology
            .reachable_from(topology.own_node_id())
            .into_iter()
            .collect()
    }

    pub fn node_snapshot(&self, id: &NodeId) -> Option<TopologyNode> {
        self.topology.lock().expect("topology lock").node(id).cloned()
    }

    /// The neighbor connection carrying the first hop towards `target`.
    pub fn next_hop_connection(&self, target: &NodeId) -> Option<Arc<dyn NetworkConnection>> {
        let first_link = {
            let topology = self.topology.lock().expect("topology lock");
            self.stats
                .lock()
                .expect("stats lock")
                .record_shortest_path_computation();
            let route = topology.shortest_path(topology.own_node_id(), target)?;
            route.first_link()?.clone()
        };
        self.neighbors
            .lock()
            .expect("neighbors lock")
            .get(&first_link.connection_id)
            .cloned()
    }

    /// Merge a single received LSA. Returns true if it was accepted; an
    /// accepted LSA is re-flooded (hop count incremented) to every neighbor
    /// except the node it arrived from.
    pub async fn handle_lsa(&self, lsa: LinkStateAdvertisement, metadata: &MetaData) -> bool {
        let hop_count = metadata.hop_count();
        let accepted = {
            let mut topology = self.topology.lock().expect("topology lock");
            topology.update(&lsa)
        };

        {
            let mut stats = self.stats.lock().expect("stats lock");
            stats.record_received_lsa(hop_count);
            if !accepted {
                stats.record_rejected_lsa(hop_count);
            }
        }

        if !accepted {
            return false;
        }

        tracing::debug!(
            own = %self.own_node_id(),
            owner = %lsa.owner,
            sequence = lsa.sequence_number,
            hop_count,
            "accepted LSA"
        );
        self.notify_topology_changed();

        let next_hop_count = hop_count + 1;
        if next_hop_count >= self.connection_service.params().max_hop_count {
            tracing::warn!(
                owner = %lsa.owner,
                hop_count = next_hop_count,
                "LSA reached hop-count ceiling, not forwarding"
            );
            return true;
        }

        let mut forward_metadata = MetaData::lsa_message();
        forward_metadata.set_value(trellis_model::metadata::KEY_HOPCOUNT, next_hop_count.to_string());
        forward_metadata.set_sender(self.connection_service.own_node_id());
        if let Some(trace) = metadata.get(trellis_model::metadata::KEY_TRACE) {
            forward_metadata.set_value(trellis_model::metadata::KEY_TRACE, trace);
        }
        forward_metadata.add_trace_item(self.own_node_id().as_str());

        // split horizon: skip the neighbor the LSA arrived from, and never
        // hand a node its own advertisement back
        let exclude = metadata.sender();
        self.flood(
            LsaMessage::Single(lsa.clone()),
            forward_metadata,
            next_hop_count,
            |remote| exclude.as_ref() != Some(remote) && remote != &lsa.owner,
        )
        .await;
        true
    }

    /// Merge a full-state batch (the peer's view) and answer with the own
    /// full-state batch. Accepted entries are re-flooded to the remaining
    /// neighbors so late joiners propagate transitively.
    pub async fn handle_lsa_batch(&self, batch: LsaBatch, source: &NodeId) -> LsaBatch {
        let (accepted, reply) = {
            let mut topology = self.topology.lock().expect("topology lock");
            let mut accepted = Vec::new();
            for lsa in batch.entries.into_values() {
                if topology.update(&lsa) {
                    accepted.push(lsa);
                }
            }
            (accepted, topology.generate_lsa_batch_of_all_nodes())
        };

        if !accepted.is_empty() {
            tracing::debug!(
                own = %self.own_node_id(),
                source = %source,
                accepted = accepted.len(),
                "merged LSA batch"
            );
            self.notify_topology_changed();
            for lsa in accepted {
                let mut metadata = MetaData::lsa_message();
                metadata.set_value(trellis_model::metadata::KEY_HOPCOUNT, "1");
                metadata.set_sender(self.connection_service.own_node_id());
                let owner = lsa.owner.clone();
                self.flood(LsaMessage::Single(lsa), metadata, 1, |remote| {
                    remote != source && remote != &owner
                })
                .await;
            }
        }
        reply
    }

    /// Flood the own LSA to all current neighbors.
    pub async fn broadcast_own_lsa(&self, reason: LsaReason) {
        let lsa = {
            let mut topology = self.topology.lock().expect("topology lock");
            topology.generate_lsa(reason)
        };
        self.notify_topology_changed();
        let mut metadata = MetaData::lsa_message();
        metadata.set_value(trellis_model::metadata::KEY_HOPCOUNT, "1");
        metadata.set_sender(self.connection_service.own_node_id());
        metadata.add_trace_item(self.own_node_id().as_str());
        self.flood(LsaMessage::Single(lsa), metadata, 1, |_| true).await;
    }

    /// Flood a shutdown LSA so peers drop this node from their views.
    pub async fn announce_shutdown(&self) {
        tracing::info!(own = %self.own_node_id(), "announcing shutdown to the network");
        self.broadcast_own_lsa(LsaReason::Shutdown).await;
    }

    /// Send an LSA message to every neighbor passing `include`, in shuffled
    /// order. Failures are logged and skipped; one bad peer never stops the
    /// flood.
    async fn flood<F>(&self, message: LsaMessage, metadata: MetaData, hop_count: u32, include: F)
    where
        F: Fn(&NodeId) -> bool,
    {
        let payload = match serde_json::to_vec(&message) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize LSA message");
                return;
            }
        };

        let mut targets: Vec<Arc<dyn NetworkConnection>> = {
            let neighbors = self.neighbors.lock().expect("neighbors lock");
            neighbors
                .values()
                .filter(|c| include(&c.remote_node_information().node_id))
                .cloned()
                .collect()
        };
        targets.shuffle(&mut rand::thread_rng());

        for connection in targets {
            self.stats
                .lock()
                .expect("stats lock")
                .record_sent_lsa(hop_count);
            let request = NetworkRequest::new(payload.clone(), MetaData::wrap(metadata.clone_map()));
            let receiver = self
                .connection_service
                .send_prepared_request(request, &connection);
            let stats = self.stats.clone();
            let remote = connection.remote_node_information().node_id.clone();
            tokio::spawn(async move {
                match receiver.await {
                    Ok(response) if response.is_success() => {}
                    _ => {
                        tracing::debug!(%remote, "LSA delivery failed, skipping peer");
                        stats.lock().expect("stats lock").record_failed_communication();
                    }
                }
            });
        }
    }
}

#[async_trait]
impl ConnectionListener for LinkStateRoutingManager {
    async fn on_outgoing_connection_established(&self, connection: Arc<dyn NetworkConnection>) {
        let remote = connection.remote_node_information().clone();
        {
            let mut topology = self.topology.lock().expect("topology lock");
            let node = topology.add_node(remote.node_id.clone());
            if node.sequence_number == 0 {
                // stub values from the handshake, refined by the first LSA
                node.display_name = remote.display_name.clone();
                node.is_workflow_host = remote.is_workflow_host;
            }
            let own = topology.own_node_id().clone();
            topology.add_link(own, remote.node_id.clone(), connection.connection_id());
        }
        self.neighbors
            .lock()
            .expect("neighbors lock")
            .insert(connection.connection_id().to_string(), connection.clone());

        if connection.initiated_by_remote() {
            // the initiator drives the batch exchange; just advertise the
            // new reverse link
            self.broadcast_own_lsa(LsaReason::Update).await;
            return;
        }

        // initial full-state exchange with the new peer
        let batch = {
            let mut topology = self.topology.lock().expect("topology lock");
            topology.generate_lsa_batch_of_all_nodes()
        };
        self.notify_topology_changed();
        let payload = match serde_json::to_vec(&LsaMessage::Batch(batch)) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize LSA batch");
                return;
            }
        };
        let mut metadata = MetaData::lsa_message();
        metadata.set_sender(self.connection_service.own_node_id());
        let response = self
            .connection_service
            .send_request_and_wait(
                payload,
                metadata,
                &connection,
                self.connection_service.params().forwarding_timeout(),
            )
            .await;

        if !response.is_success() {
            tracing::warn!(
                remote = %remote.log_description(),
                "initial LSA batch exchange failed"
            );
            self.stats
                .lock()
                .expect("stats lock")
                .record_failed_communication();
        } else if let Ok(LsaMessage::Batch(reply)) = response.deserialize_content() {
            self.handle_lsa_batch(reply, &remote.node_id).await;
        }

        // make sure existing neighbors learn about the new link as well
        self.broadcast_own_lsa(LsaReason::Update).await;
    }

    async fn on_outgoing_connection_terminated(&self, connection: Arc<dyn NetworkConnection>) {
        let removed = {
            let mut topology = self.topology.lock().expect("topology lock");
            topology.remove_link_for_connection(connection.connection_id())
        };
        self.neighbors
            .lock()
            .expect("neighbors lock")
            .remove(connection.connection_id());
        if removed {
            tracing::info!(
                connection_id = connection.connection_id(),
                remote = %connection.remote_node_information().log_description(),
                "connection terminated, link removed"
            );
            self.broadcast_own_lsa(LsaReason::Update).await;
        }
    }
}
