//! Test harness for in-process trellis-node integration tests.
//!
//! Provides VirtualNode (one assembled node on a shared virtual transport)
//! and VirtualMesh (an N-node orchestrator with standard connection
//! topologies and convergence polling).

use std::sync::Arc;
use std::time::Duration;

use trellis_model::{NetworkResponse, NodeId};
use trellis_node::config::NodeConfig;
use trellis_node::{PlatformNode, PlatformPayload};
use trellis_transport::{VirtualTransport, VIRTUAL_TRANSPORT_ID};

/// Read TEST_NODE_COUNT from environment, falling back to `default`.
pub fn test_node_count(default: usize) -> usize {
    std::env::var("TEST_NODE_COUNT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Scale a base timeout by node count; larger meshes need more time for
/// LSA propagation. Formula: base_secs * ceil(n / 3), minimum = base_secs.
pub fn scaled_timeout(n: usize, base_secs: u64) -> Duration {
    let factor = ((n as f64) / 3.0).ceil().max(1.0) as u64;
    Duration::from_secs(base_secs * factor)
}

/// A running in-process node attached to a shared virtual transport.
pub struct VirtualNode {
    pub node: Arc<PlatformNode>,
    pub contact_point: String,
}

#[allow(dead_code)]
impl VirtualNode {
    pub async fn spawn(
        transport: &Arc<VirtualTransport>,
        name: &str,
        port: u16,
    ) -> anyhow::Result<Self> {
        let contact_point = format!("{VIRTUAL_TRANSPORT_ID}:localhost:{port}");
        let mut config = NodeConfig::default();
        config.node.name = name.to_string();
        config.network.server_contact_points = vec![contact_point.clone()];
        config.network.health_check = false;

        let node = PlatformNode::new(config, transport.clone())?;
        node.start().await?;
        Ok(Self {
            node,
            contact_point,
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.node.node_id().clone()
    }

    /// Connect to another node with duplex allowed.
    pub async fn connect_to(&self, other: &VirtualNode) -> anyhow::Result<()> {
        self.node
            .management()
            .add_runtime_peer(&other.contact_point)
            .await?;
        Ok(())
    }

    pub fn topology_hash(&self) -> String {
        self.node.routing_manager().topology_hash()
    }

    pub fn known_node_count(&self) -> usize {
        self.node.routing_manager().topology_snapshot().0.len()
    }

    /// Send an echo probe to `receiver` over the routed layer.
    pub async fn perform_echo_request(
        &self,
        text: &str,
        receiver: &NodeId,
    ) -> anyhow::Result<NetworkResponse> {
        let payload = serde_json::to_vec(&PlatformPayload::Echo { text: text.into() })?;
        Ok(self
            .node
            .routing_service()
            .perform_routed_request(payload, receiver, Duration::from_secs(10))
            .await)
    }

    pub async fn shutdown(&self) {
        self.node.shutdown().await;
    }
}

/// Orchestrates N nodes over one shared virtual transport.
pub struct VirtualMesh {
    pub transport: Arc<VirtualTransport>,
    pub nodes: Vec<VirtualNode>,
}

#[allow(dead_code)]
impl VirtualMesh {
    /// Spawn N unconnected nodes.
    pub async fn new(n: usize) -> anyhow::Result<Self> {
        let transport = VirtualTransport::new(true);
        let mut nodes = Vec::new();
        for i in 0..n {
            nodes.push(VirtualNode::spawn(&transport, &format!("node-{i}"), 22000 + i as u16).await?);
        }
        Ok(Self { transport, nodes })
    }

    /// node-0 <- node-1 <- ... <- node-(n-1), each connecting to its
    /// predecessor.
    pub async fn connect_chain(&self) -> anyhow::Result<()> {
        for i in 1..self.nodes.len() {
            self.nodes[i].connect_to(&self.nodes[i - 1]).await?;
        }
        Ok(())
    }

    /// A chain plus a closing link from the last node to the first.
    pub async fn connect_ring(&self) -> anyhow::Result<()> {
        self.connect_chain().await?;
        if self.nodes.len() > 2 {
            self.nodes[0]
                .connect_to(&self.nodes[self.nodes.len() - 1])
                .await?;
        }
        Ok(())
    }

    /// Every node connects to node-0.
    pub async fn connect_star(&self) -> anyhow::Result<()> {
        for i in 1..self.nodes.len() {
            self.nodes[i].connect_to(&self.nodes[0]).await?;
        }
        Ok(())
    }

    /// Incremental random topology: each node connects to one arbitrary
    /// earlier node, keeping the mesh connected. `seed` makes runs
    /// reproducible.
    pub async fn connect_random_incremental(&self, seed: u64) -> anyhow::Result<()> {
        let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
        for i in 1..self.nodes.len() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let target = (state >> 33) as usize % i;
            self.nodes[i].connect_to(&self.nodes[target]).await?;
        }
        Ok(())
    }

    /// Poll until every node knows all N nodes and all topology hashes are
    /// structurally equal.
    pub async fn wait_converged(&self, timeout: Duration) -> anyhow::Result<()> {
        let n = self.nodes.len();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let complete = self.nodes.iter().all(|node| node.known_node_count() == n);
            let hashes: Vec<String> = self.nodes.iter().map(|n| n.topology_hash()).collect();
            let equal = hashes.windows(2).all(|pair| pair[0] == pair[1]);
            if complete && equal {
                return Ok(());
            }
            if tokio::time::Instant::now() > deadline {
                let counts: Vec<usize> =
                    self.nodes.iter().map(|n| n.known_node_count()).collect();
                anyhow::bail!(
                    "mesh did not converge within {timeout:?}; node counts: {counts:?}, hashes: {hashes:?}"
                );
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    pub async fn shutdown_all(self) {
        for node in &self.nodes {
            node.shutdown().await;
        }
    }
}
