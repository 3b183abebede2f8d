//! Connection lifecycle management: initial peers, runtime peers, shutdown.

use std::sync::Arc;

use trellis_model::{CommResult, NetworkContactPoint};
use trellis_routing::LinkStateRoutingManager;
use trellis_transport::ConnectionService;

pub struct ManagementService {
    connection_service: Arc<ConnectionService>,
    manager: Arc<LinkStateRoutingManager>,
    initial_peers: Vec<String>,
}

impl ManagementService {
    pub fn new(
        connection_service: Arc<ConnectionService>,
        manager: Arc<LinkStateRoutingManager>,
        initial_peers: Vec<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            connection_service,
            manager,
            initial_peers,
        })
    }

    /// Connect to every configured initial peer. Individual failures are
    /// logged and skipped; returns the number of connections established.
    pub async fn connect_to_initial_peers(&self) -> usize {
        let mut connected = 0;
        for peer in &self.initial_peers {
            match self.add_runtime_peer(peer).await {
                Ok(()) => connected += 1,
                Err(e) => {
                    tracing::warn!(peer = %peer, error = %e, "initial peer connection failed");
                }
            }
        }
        connected
    }

    /// Parse and connect a peer at runtime. Failures surface synchronously
    /// to the caller.
    pub async fn add_runtime_peer(&self, contact_point: &str) -> CommResult<()> {
        let ncp: NetworkContactPoint = contact_point.parse()?;
        self.connection_service.connect(&ncp, true).await?;
        Ok(())
    }

    /// Announce shutdown to the mesh, then close every outgoing connection.
    pub async fn announce_shutdown_and_close(&self) {
        self.manager.announce_shutdown().await;
        self.connection_service.close_all_outgoing_connections().await;
    }
}
