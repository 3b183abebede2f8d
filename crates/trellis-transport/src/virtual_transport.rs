//! In-process "virtual" transport -- the reference transport implementation.
//!
//! One shared `VirtualTransport` instance plays the role of the network for
//! a set of in-process nodes. Payloads are detach-cloned on every crossing
//! so sender- and receiver-side buffers never alias, substituting for a
//! real serialization boundary.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use trellis_model::{
    ids, CommResult, CommunicationError, NetworkContactPoint, NetworkRequest, NodeInformation,
};

use crate::server::ServerContactPoint;
use crate::spi::{
    BrokenConnectionListener, ConnectionEndpointHandler, NetworkConnection, RawDelivery,
    RawResponder, TransportProvider,
};

/// The transport id of this provider.
pub const VIRTUAL_TRANSPORT_ID: &str = "virtual";

/// In-process pseudo transport. Intended for conformance testing and
/// single-process meshes; all "remote" endpoints live in the same process.
pub struct VirtualTransport {
    servers: Mutex<HashMap<NetworkContactPoint, Arc<ServerContactPoint>>>,
    support_remote_initiated: bool,
}

impl VirtualTransport {
    /// Create a shared virtual network. `support_remote_initiated` controls
    /// whether duplex (passive reverse connections) is simulated.
    pub fn new(support_remote_initiated: bool) -> Arc<Self> {
        Arc::new(Self {
            servers: Mutex::new(HashMap::new()),
            support_remote_initiated,
        })
    }
}

#[async_trait]
impl TransportProvider for VirtualTransport {
    fn transport_id(&self) -> &str {
        VIRTUAL_TRANSPORT_ID
    }

    async fn connect(
        &self,
        ncp: &NetworkContactPoint,
        own_information: NodeInformation,
        allow_duplex: bool,
        own_endpoint_handler: Arc<dyn ConnectionEndpointHandler>,
        _broken_connection_listener: Arc<dyn BrokenConnectionListener>,
    ) -> CommResult<Arc<dyn NetworkConnection>> {
        let receiving_scp = {
            let servers = self.servers.lock().expect("servers lock");
            servers.get(ncp).cloned()
        }
        .ok_or_else(|| {
            CommunicationError::could_not_connect(format!("no server listening at '{ncp}'"))
        })?;

        if !receiving_scp.is_accepting_messages() {
            // remote server was shut down or is simulating a crash
            return Err(CommunicationError::could_not_connect(format!(
                "server at '{ncp}' is not accepting messages"
            )));
        }

        let receiving_handler = receiving_scp.endpoint_handler().clone();

        // synchronous handshake: exchange node information before returning
        let receiving_information =
            receiving_handler.exchange_node_information(own_information.clone());

        let active_connection = Arc::new(VirtualConnection {
            connection_id: ids::random_id_with_prefix("vconn-a"),
            own_information: own_information.clone(),
            remote_information: receiving_information.clone(),
            remote_handler: receiving_handler.clone(),
            remote_scp: receiving_scp.clone(),
            initiated_by_remote: false,
            closed: AtomicBool::new(false),
        });

        if allow_duplex && self.support_remote_initiated {
            // mirror-image connection for the reverse direction, owned by
            // the receiving node; avoids a second physical connection
            let passive_connection = Arc::new(VirtualConnection {
                connection_id: ids::random_id_with_prefix("vconn-p"),
                own_information: receiving_information,
                remote_information: own_information,
                remote_handler: own_endpoint_handler,
                remote_scp: receiving_scp.clone(),
                initiated_by_remote: true,
                closed: AtomicBool::new(false),
            });
            receiving_handler
                .on_remote_initiated_connection(passive_connection, &receiving_scp);
        }

        Ok(active_connection)
    }

    fn supports_remote_initiated_connections(&self) -> bool {
        self.support_remote_initiated
    }

    fn start_server(&self, scp: &Arc<ServerContactPoint>) -> CommResult<()> {
        let mut servers = self.servers.lock().expect("servers lock");
        let ncp = scp.network_contact_point().clone();
        if servers.contains_key(&ncp) {
            return Err(CommunicationError::could_not_connect(format!(
                "a server is already listening at '{ncp}'"
            )));
        }
        servers.insert(ncp, scp.clone());
        scp.set_accepting_messages(true);
        Ok(())
    }

    fn stop_server(&self, scp: &Arc<ServerContactPoint>) {
        scp.set_accepting_messages(false);
        let mut servers = self.servers.lock().expect("servers lock");
        if servers.remove(scp.network_contact_point()).is_none() {
            tracing::warn!(scp = %scp, "stop_server: no matching SCP registered");
        }
    }
}

/// A virtual connection: forwards detached request clones to the remote
/// endpoint handler on a worker task and delivers detached response clones.
struct VirtualConnection {
    connection_id: String,
    own_information: NodeInformation,
    remote_information: NodeInformation,
    remote_handler: Arc<dyn ConnectionEndpointHandler>,
    remote_scp: Arc<ServerContactPoint>,
    initiated_by_remote: bool,
    closed: AtomicBool,
}

impl NetworkConnection for VirtualConnection {
    fn connection_id(&self) -> &str {
        &self.connection_id
    }

    fn remote_node_information(&self) -> &NodeInformation {
        &self.remote_information
    }

    fn initiated_by_remote(&self) -> bool {
        self.initiated_by_remote
    }

    fn send_request(&self, request: NetworkRequest, responder: RawResponder, _timeout: Duration) {
        let closed = self.closed.load(Ordering::SeqCst);
        let accepting = self.remote_scp.is_accepting_messages();
        let sender_id = self.own_information.node_id.clone();
        let handler = self.remote_handler.clone();

        tokio::spawn(async move {
            if closed || !accepting {
                // resolve through the broken-connection path instead of
                // throwing, so the caller cannot stall on a response that
                // will never come
                let _ = responder.send(RawDelivery::ConnectionBroken { request });
                return;
            }

            // detached clones on both crossings: no aliasing between
            // sender-side and receiver-side buffers
            let detached_request = request.detached_clone();
            let response = handler
                .on_raw_request_received(detached_request, sender_id)
                .await;
            let _ = responder.send(RawDelivery::Response(response.detached_clone()));
        });
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!(
                connection_id = %self.connection_id,
                remote = %self.remote_information.log_description(),
                "closing connection"
            );
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
