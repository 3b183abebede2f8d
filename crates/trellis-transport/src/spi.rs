//! Transport service provider interface.
//!
//! Concrete transports (the in-process virtual transport, socket-based
//! implementations) are interchangeable behind these traits. A connection is
//! not necessarily 1:1 with a physical socket; duplex-capable transports
//! synthesize the reverse-direction connection instead of opening a second
//! physical channel.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use trellis_model::{CommResult, NetworkContactPoint, NetworkRequest, NetworkResponse, NodeId,
    NodeInformation};

use crate::server::ServerContactPoint;

/// Exactly-once delivery outcome for a single sent request.
///
/// Carried over a oneshot sender; move semantics guarantee that a request
/// resolves exactly once -- either with a response or with a broken-connection
/// notification (never both, never twice).
#[derive(Debug)]
pub enum RawDelivery {
    Response(NetworkResponse),
    /// The connection was closed or broke before the request could complete.
    /// Carries the request back so the caller can synthesize a failure
    /// response instead of stalling.
    ConnectionBroken { request: NetworkRequest },
}

/// Transport-level responder handle for one request.
pub type RawResponder = oneshot::Sender<RawDelivery>;

/// A live request/response channel to one remote node.
pub trait NetworkConnection: Send + Sync {
    /// Unique per process; set exactly once at creation.
    fn connection_id(&self) -> &str;

    /// Node information received from the remote side during the handshake.
    fn remote_node_information(&self) -> &NodeInformation;

    /// True for connections synthesized on behalf of the remote initiator.
    fn initiated_by_remote(&self) -> bool;

    /// Enqueue a request. Must not block past enqueueing; the outcome
    /// arrives later through `responder`. Sending on a closed connection
    /// resolves with `RawDelivery::ConnectionBroken`, never a synchronous
    /// error or a hang. The timeout is advisory at this layer.
    fn send_request(&self, request: NetworkRequest, responder: RawResponder, timeout: Duration);

    /// Close the connection. Idempotent; further sends resolve through the
    /// broken-connection path.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Per-node handler for everything a transport delivers inbound.
#[async_trait]
pub trait ConnectionEndpointHandler: Send + Sync {
    /// Handshake: receive the initiator's self-description, answer with the
    /// local node's. Called synchronously inside `connect`.
    fn exchange_node_information(&self, peer: NodeInformation) -> NodeInformation;

    /// A duplex-capable transport synthesized a remote-initiated connection
    /// for this node.
    fn on_remote_initiated_connection(
        &self,
        connection: Arc<dyn NetworkConnection>,
        scp: &Arc<ServerContactPoint>,
    );

    /// A request arrived over some connection; produce the response.
    async fn on_raw_request_received(
        &self,
        request: NetworkRequest,
        source: NodeId,
    ) -> NetworkResponse;
}

/// Listener for connections that break outside a send (e.g. detected by a
/// transport's own keepalive).
pub trait BrokenConnectionListener: Send + Sync {
    fn on_connection_broken(&self, connection: Arc<dyn NetworkConnection>);
}

/// Pluggable transport strategy.
#[async_trait]
pub trait TransportProvider: Send + Sync {
    fn transport_id(&self) -> &str;

    /// Open a connection to `ncp`. Performs the node-information handshake
    /// before returning; failure (no listener, explicit rejection) surfaces
    /// as a communication error, not a generic I/O error. If duplex is
    /// allowed and supported, a mirror-image remote-initiated connection is
    /// delivered to the *remote* endpoint handler before this returns.
    async fn connect(
        &self,
        ncp: &NetworkContactPoint,
        own_information: NodeInformation,
        allow_duplex: bool,
        own_endpoint_handler: Arc<dyn ConnectionEndpointHandler>,
        broken_connection_listener: Arc<dyn BrokenConnectionListener>,
    ) -> CommResult<Arc<dyn NetworkConnection>>;

    fn supports_remote_initiated_connections(&self) -> bool;

    /// Start accepting connections at the SCP's contact point.
    fn start_server(&self, scp: &Arc<ServerContactPoint>) -> CommResult<()>;

    /// Stop accepting connections. Whether established connections are
    /// actively closed is transport-specific.
    fn stop_server(&self, scp: &Arc<ServerContactPoint>);
}
