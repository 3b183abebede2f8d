//! Connection service -- transport registry and request/response engine.
//!
//! Owns all outgoing connections of a node, stamps request ids, and
//! guarantees exactly one response delivery per request: transport-level
//! broken-connection events and dropped responders are converted into
//! synthesized failure responses instead of hangs or silent drops.

use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::oneshot;

use trellis_model::{
    metadata, CommResult, CommunicationError, MetaData, NetworkContactPoint, NetworkRequest,
    NetworkResponse, NodeId, NodeInformation, NodeInformationRegistry, ProtocolParams,
};

use crate::server::ServerContactPoint;
use crate::spi::{
    BrokenConnectionListener, ConnectionEndpointHandler, NetworkConnection, RawDelivery,
    TransportProvider,
};

/// Listener for outgoing connection lifecycle events (the routing layer
/// registers one to keep its topology in sync).
#[async_trait]
pub trait ConnectionListener: Send + Sync {
    async fn on_outgoing_connection_established(&self, connection: Arc<dyn NetworkConnection>);
    async fn on_outgoing_connection_terminated(&self, connection: Arc<dyn NetworkConnection>);
}

/// One entry in the inbound request handler chain. The first applicable
/// handler wins; a request no handler accepts yields NO_MATCHING_HANDLER.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    fn is_applicable(&self, request: &NetworkRequest) -> bool;
    async fn handle_request(
        &self,
        request: &NetworkRequest,
        source: &NodeId,
    ) -> CommResult<NetworkResponse>;
}

/// Transport registry plus request/response engine for one node.
pub struct ConnectionService {
    own_information: NodeInformation,
    params: ProtocolParams,
    node_registry: Arc<NodeInformationRegistry>,
    transports: Mutex<HashMap<String, Arc<dyn TransportProvider>>>,
    connection_listeners: Mutex<Vec<Arc<dyn ConnectionListener>>>,
    request_handlers: Mutex<Vec<Arc<dyn RequestHandler>>>,
    outgoing_connections: Mutex<HashMap<String, Arc<dyn NetworkConnection>>>,
    health_check_failures: Mutex<HashMap<String, u32>>,
    weak_self: Weak<ConnectionService>,
}

impl ConnectionService {
    pub fn new(
        own_information: NodeInformation,
        params: ProtocolParams,
        node_registry: Arc<NodeInformationRegistry>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            own_information,
            params,
            node_registry,
            transports: Mutex::new(HashMap::new()),
            connection_listeners: Mutex::new(Vec::new()),
            request_handlers: Mutex::new(Vec::new()),
            outgoing_connections: Mutex::new(HashMap::new()),
            health_check_failures: Mutex::new(HashMap::new()),
            weak_self: weak_self.clone(),
        })
    }

    pub fn own_information(&self) -> &NodeInformation {
        &self.own_information
    }

    pub fn own_node_id(&self) -> &NodeId {
        &self.own_information.node_id
    }

    pub fn params(&self) -> &ProtocolParams {
        &self.params
    }

    /// The handler given to transports for everything arriving inbound.
    pub fn endpoint_handler(self: &Arc<Self>) -> Arc<dyn ConnectionEndpointHandler> {
        Arc::new(EndpointHandlerImpl {
            service: Arc::downgrade(self),
        })
    }

    fn broken_connection_listener(self: &Arc<Self>) -> Arc<dyn BrokenConnectionListener> {
        Arc::new(BrokenListenerImpl {
            service: Arc::downgrade(self),
        })
    }

    /// Register a transport provider. Duplicate transport ids are an error.
    pub fn register_transport(&self, provider: Arc<dyn TransportProvider>) -> CommResult<()> {
        let id = provider.transport_id().to_string();
        let mut transports = self.transports.lock().expect("transports lock");
        if transports.contains_key(&id) {
            return Err(CommunicationError::could_not_connect(format!(
                "duplicate transport registration for id '{id}'"
            )));
        }
        tracing::info!(transport_id = %id, "registered transport provider");
        transports.insert(id, provider);
        Ok(())
    }

    fn transport_for(&self, transport_id: &str) -> CommResult<Arc<dyn TransportProvider>> {
        self.transports
            .lock()
            .expect("transports lock")
            .get(transport_id)
            .cloned()
            .ok_or_else(|| CommunicationError::UnknownTransport(transport_id.to_string()))
    }

    pub fn add_connection_listener(&self, listener: Arc<dyn ConnectionListener>) {
        self.connection_listeners
            .lock()
            .expect("listeners lock")
            .push(listener);
    }

    pub fn add_request_handler(&self, handler: Arc<dyn RequestHandler>) {
        self.request_handlers
            .lock()
            .expect("handlers lock")
            .push(handler);
    }

    /// Open an outgoing connection. Blocks (asynchronously) until the
    /// handshake completes; the returned connection is immediately usable.
    pub async fn connect(
        self: &Arc<Self>,
        ncp: &NetworkContactPoint,
        allow_duplex: bool,
    ) -> CommResult<Arc<dyn NetworkConnection>> {
        let provider = self.transport_for(&ncp.transport_id)?;
        let connection = provider
            .connect(
                ncp,
                self.own_information.clone(),
                allow_duplex,
                self.endpoint_handler(),
                self.broken_connection_listener(),
            )
            .await
            .inspect_err(|e| {
                tracing::warn!(ncp = %ncp, error = %e, "failed to connect");
            })?;

        self.node_registry
            .update_from(connection.remote_node_information());
        self.register_outgoing_connection(connection.clone()).await;
        tracing::debug!(
            connection_id = connection.connection_id(),
            remote = %connection.remote_node_information().log_description(),
            %ncp,
            "connection established"
        );
        Ok(connection)
    }

    /// Start a server at the given contact point.
    pub fn start_server(self: &Arc<Self>, ncp: NetworkContactPoint) -> CommResult<Arc<ServerContactPoint>> {
        let provider = self.transport_for(&ncp.transport_id)?;
        let scp = ServerContactPoint::new(provider, ncp, self.endpoint_handler());
        scp.start()?;
        Ok(scp)
    }

    async fn register_outgoing_connection(&self, connection: Arc<dyn NetworkConnection>) {
        {
            let mut outgoing = self.outgoing_connections.lock().expect("outgoing lock");
            outgoing.insert(connection.connection_id().to_string(), connection.clone());
        }
        let listeners: Vec<_> = self
            .connection_listeners
            .lock()
            .expect("listeners lock")
            .clone();
        for listener in listeners {
            listener
                .on_outgoing_connection_established(connection.clone())
                .await;
        }
    }

    /// Close + unregister a connection and notify listeners. Used both for
    /// deliberate closes and broken connections; idempotent per connection.
    pub async fn close_connection(&self, connection: &Arc<dyn NetworkConnection>) {
        connection.close();
        let removed = {
            let mut outgoing = self.outgoing_connections.lock().expect("outgoing lock");
            outgoing.remove(connection.connection_id())
        };
        if removed.is_none() {
            return;
        }
        self.health_check_failures
            .lock()
            .expect("health lock")
            .remove(connection.connection_id());
        let listeners: Vec<_> = self
            .connection_listeners
            .lock()
            .expect("listeners lock")
            .clone();
        for listener in listeners {
            listener
                .on_outgoing_connection_terminated(connection.clone())
                .await;
        }
    }

    async fn handle_broken_connection(&self, connection: &Arc<dyn NetworkConnection>) {
        tracing::warn!(
            connection_id = connection.connection_id(),
            remote = %connection.remote_node_information().log_description(),
            "connection broken, closing"
        );
        self.close_connection(connection).await;
    }

    /// Close every outgoing connection (shutdown path).
    pub async fn close_all_outgoing_connections(&self) {
        let connections: Vec<_> = {
            let outgoing = self.outgoing_connections.lock().expect("outgoing lock");
            outgoing.values().cloned().collect()
        };
        for connection in connections {
            self.close_connection(&connection).await;
        }
    }

    pub fn outgoing_connection_count(&self) -> usize {
        self.outgoing_connections.lock().expect("outgoing lock").len()
    }

    /// Send a request over a connection. Returns a receiver that is
    /// guaranteed to yield exactly one response: the remote answer, or a
    /// synthesized EXCEPTION_WHILE_FORWARDING failure if the connection
    /// breaks or the transport drops the delivery.
    pub fn send_request(
        &self,
        payload: Vec<u8>,
        metadata: MetaData,
        connection: &Arc<dyn NetworkConnection>,
    ) -> oneshot::Receiver<NetworkResponse> {
        let request = NetworkRequest::new(payload, metadata);
        self.send_prepared_request(request, connection)
    }

    /// Send an already-constructed request (used when forwarding preserves
    /// metadata such as hop counts).
    pub fn send_prepared_request(
        &self,
        request: NetworkRequest,
        connection: &Arc<dyn NetworkConnection>,
    ) -> oneshot::Receiver<NetworkResponse> {
        let (outer_tx, outer_rx) = oneshot::channel();
        let (raw_tx, raw_rx) = oneshot::channel();

        let request_id = request.request_id().to_string();
        let own_id = self.own_node_id().clone();
        let service = self.weak_self.clone();
        let connection = connection.clone();

        connection.send_request(request, raw_tx, self.params.request_timeout());

        tokio::spawn(async move {
            let response = match raw_rx.await {
                Ok(RawDelivery::Response(response)) => response,
                Ok(RawDelivery::ConnectionBroken { request }) => {
                    if let Some(service) = service.upgrade() {
                        service.handle_broken_connection(&connection).await;
                    }
                    NetworkResponse::exception_while_forwarding(
                        &request,
                        own_id.as_str(),
                        &format!(
                            "connection '{}' was broken and has been closed",
                            connection.connection_id()
                        ),
                    )
                }
                // Responder dropped without a delivery (e.g. a panicking
                // transport task); still owe the caller a response.
                Err(_) => NetworkResponse::new(
                    format!("request '{request_id}' was dropped by the transport").into_bytes(),
                    &request_id,
                    trellis_model::ResultCode::ExceptionWhileForwarding,
                ),
            };
            let _ = outer_tx.send(response);
        });

        outer_rx
    }

    /// Send and wait, enforcing the timeout on the caller side. A timeout
    /// synthesizes a forwarding failure; the transport cannot cancel remote
    /// processing.
    pub async fn send_request_and_wait(
        &self,
        payload: Vec<u8>,
        metadata: MetaData,
        connection: &Arc<dyn NetworkConnection>,
        timeout: Duration,
    ) -> NetworkResponse {
        let request = NetworkRequest::new(payload, metadata);
        self.send_prepared_and_wait(request, connection, timeout).await
    }

    /// `send_request_and_wait` for an already-constructed request.
    pub async fn send_prepared_and_wait(
        &self,
        request: NetworkRequest,
        connection: &Arc<dyn NetworkConnection>,
        timeout: Duration,
    ) -> NetworkResponse {
        let request_id = request.request_id().to_string();
        let receiver = self.send_prepared_request(request, connection);
        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(response)) => response,
            // Inner error cannot happen (the engine always sends), but map
            // it the same way as a timeout rather than panicking.
            Ok(Err(_)) | Err(_) => NetworkResponse::new(
                format!("no response for request '{request_id}' within {timeout:?}").into_bytes(),
                &request_id,
                trellis_model::ResultCode::ExceptionWhileForwarding,
            ),
        }
    }

    /// Run one round of health checks over all outgoing connections, each
    /// delayed by a random jitter so checks never fire in lockstep.
    pub async fn trigger_connection_health_checks(self: &Arc<Self>) {
        let connections: Vec<_> = {
            let outgoing = self.outgoing_connections.lock().expect("outgoing lock");
            outgoing.values().cloned().collect()
        };
        for connection in connections {
            let service = self.clone();
            tokio::spawn(async move {
                let jitter = rand::thread_rng()
                    .gen_range(0..service.params.health_check_max_jitter_msec);
                tokio::time::sleep(Duration::from_millis(jitter)).await;
                service.perform_health_check(&connection).await;
            });
        }
    }

    async fn perform_health_check(self: &Arc<Self>, connection: &Arc<dyn NetworkConnection>) {
        let token: u64 = rand::thread_rng().gen();
        let body = token.to_be_bytes().to_vec();
        let response = self
            .send_request_and_wait(
                body.clone(),
                MetaData::health_check(),
                connection,
                self.params.health_check_timeout(),
            )
            .await;
        let healthy = response.is_success() && response.content() == body.as_slice();

        let failures = {
            let mut map = self.health_check_failures.lock().expect("health lock");
            let counter = map.entry(connection.connection_id().to_string()).or_insert(0);
            if healthy {
                if *counter > 0 {
                    tracing::info!(
                        connection_id = connection.connection_id(),
                        previous_failures = *counter,
                        "connection recovered its health check"
                    );
                }
                *counter = 0;
            } else {
                *counter += 1;
                tracing::warn!(
                    connection_id = connection.connection_id(),
                    consecutive_failures = *counter,
                    "connection failed a health check"
                );
            }
            *counter
        };

        if failures >= self.params.health_check_failure_limit {
            self.handle_broken_connection(connection).await;
        }
    }

    /// Spawn the periodic health check task. Stops when the service is
    /// dropped or the returned handle is aborted.
    pub fn spawn_health_check_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let weak = self.weak_self.clone();
        let interval = self.params.health_check_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(service) => service.trigger_connection_health_checks().await,
                    None => break,
                }
            }
        })
    }
}

/// Inbound side of the connection service.
struct EndpointHandlerImpl {
    service: Weak<ConnectionService>,
}

#[async_trait]
impl ConnectionEndpointHandler for EndpointHandlerImpl {
    fn exchange_node_information(&self, peer: NodeInformation) -> NodeInformation {
        let service = self.service.upgrade().expect("service dropped mid-handshake");
        service.node_registry.update_from(&peer);
        service.own_information.clone()
    }

    fn on_remote_initiated_connection(
        &self,
        connection: Arc<dyn NetworkConnection>,
        scp: &Arc<ServerContactPoint>,
    ) {
        assert!(connection.initiated_by_remote(), "consistency error");
        let Some(service) = self.service.upgrade() else {
            return;
        };
        tracing::debug!(
            connection_id = connection.connection_id(),
            remote = %connection.remote_node_information().log_description(),
            scp = %scp,
            "remote-initiated connection established"
        );
        // registration fires the same listeners as a self-initiated connect
        tokio::spawn(async move {
            service.register_outgoing_connection(connection).await;
        });
    }

    async fn on_raw_request_received(
        &self,
        request: NetworkRequest,
        source: NodeId,
    ) -> NetworkResponse {
        let Some(service) = self.service.upgrade() else {
            return NetworkResponse::exception_while_forwarding(
                &request,
                "unknown",
                "receiving node is shutting down",
            );
        };

        // health checks are answered here directly: echo the body back
        if request.metadata().category() == Some(metadata::CATEGORY_HEALTH_CHECK) {
            return NetworkResponse::success(&request, request.content().to_vec());
        }

        let handler = {
            let handlers = service.request_handlers.lock().expect("handlers lock");
            handlers
                .iter()
                .find(|h| h.is_applicable(&request))
                .cloned()
        };

        match handler {
            Some(handler) => match handler.handle_request(&request, &source).await {
                Ok(response) => response,
                Err(e) => NetworkResponse::exception_while_forwarding(
                    &request,
                    service.own_node_id().as_str(),
                    &e.to_string(),
                ),
            },
            None => {
                tracing::warn!(
                    request_id = request.request_id(),
                    category = request.metadata().category().unwrap_or("-"),
                    topic = request.metadata().topic().unwrap_or("-"),
                    "no request handler matched, generating failure response"
                );
                NetworkResponse::no_matching_handler(&request)
            }
        }
    }
}

struct BrokenListenerImpl {
    service: Weak<ConnectionService>,
}

impl BrokenConnectionListener for BrokenListenerImpl {
    fn on_connection_broken(&self, connection: Arc<dyn NetworkConnection>) {
        if connection.initiated_by_remote() {
            tracing::warn!(
                connection_id = connection.connection_id(),
                "broken-connection event for remote-initiated connection, ignoring"
            );
            return;
        }
        let Some(service) = self.service.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            service.handle_broken_connection(&connection).await;
        });
    }
}
