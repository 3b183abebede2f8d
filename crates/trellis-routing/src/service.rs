//! Routed request/response on top of the link-state protocol.
//!
//! Installs the routing-related entries of the request handler chain: LSA
//! messages feed the protocol manager, routed messages are either dispatched
//! to the local payload handler (at the destination) or forwarded along the
//! next hop of the shortest path.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use trellis_model::{
    ids, metadata, CommResult, CommunicationError, MetaData, NetworkRequest, NetworkResponse,
    NodeId,
};
use trellis_transport::{ConnectionService, RequestHandler};

use crate::lsa::LsaMessage;
use crate::protocol::LinkStateRoutingManager;

/// Application-level handler for routed payloads arriving at their
/// destination. Errors become EXCEPTION_AT_DESTINATION responses.
#[async_trait]
pub trait RequestPayloadHandler: Send + Sync {
    async fn handle_request_payload(&self, payload: &[u8], sender: &NodeId) -> CommResult<Vec<u8>>;
}

/// A routed message as seen by this node's destination handler; kept in a
/// bounded buffer for diagnostics and tests.
#[derive(Debug, Clone)]
pub struct BufferedMessage {
    pub message_id: String,
    pub content: Vec<u8>,
    pub sender: Option<NodeId>,
}

/// Routed messaging service for one node.
pub struct RoutingService {
    connection_service: Arc<ConnectionService>,
    manager: Arc<LinkStateRoutingManager>,
    payload_handler: Arc<dyn RequestPayloadHandler>,
    message_buffer: Mutex<VecDeque<BufferedMessage>>,
}

impl RoutingService {
    /// Build the service and install its handlers and the manager's
    /// connection listener on the connection service.
    pub fn register(
        connection_service: Arc<ConnectionService>,
        manager: Arc<LinkStateRoutingManager>,
        payload_handler: Arc<dyn RequestPayloadHandler>,
    ) -> Arc<Self> {
        let service = Arc::new(Self {
            connection_service: connection_service.clone(),
            manager: manager.clone(),
            payload_handler,
            message_buffer: Mutex::new(VecDeque::new()),
        });
        connection_service.add_connection_listener(manager.clone());
        connection_service.add_request_handler(Arc::new(LsaRequestHandler { manager }));
        connection_service.add_request_handler(Arc::new(RoutedRequestHandler {
            service: Arc::downgrade(&service),
        }));
        service
    }

    pub fn manager(&self) -> &Arc<LinkStateRoutingManager> {
        &self.manager
    }

    pub fn own_node_id(&self) -> NodeId {
        self.manager.own_node_id()
    }

    /// Send a payload to `receiver`, routed hop by hop, and wait for the
    /// response. The response's request id always matches the sent request.
    pub async fn perform_routed_request(
        &self,
        payload: Vec<u8>,
        receiver: &NodeId,
        timeout: Duration,
    ) -> NetworkResponse {
        let mut md = MetaData::routed_message();
        md.set_sender(self.connection_service.own_node_id());
        md.set_receiver(receiver);
        md.set_message_id(&ids::random_id());
        md.add_trace_item(self.own_node_id().as_str());
        let request = NetworkRequest::new(payload, md);

        if receiver == &self.own_node_id() {
            return self.dispatch_at_destination(&request).await;
        }
        self.forward_towards_destination(&request, timeout).await
    }

    /// Nodes this node can currently route to (including itself).
    pub fn get_reachable_nodes(&self, restrict_to_workflow_hosts_and_self: bool) -> Vec<NodeId> {
        let own = self.own_node_id();
        self.manager
            .reachable_node_ids()
            .into_iter()
            .filter(|id| {
                if !restrict_to_workflow_hosts_and_self || id == &own {
                    return true;
                }
                self.manager
                    .node_snapshot(id)
                    .is_some_and(|node| node.is_workflow_host)
            })
            .collect()
    }

    /// Look up a buffered routed message by its message id (test support).
    pub fn message_received_by_id(&self, message_id: &str) -> Option<BufferedMessage> {
        self.message_buffer
            .lock()
            .expect("buffer lock")
            .iter()
            .find(|m| m.message_id == message_id)
            .cloned()
    }

    /// The content bytes of the most recently buffered routed message.
    pub fn last_message_content(&self) -> Option<Vec<u8>> {
        self.message_buffer
            .lock()
            .expect("buffer lock")
            .back()
            .map(|m| m.content.clone())
    }

    fn buffer_message(&self, request: &NetworkRequest) {
        let mut buffer = self.message_buffer.lock().expect("buffer lock");
        buffer.push_back(BufferedMessage {
            message_id: request
                .metadata()
                .message_id()
                .unwrap_or(request.request_id())
                .to_string(),
            content: request.content().to_vec(),
            sender: request.metadata().sender(),
        });
        let cap = self.connection_service.params().message_buffer_size;
        while buffer.len() > cap {
            buffer.pop_front();
        }
    }

    /// The request has arrived at its destination: hand the payload to the
    /// application handler.
    async fn dispatch_at_destination(&self, request: &NetworkRequest) -> NetworkResponse {
        self.buffer_message(request);
        let sender = request
            .metadata()
            .sender()
            .unwrap_or_else(|| self.own_node_id());
        match self
            .payload_handler
            .handle_request_payload(request.content(), &sender)
            .await
        {
            Ok(body) => NetworkResponse::success(request, body),
            Err(e) => {
                tracing::warn!(
                    request_id = request.request_id(),
                    error = %e,
                    "payload handler failed at destination"
                );
                NetworkResponse::exception_at_destination(request, &e.to_string())
            }
        }
    }

    /// Forward a routed request one hop towards its receiver and remap the
    /// eventual response onto the original request id.
    async fn forward_towards_destination(
        &self,
        request: &NetworkRequest,
        timeout: Duration,
    ) -> NetworkResponse {
        let own = self.own_node_id();
        let Some(receiver) = request.metadata().receiver() else {
            return NetworkResponse::exception_while_forwarding(
                request,
                own.as_str(),
                "routed request without receiver metadata",
            );
        };

        let Some(connection) = self.manager.next_hop_connection(&receiver) else {
            tracing::warn!(
                %receiver,
                request_id = request.request_id(),
                "no route to receiver"
            );
            return NetworkResponse::no_matching_handler(request);
        };

        // fresh request id per hop; the response is remapped below
        let mut forwarded = request.forwarded_copy();
        let hop_count = forwarded.metadata_mut().increment_hop_count();
        if hop_count >= self.connection_service.params().max_hop_count {
            return NetworkResponse::exception_while_forwarding(
                request,
                own.as_str(),
                &format!("hop count {hop_count} reached the ceiling"),
            );
        }
        forwarded.metadata_mut().add_trace_item(own.as_str());

        let response = self
            .connection_service
            .send_prepared_and_wait(forwarded, &connection, timeout)
            .await;
        NetworkResponse::new(
            response.content().to_vec(),
            request.request_id(),
            response.result_code(),
        )
    }
}

/// Handler-chain entry for LSA messages (category=routing, topic=lsa).
struct LsaRequestHandler {
    manager: Arc<LinkStateRoutingManager>,
}

#[async_trait]
impl RequestHandler for LsaRequestHandler {
    fn is_applicable(&self, request: &NetworkRequest) -> bool {
        request.metadata().category() == Some(metadata::CATEGORY_ROUTING)
            && request.metadata().topic() == Some(metadata::TOPIC_LSA)
    }

    async fn handle_request(
        &self,
        request: &NetworkRequest,
        source: &NodeId,
    ) -> CommResult<NetworkResponse> {
        match request.deserialize_content::<LsaMessage>()? {
            LsaMessage::Single(lsa) => {
                self.manager.handle_lsa(lsa, request.metadata()).await;
                Ok(NetworkResponse::success(request, Vec::new()))
            }
            LsaMessage::Batch(batch) => {
                let reply = self.manager.handle_lsa_batch(batch, source).await;
                Ok(NetworkResponse::success(
                    request,
                    serde_json::to_vec(&LsaMessage::Batch(reply))?,
                ))
            }
        }
    }
}

/// Handler-chain entry for routed messages (topic=routed).
struct RoutedRequestHandler {
    service: Weak<RoutingService>,
}

#[async_trait]
impl RequestHandler for RoutedRequestHandler {
    fn is_applicable(&self, request: &NetworkRequest) -> bool {
        request.metadata().category() == Some(metadata::CATEGORY_ROUTING)
            && request.metadata().topic() == Some(metadata::TOPIC_ROUTED)
    }

    async fn handle_request(
        &self,
        request: &NetworkRequest,
        _source: &NodeId,
    ) -> CommResult<NetworkResponse> {
        let service = self
            .service
            .upgrade()
            .ok_or_else(|| CommunicationError::could_not_connect("routing service shut down"))?;

        if request.metadata().receiver().as_ref() == Some(&service.own_node_id()) {
            Ok(service.dispatch_at_destination(request).await)
        } else {
            let timeout = service.connection_service.params().forwarding_timeout();
            Ok(service.forward_towards_destination(request, timeout).await)
        }
    }
}
