//! Assembly of one platform node.
//!
//! `PlatformNode` builds the whole stack -- connection service, routing,
//! callback services, facade, management -- with every collaborator passed
//! in explicitly, and owns the node's background tasks.

use std::sync::{Arc, Mutex};

use trellis_callback::{
    spawn_sweep_task, CallbackObject, CallbackProxy, CallbackProxyService, CallbackService,
    RemoteCallSender,
};
use trellis_model::{
    CommResult, NetworkContactPoint, NodeId, NodeInformation, NodeInformationRegistry,
};
use trellis_routing::{LinkStateRoutingManager, RoutingService};
use trellis_transport::{ConnectionService, ServerContactPoint, TransportProvider};

use crate::communication::CommunicationService;
use crate::config::NodeConfig;
use crate::management::ManagementService;
use crate::payload::{PlatformPayloadHandler, RoutedRemoteCallSender};
use crate::registry::ServiceRegistry;

pub struct PlatformNode {
    config: NodeConfig,
    information: NodeInformation,
    node_registry: Arc<NodeInformationRegistry>,
    connection_service: Arc<ConnectionService>,
    manager: Arc<LinkStateRoutingManager>,
    routing_service: Arc<RoutingService>,
    callback_service: Arc<CallbackService>,
    proxy_service: Arc<CallbackProxyService>,
    payload_handler: Arc<PlatformPayloadHandler>,
    remote_sender: Arc<dyn RemoteCallSender>,
    service_registry: Arc<ServiceRegistry>,
    communication_service: Arc<CommunicationService>,
    management: Arc<ManagementService>,
    servers: Mutex<Vec<Arc<ServerContactPoint>>>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl PlatformNode {
    /// Wire up a node from its configuration and a transport. Nothing is
    /// started yet; call `start` to bind servers and connect peers.
    pub fn new(config: NodeConfig, transport: Arc<dyn TransportProvider>) -> CommResult<Arc<Self>> {
        let params = config.params();
        let information = NodeInformation::new(
            NodeId::random(),
            config.node.name.clone(),
            config.node.is_workflow_host,
        );
        tracing::info!(
            node = %information.log_description(),
            workflow_host = information.is_workflow_host,
            "assembling platform node"
        );

        let node_registry = NodeInformationRegistry::new();
        let connection_service =
            ConnectionService::new(information.clone(), params, node_registry.clone());
        connection_service.register_transport(transport)?;

        let callback_service = CallbackService::new(params.callback_ttl());
        let proxy_service = CallbackProxyService::new(params.callback_ttl());
        let payload_handler =
            PlatformPayloadHandler::new(callback_service.clone(), proxy_service.clone());

        let manager = LinkStateRoutingManager::new(connection_service.clone());
        let routing_service = RoutingService::register(
            connection_service.clone(),
            manager.clone(),
            payload_handler.clone(),
        );

        let remote_sender: Arc<dyn RemoteCallSender> =
            RoutedRemoteCallSender::new(routing_service.clone(), params.request_timeout());

        let service_registry = ServiceRegistry::new();
        let communication_service = CommunicationService::new(
            connection_service.clone(),
            routing_service.clone(),
            service_registry.clone(),
        );
        let management = ManagementService::new(
            connection_service.clone(),
            manager.clone(),
            config.network.initial_peers.clone(),
        );

        Ok(Arc::new(Self {
            config,
            information,
            node_registry,
            connection_service,
            manager,
            routing_service,
            callback_service,
            proxy_service,
            payload_handler,
            remote_sender,
            service_registry,
            communication_service,
            management,
            servers: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
        }))
    }

    /// Bind the configured servers, connect the initial peers, and spawn
    /// the periodic background tasks.
    pub async fn start(&self) -> CommResult<()> {
        for contact_point in &self.config.network.server_contact_points {
            let ncp: NetworkContactPoint = contact_point.parse()?;
            let scp = self.connection_service.start_server(ncp)?;
            tracing::info!(scp = %scp, "server started");
            self.servers.lock().expect("servers lock").push(scp);
        }

        let connected = self.management.connect_to_initial_peers().await;
        if !self.config.network.initial_peers.is_empty() {
            tracing::info!(
                connected,
                configured = self.config.network.initial_peers.len(),
                "initial peer connections"
            );
        }

        let params = self.config.params();
        let mut tasks = self.tasks.lock().expect("tasks lock");
        tasks.push(spawn_sweep_task(
            &self.callback_service,
            &self.proxy_service,
            self.remote_sender.clone(),
            params.callback_sweep_interval(),
        ));
        if self.config.network.health_check {
            tasks.push(self.connection_service.spawn_health_check_task());
        }
        Ok(())
    }

    /// Announce shutdown, stop background tasks, close connections and
    /// stop the servers.
    pub async fn shutdown(&self) {
        tracing::info!(node = %self.information.log_description(), "shutting down");
        self.management.announce_shutdown_and_close().await;
        for task in self.tasks.lock().expect("tasks lock").drain(..) {
            task.abort();
        }
        for scp in self.servers.lock().expect("servers lock").drain(..) {
            scp.shut_down();
        }
    }

    /// Create (and track) a proxy for an object owned by `owner`.
    pub fn create_callback_proxy(
        &self,
        object_identifier: &str,
        owner: NodeId,
    ) -> Arc<CallbackProxy> {
        let proxy = CallbackProxy::new(object_identifier, owner, self.remote_sender.clone());
        self.proxy_service.register_proxy(&proxy);
        proxy
    }

    /// Register a local object for remote invocation and return its id.
    pub fn add_callback_object(
        &self,
        object: &Arc<dyn CallbackObject>,
        proxy_holder: NodeId,
    ) -> String {
        self.callback_service.add_callback_object(object, proxy_holder)
    }

    pub fn node_id(&self) -> &NodeId {
        &self.information.node_id
    }

    pub fn information(&self) -> &NodeInformation {
        &self.information
    }

    pub fn node_information_registry(&self) -> &Arc<NodeInformationRegistry> {
        &self.node_registry
    }

    pub fn connection_service(&self) -> &Arc<ConnectionService> {
        &self.connection_service
    }

    pub fn routing_manager(&self) -> &Arc<LinkStateRoutingManager> {
        &self.manager
    }

    pub fn routing_service(&self) -> &Arc<RoutingService> {
        &self.routing_service
    }

    pub fn callback_service(&self) -> &Arc<CallbackService> {
        &self.callback_service
    }

    pub fn callback_proxy_service(&self) -> &Arc<CallbackProxyService> {
        &self.proxy_service
    }

    pub fn payload_handler(&self) -> &Arc<PlatformPayloadHandler> {
        &self.payload_handler
    }

    pub fn remote_call_sender(&self) -> &Arc<dyn RemoteCallSender> {
        &self.remote_sender
    }

    pub fn service_registry(&self) -> &Arc<ServiceRegistry> {
        &self.service_registry
    }

    pub fn communication_service(&self) -> &Arc<CommunicationService> {
        &self.communication_service
    }

    pub fn management(&self) -> &Arc<ManagementService> {
        &self.management
    }
}
