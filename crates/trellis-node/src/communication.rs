//! The `CommunicationService` facade -- what the rest of the platform sees.
//!
//! Peer discovery, network state snapshots, local/remote service lookup and
//! runtime peer addition. Reads answer from a cache that is invalidated by
//! topology-change events; snapshots handed out never mutate afterwards.

use serde_json::Value;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

use trellis_model::{CommResult, CommunicationError, NetworkContactPoint, NodeId};
use trellis_routing::RoutingService;
use trellis_transport::ConnectionService;

use crate::payload::PlatformPayload;
use crate::registry::ServiceRegistry;

/// One node in a disconnected network state snapshot. Equality is by node
/// id, matching the topology's identity rules.
#[derive(Debug, Clone, Eq)]
pub struct NetworkStateNode {
    pub node_id: NodeId,
    pub display_name: String,
    pub is_local_node: bool,
    pub is_workflow_host: bool,
}

impl PartialEq for NetworkStateNode {
    fn eq(&self, other: &Self) -> bool {
        self.node_id == other.node_id
    }
}

impl Hash for NetworkStateNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.node_id.hash(state);
    }
}

/// Disconnected snapshot of the known network.
#[derive(Debug, Clone)]
pub struct NetworkStateModel {
    local_node: NodeId,
    nodes: HashMap<NodeId, NetworkStateNode>,
}

impl NetworkStateModel {
    pub fn local_node(&self) -> &NodeId {
        &self.local_node
    }

    pub fn node(&self, id: &NodeId) -> Option<&NetworkStateNode> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NetworkStateNode> {
        self.nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// Handle returned by `get_service`: a direct reference for the local node,
/// a forwarding proxy for remote nodes.
pub enum ServiceHandle<S> {
    Local(Arc<S>),
    Remote(RemoteServiceProxy),
}

impl<S> ServiceHandle<S> {
    pub fn is_local(&self) -> bool {
        matches!(self, ServiceHandle::Local(_))
    }
}

/// Value-level proxy for a service on a remote node; calls are forwarded as
/// routed `ServiceCall` payloads. Typed wrappers are the caller's concern.
pub struct RemoteServiceProxy {
    interface: String,
    target: NodeId,
    routing: Arc<RoutingService>,
    timeout: Duration,
}

impl RemoteServiceProxy {
    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn target(&self) -> &NodeId {
        &self.target
    }

    pub async fn call(&self, method: &str, args: Vec<Value>) -> CommResult<Value> {
        let payload = serde_json::to_vec(&PlatformPayload::ServiceCall {
            interface: self.interface.clone(),
            method: method.to_string(),
            args,
        })?;
        let response = self
            .routing
            .perform_routed_request(payload, &self.target, self.timeout)
            .await;
        if response.is_success() {
            Ok(serde_json::from_slice(response.content())?)
        } else {
            Err(CommunicationError::RemoteInvocation(format!(
                "'{}::{method}' on '{}' failed ({:?}): {}",
                self.interface,
                self.target,
                response.result_code(),
                String::from_utf8_lossy(response.content())
            )))
        }
    }
}

#[derive(Default)]
struct FacadeCache {
    version: Option<u64>,
    available_nodes: Option<Vec<NodeId>>,
    network_state: Option<Arc<NetworkStateModel>>,
}

/// Facade over the routing and registry layers for one node.
pub struct CommunicationService {
    connection_service: Arc<ConnectionService>,
    routing: Arc<RoutingService>,
    registry: Arc<ServiceRegistry>,
    topology_changes: watch::Receiver<u64>,
    cache: Mutex<FacadeCache>,
}

impl CommunicationService {
    pub fn new(
        connection_service: Arc<ConnectionService>,
        routing: Arc<RoutingService>,
        registry: Arc<ServiceRegistry>,
    ) -> Arc<Self> {
        let topology_changes = routing.manager().subscribe_topology_changes();
        Arc::new(Self {
            connection_service,
            routing,
            registry,
            topology_changes,
            cache: Mutex::new(FacadeCache::default()),
        })
    }

    fn own_node_id(&self) -> NodeId {
        self.connection_service.own_node_id().clone()
    }

    /// Ids of all currently reachable nodes. `force_refresh` bypasses the
    /// cache; otherwise the cache answers until the topology changes.
    pub fn get_available_nodes(&self, force_refresh: bool) -> Vec<NodeId> {
        let version = *self.topology_changes.borrow();
        let mut cache = self.cache.lock().expect("facade cache lock");
        let stale = cache.version != Some(version);
        if stale {
            cache.available_nodes = None;
            cache.network_state = None;
            cache.version = Some(version);
        }
        if force_refresh || cache.available_nodes.is_none() {
            let mut nodes = self.routing.get_reachable_nodes(false);
            nodes.sort();
            cache.available_nodes = Some(nodes);
        }
        cache.available_nodes.clone().expect("just populated")
    }

    /// Disconnected snapshot of the known network, cached until the
    /// topology changes.
    pub fn get_current_network_state(&self) -> Arc<NetworkStateModel> {
        let version = *self.topology_changes.borrow();
        let mut cache = self.cache.lock().expect("facade cache lock");
        let stale = cache.version != Some(version);
        if stale {
            cache.available_nodes = None;
            cache.network_state = None;
            cache.version = Some(version);
        }
        if let Some(state) = &cache.network_state {
            return state.clone();
        }

        let local = self.own_node_id();
        let (node_snapshots, _) = self.routing.manager().topology_snapshot();
        let nodes = node_snapshots
            .into_iter()
            .map(|node| {
                (
                    node.node_id.clone(),
                    NetworkStateNode {
                        is_local_node: node.node_id == local,
                        node_id: node.node_id,
                        display_name: node.display_name,
                        is_workflow_host: node.is_workflow_host,
                    },
                )
            })
            .collect();
        let state = Arc::new(NetworkStateModel {
            local_node: local,
            nodes,
        });
        cache.network_state = Some(state.clone());
        state
    }

    /// Resolve a service: a registry lookup for the local node, a remote
    /// proxy otherwise. A missing local implementation is a state error,
    /// not a network error.
    pub fn get_service<S: std::any::Any + Send + Sync>(
        &self,
        node_id: &NodeId,
    ) -> CommResult<ServiceHandle<S>> {
        if node_id == &self.own_node_id() {
            return self
                .registry
                .get::<S>()
                .map(ServiceHandle::Local)
                .ok_or(CommunicationError::ServiceNotAvailable(
                    std::any::type_name::<S>(),
                ));
        }
        Ok(ServiceHandle::Remote(RemoteServiceProxy {
            interface: short_type_name::<S>().to_string(),
            target: node_id.clone(),
            routing: self.routing.clone(),
            timeout: self.connection_service.params().request_timeout(),
        }))
    }

    /// Parse a contact point string and connect to it. Parse and connect
    /// failures both surface synchronously to the caller.
    pub async fn add_runtime_network_peer(&self, contact_point: &str) -> CommResult<()> {
        let ncp: NetworkContactPoint = contact_point.parse()?;
        self.connection_service.connect(&ncp, true).await?;
        Ok(())
    }
}

/// Last path segment of a type name; the key remote services register
/// themselves under via `CallbackObject::interface_name`.
fn short_type_name<S>() -> &'static str {
    let full = std::any::type_name::<S>();
    full.rsplit("::").next().unwrap_or(full)
}
