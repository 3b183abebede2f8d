//! Routed messaging, facade and lifecycle tests over virtual meshes.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use trellis_callback::CallbackObject;
use trellis_model::{CommunicationError, ResultCode};
use trellis_node::{PlatformPayloadHandler, ServiceHandle};
use trellis_transport::VirtualTransport;

use crate::harness::{VirtualMesh, VirtualNode};

/// The concrete two-node scenario: A (server) and B (client) connected
/// with duplex; routed requests succeed in both directions over the one
/// connection pair, each answered with the handler's transform.
#[tokio::test]
async fn test_two_node_duplex_routed_requests() {
    let mesh = VirtualMesh::new(2).await.unwrap();
    let (a, b) = (&mesh.nodes[0], &mesh.nodes[1]);
    b.connect_to(a).await.unwrap();
    mesh.wait_converged(Duration::from_secs(10)).await.unwrap();

    let response = b.perform_echo_request("c2s", &a.node_id()).await.unwrap();
    assert!(response.is_success(), "c2s failed: {response:?}");
    assert_eq!(
        response.content(),
        PlatformPayloadHandler::echo_transform("c2s").as_bytes()
    );

    let response = a.perform_echo_request("s2c", &b.node_id()).await.unwrap();
    assert!(response.is_success(), "s2c failed: {response:?}");
    assert_eq!(
        response.content(),
        PlatformPayloadHandler::echo_transform("s2c").as_bytes()
    );

    // the reverse direction reused the duplex pair instead of opening a
    // second connection
    assert_eq!(a.node.connection_service().outgoing_connection_count(), 1);
    assert_eq!(b.node.connection_service().outgoing_connection_count(), 1);
    mesh.shutdown_all().await;
}

/// Requests to a node that is not a direct neighbor are forwarded hop by
/// hop along the chain.
#[tokio::test]
async fn test_multi_hop_forwarding() {
    let mesh = VirtualMesh::new(3).await.unwrap();
    mesh.connect_chain().await.unwrap();
    mesh.wait_converged(Duration::from_secs(15)).await.unwrap();

    let (first, last) = (&mesh.nodes[0], &mesh.nodes[2]);
    let response = first
        .perform_echo_request("through the middle", &last.node_id())
        .await
        .unwrap();
    assert!(response.is_success(), "multi-hop failed: {response:?}");
    assert_eq!(
        response.content(),
        PlatformPayloadHandler::echo_transform("through the middle").as_bytes()
    );

    // the payload arrived at the destination's buffer
    let buffered = last.node.routing_service().last_message_content().unwrap();
    let text = String::from_utf8_lossy(&buffered);
    assert!(text.contains("through the middle"));
    mesh.shutdown_all().await;
}

/// A receiver no route leads to is answered with NO_MATCHING_HANDLER, not
/// an error or a hang.
#[tokio::test]
async fn test_unreachable_receiver_yields_no_matching_handler() {
    let mesh = VirtualMesh::new(2).await.unwrap();
    // deliberately not connected
    let response = mesh.nodes[0]
        .perform_echo_request("lost", &mesh.nodes[1].node_id())
        .await
        .unwrap();
    assert_eq!(response.result_code(), ResultCode::NoMatchingHandler);
    mesh.shutdown_all().await;
}

/// Routing to the own node dispatches locally without touching the wire.
#[tokio::test]
async fn test_routed_request_to_self() {
    let mesh = VirtualMesh::new(1).await.unwrap();
    let node = &mesh.nodes[0];
    let response = node
        .perform_echo_request("loopback", &node.node_id())
        .await
        .unwrap();
    assert!(response.is_success());
    assert_eq!(
        response.content(),
        PlatformPayloadHandler::echo_transform("loopback").as_bytes()
    );
    mesh.shutdown_all().await;
}

/// Connecting to a stopped server fails synchronously with a
/// communication error.
#[tokio::test]
async fn test_connect_to_stopped_server_fails() {
    let transport = VirtualTransport::new(true);
    let a = VirtualNode::spawn(&transport, "a", 23000).await.unwrap();
    let b = VirtualNode::spawn(&transport, "b", 23001).await.unwrap();

    b.shutdown().await;
    let result = a.node.management().add_runtime_peer(&b.contact_point).await;
    assert!(matches!(
        result,
        Err(CommunicationError::CouldNotConnect(_))
    ));
    a.shutdown().await;
}

/// A malformed runtime peer string fails fast with an invalid-argument
/// error, before any connection attempt.
#[tokio::test]
async fn test_add_runtime_peer_rejects_malformed_contact_point() {
    let mesh = VirtualMesh::new(1).await.unwrap();
    let result = mesh.nodes[0]
        .node
        .communication_service()
        .add_runtime_network_peer("not a contact point")
        .await;
    assert!(matches!(
        result,
        Err(CommunicationError::InvalidContactPoint { .. })
    ));
    mesh.shutdown_all().await;
}

/// Facade caching: available nodes reflect the topology, the network state
/// snapshot marks the local node, and both refresh after changes.
#[tokio::test]
async fn test_facade_available_nodes_and_state() {
    let mesh = VirtualMesh::new(2).await.unwrap();
    let (a, b) = (&mesh.nodes[0], &mesh.nodes[1]);

    let comm = a.node.communication_service();
    assert_eq!(comm.get_available_nodes(false), vec![a.node_id()]);

    b.connect_to(a).await.unwrap();
    mesh.wait_converged(Duration::from_secs(10)).await.unwrap();

    let nodes = comm.get_available_nodes(true);
    assert!(nodes.contains(&a.node_id()) && nodes.contains(&b.node_id()));

    let state = comm.get_current_network_state();
    assert_eq!(state.local_node(), &a.node_id());
    assert_eq!(state.node_count(), 2);
    assert!(state.node(&a.node_id()).unwrap().is_local_node);
    assert!(!state.node(&b.node_id()).unwrap().is_local_node);
    assert_eq!(state.node(&b.node_id()).unwrap().display_name, "node-1");

    // cached snapshot is reused until the topology changes
    let again = comm.get_current_network_state();
    assert!(Arc::ptr_eq(&state, &again));
    mesh.shutdown_all().await;
}

/// Remote service used by the get_service tests.
struct UppercaseService;

impl CallbackObject for UppercaseService {
    fn interface_name(&self) -> &'static str {
        "UppercaseService"
    }

    fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, CommunicationError> {
        match method {
            "upper" => Ok(Value::from(
                args.first()
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_uppercase(),
            )),
            other => Err(self.method_not_allowed(other)),
        }
    }
}

#[tokio::test]
async fn test_get_service_local_and_remote() {
    let mesh = VirtualMesh::new(2).await.unwrap();
    let (a, b) = (&mesh.nodes[0], &mesh.nodes[1]);
    b.connect_to(a).await.unwrap();
    mesh.wait_converged(Duration::from_secs(10)).await.unwrap();

    // local lookup without a registration is a state error
    let missing = a
        .node
        .communication_service()
        .get_service::<UppercaseService>(&a.node_id());
    assert!(matches!(
        missing,
        Err(CommunicationError::ServiceNotAvailable(_))
    ));

    // register locally on A and remotely on B
    a.node.service_registry().register(Arc::new(UppercaseService));
    b.node
        .payload_handler()
        .register_remote_service(Arc::new(UppercaseService));

    let local = a
        .node
        .communication_service()
        .get_service::<UppercaseService>(&a.node_id())
        .unwrap();
    assert!(local.is_local());

    match a
        .node
        .communication_service()
        .get_service::<UppercaseService>(&b.node_id())
        .unwrap()
    {
        ServiceHandle::Remote(proxy) => {
            assert_eq!(proxy.target(), &b.node_id());
            let result = proxy.call("upper", vec![Value::from("abc")]).await.unwrap();
            assert_eq!(result, Value::from("ABC"));

            let err = proxy.call("drop_tables", Vec::new()).await.unwrap_err();
            assert!(matches!(err, CommunicationError::RemoteInvocation(_)));
        }
        ServiceHandle::Local(_) => panic!("expected a remote handle"),
    }
    mesh.shutdown_all().await;
}

/// Reachable-node queries can be restricted to workflow hosts plus self.
#[tokio::test]
async fn test_workflow_host_restriction() {
    let transport = VirtualTransport::new(true);
    let plain = VirtualNode::spawn(&transport, "plain", 23100).await.unwrap();

    let mut host_config = trellis_node::config::NodeConfig::default();
    host_config.node.name = "host".into();
    host_config.node.is_workflow_host = true;
    host_config.network.health_check = false;
    host_config.network.server_contact_points = vec!["virtual:localhost:23101".into()];
    let host = trellis_node::PlatformNode::new(host_config, transport.clone()).unwrap();
    host.start().await.unwrap();

    plain
        .node
        .management()
        .add_runtime_peer("virtual:localhost:23101")
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let all = plain.node.routing_service().get_reachable_nodes(false);
        let restricted = plain.node.routing_service().get_reachable_nodes(true);
        if all.len() == 2 && restricted.len() == 2 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "workflow host never became visible: all={all:?} restricted={restricted:?}"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    // a third, non-host node is filtered out of the restricted view
    let other = VirtualNode::spawn(&transport, "other", 23102).await.unwrap();
    other.connect_to(&plain).await.unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let all = plain.node.routing_service().get_reachable_nodes(false);
        if all.len() == 3 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let restricted = plain.node.routing_service().get_reachable_nodes(true);
    assert_eq!(restricted.len(), 2, "only the host and self: {restricted:?}");
    assert!(!restricted.contains(&other.node_id()));

    plain.shutdown().await;
    host.shutdown().await;
    other.shutdown().await;
}
