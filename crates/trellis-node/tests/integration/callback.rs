//! Callback subsystem tests across virtual nodes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use trellis_callback::{sweep_once, CallbackObject, CallbackProxyHandle};
use trellis_model::CommunicationError;

use crate::harness::VirtualMesh;

/// Counter object exposing exactly one remotely invokable method.
struct Counter;

impl CallbackObject for Counter {
    fn interface_name(&self) -> &'static str {
        "Counter"
    }

    fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, CommunicationError> {
        match method {
            "increment" => {
                let n = args.first().and_then(Value::as_i64).unwrap_or(0);
                Ok(Value::from(n + 1))
            }
            other => Err(self.method_not_allowed(other)),
        }
    }
}

#[tokio::test]
async fn test_remote_callback_invocation() {
    let mesh = VirtualMesh::new(2).await.unwrap();
    let (owner, holder) = (&mesh.nodes[0], &mesh.nodes[1]);
    holder.connect_to(owner).await.unwrap();
    mesh.wait_converged(Duration::from_secs(10)).await.unwrap();

    let object: Arc<dyn CallbackObject> = Arc::new(Counter);
    let id = owner.node.add_callback_object(&object, holder.node_id());

    let proxy = holder.node.create_callback_proxy(&id, owner.node_id());
    assert_eq!(proxy.object_identifier(), id);
    assert_eq!(proxy.home_platform(), &owner.node_id());

    let result = proxy.invoke("increment", vec![Value::from(41)]).await.unwrap();
    assert_eq!(result, Value::from(42));

    // a method outside the allow-list is rejected at the owner and the
    // failure crosses the wire as an error
    let err = proxy.invoke("reset", Vec::new()).await.unwrap_err();
    assert!(matches!(err, CommunicationError::RemoteInvocation(_)));
    assert!(err.to_string().contains("reset"));

    mesh.shutdown_all().await;
}

#[tokio::test]
async fn test_unknown_object_id_fails_with_id() {
    let mesh = VirtualMesh::new(2).await.unwrap();
    let (owner, holder) = (&mesh.nodes[0], &mesh.nodes[1]);
    holder.connect_to(owner).await.unwrap();
    mesh.wait_converged(Duration::from_secs(10)).await.unwrap();

    let proxy = holder
        .node
        .create_callback_proxy("feedfacefeedface", owner.node_id());
    let err = proxy.invoke("increment", Vec::new()).await.unwrap_err();
    assert!(err.to_string().contains("feedfacefeedface"));
    mesh.shutdown_all().await;
}

#[tokio::test]
async fn test_registration_idempotent_at_node_level() {
    let mesh = VirtualMesh::new(1).await.unwrap();
    let node = &mesh.nodes[0];

    let a: Arc<dyn CallbackObject> = Arc::new(Counter);
    let b: Arc<dyn CallbackObject> = Arc::new(Counter);

    let id1 = node.node.add_callback_object(&a, node.node_id());
    let id2 = node.node.add_callback_object(&a, node.node_id());
    let id3 = node.node.add_callback_object(&b, node.node_id());

    assert_eq!(id1, id2);
    assert_ne!(id1, id3);
    mesh.shutdown_all().await;
}

/// The proxy-holder's sweep renews the owner-side TTL, so a record the
/// owner would otherwise expire survives as long as the proxy lives.
#[tokio::test]
async fn test_cross_node_ttl_renewal() {
    let mesh = VirtualMesh::new(2).await.unwrap();
    let (owner, holder) = (&mesh.nodes[0], &mesh.nodes[1]);
    holder.connect_to(owner).await.unwrap();
    mesh.wait_converged(Duration::from_secs(10)).await.unwrap();

    let object: Arc<dyn CallbackObject> = Arc::new(Counter);
    let id = owner.node.add_callback_object(&object, holder.node_id());
    let _proxy = holder.node.create_callback_proxy(&id, owner.node_id());

    // push the owner-side record to the brink of expiry
    owner
        .node
        .callback_service()
        .set_ttl(&id, Instant::now() + Duration::from_millis(50));

    // the holder's sweep pushes a renewal to the owner
    sweep_once(
        holder.node.callback_service(),
        holder.node.callback_proxy_service(),
        holder.node.remote_call_sender(),
        Instant::now(),
    )
    .await;

    // well past the original expiry the record is still alive
    tokio::time::sleep(Duration::from_millis(100)).await;
    let report = owner.node.callback_service().sweep(Instant::now());
    assert!(report.removed.is_empty(), "renewed entry was swept");
    assert!(owner.node.callback_service().get_callback_object(&id).is_some());

    mesh.shutdown_all().await;
}

/// Without a renewal, an expired record is removed by the next sweep and
/// subsequent invocations fail.
#[tokio::test]
async fn test_expired_object_collected_and_unreachable() {
    let mesh = VirtualMesh::new(2).await.unwrap();
    let (owner, holder) = (&mesh.nodes[0], &mesh.nodes[1]);
    holder.connect_to(owner).await.unwrap();
    mesh.wait_converged(Duration::from_secs(10)).await.unwrap();

    let object: Arc<dyn CallbackObject> = Arc::new(Counter);
    let id = owner.node.add_callback_object(&object, holder.node_id());
    owner
        .node
        .callback_service()
        .set_ttl(&id, Instant::now() - Duration::from_millis(1));

    let report = owner.node.callback_service().sweep(Instant::now());
    assert_eq!(report.removed, vec![id.clone()]);

    let proxy = holder.node.create_callback_proxy(&id, owner.node_id());
    let err = proxy.invoke("increment", Vec::new()).await.unwrap_err();
    assert!(err.to_string().contains(&id));
    mesh.shutdown_all().await;
}
