//! Topology convergence tests over the standard connection shapes.
//!
//! The binding property: after a quiescence wait, every node's topology
//! hash equals every other node's, regardless of connection order.

use std::time::Duration;

use crate::harness::{scaled_timeout, test_node_count, VirtualMesh};

#[tokio::test]
async fn test_two_node_convergence() {
    let mesh = VirtualMesh::new(2).await.unwrap();
    mesh.connect_chain().await.unwrap();
    mesh.wait_converged(Duration::from_secs(10)).await.unwrap();
    mesh.shutdown_all().await;
}

/// Chain: node-1 -> node-0, node-2 -> node-1, ...
/// Default 5 nodes, override with TEST_NODE_COUNT.
#[tokio::test]
async fn test_chain_convergence() {
    let n = test_node_count(5);
    let mesh = VirtualMesh::new(n).await.unwrap();
    mesh.connect_chain().await.unwrap();
    mesh.wait_converged(scaled_timeout(n, 15)).await.unwrap();
    mesh.shutdown_all().await;
}

#[tokio::test]
async fn test_ring_convergence() {
    let n = test_node_count(5);
    let mesh = VirtualMesh::new(n).await.unwrap();
    mesh.connect_ring().await.unwrap();
    mesh.wait_converged(scaled_timeout(n, 15)).await.unwrap();
    mesh.shutdown_all().await;
}

#[tokio::test]
async fn test_star_convergence() {
    let n = test_node_count(5);
    let mesh = VirtualMesh::new(n).await.unwrap();
    mesh.connect_star().await.unwrap();
    mesh.wait_converged(scaled_timeout(n, 15)).await.unwrap();
    mesh.shutdown_all().await;
}

/// Random incremental topologies over a few seeds; connection order must
/// not affect the converged result.
#[tokio::test]
async fn test_random_incremental_convergence() {
    for seed in [7u64, 23, 99] {
        let n = test_node_count(5);
        let mesh = VirtualMesh::new(n).await.unwrap();
        mesh.connect_random_incremental(seed).await.unwrap();
        mesh.wait_converged(scaled_timeout(n, 15)).await.unwrap();
        mesh.shutdown_all().await;
    }
}

/// A node that announces shutdown disappears from the remaining views,
/// which re-converge without it.
#[tokio::test]
async fn test_shutdown_announcement_removes_node() {
    let mesh = VirtualMesh::new(3).await.unwrap();
    mesh.connect_chain().await.unwrap();
    mesh.wait_converged(Duration::from_secs(15)).await.unwrap();

    // node-1 is the middle of the chain
    let departed = mesh.nodes[1].node_id();
    mesh.nodes[1].shutdown().await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    loop {
        let gone = [&mesh.nodes[0], &mesh.nodes[2]].iter().all(|node| {
            let (nodes, _) = node.node.routing_manager().topology_snapshot();
            !nodes.iter().any(|n| n.node_id == departed)
        });
        let hashes = (
            mesh.nodes[0].topology_hash(),
            mesh.nodes[2].topology_hash(),
        );
        if gone && hashes.0 == hashes.1 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "survivors did not re-converge after shutdown"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    mesh.shutdown_all().await;
}

/// A late joiner catches up on the full existing topology through the
/// batch exchange on connect.
#[tokio::test]
async fn test_late_joiner_catches_up() {
    let mesh = VirtualMesh::new(4).await.unwrap();
    // connect only the first three
    mesh.nodes[1].connect_to(&mesh.nodes[0]).await.unwrap();
    mesh.nodes[2].connect_to(&mesh.nodes[1]).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let sub_converged = mesh.nodes[..3]
            .iter()
            .all(|node| node.known_node_count() == 3)
            && mesh.nodes[0].topology_hash() == mesh.nodes[1].topology_hash()
            && mesh.nodes[1].topology_hash() == mesh.nodes[2].topology_hash();
        if sub_converged {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "initial trio stuck");
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    mesh.nodes[3].connect_to(&mesh.nodes[2]).await.unwrap();
    mesh.wait_converged(Duration::from_secs(15)).await.unwrap();
    mesh.shutdown_all().await;
}
