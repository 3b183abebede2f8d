//! Trellis Node -- distributed workflow platform node.
//!
//! Usage:
//!   trellis-node                     # Run with default config
//!   trellis-node --config path.toml  # Run with custom config
//!   trellis-node --demo 5            # Spin up a 5-node in-process mesh

use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use trellis_node::config::NodeConfig;
use trellis_node::PlatformNode;
use trellis_routing::NetworkFormatter;
use trellis_transport::{VirtualTransport, VIRTUAL_TRANSPORT_ID};

#[derive(Parser)]
#[command(name = "trellis-node", about = "Trellis distributed workflow platform node")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "trellis.toml")]
    config: String,

    /// Run an N-node in-process demo mesh instead of a single node
    #[arg(long)]
    demo: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trellis_node=info,trellis_routing=info".into()),
        )
        .init();

    let cli = Cli::parse();

    if let Some(n) = cli.demo {
        return run_demo(n).await;
    }

    let config = NodeConfig::load_or_default(Path::new(&cli.config))?;
    run_node(config).await
}

async fn run_node(config: NodeConfig) -> anyhow::Result<()> {
    // the in-process transport is the reference implementation; socket
    // transports register here the same way
    let transport = VirtualTransport::new(true);
    let node = PlatformNode::new(config, transport)?;
    node.start().await?;

    tracing::info!(node_id = %node.node_id(), "node running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    node.shutdown().await;
    tracing::info!("shutdown complete");
    Ok(())
}

/// Build an N-node chain over a shared virtual transport, wait for the
/// topology to converge, and print the resulting network view.
async fn run_demo(n: usize) -> anyhow::Result<()> {
    anyhow::ensure!(n >= 2, "demo needs at least 2 nodes");
    let transport = VirtualTransport::new(true);
    let base_port = 21000u16;

    let mut nodes = Vec::new();
    for i in 0..n {
        let mut config = NodeConfig::default();
        config.node.name = format!("demo-{i}");
        config.network.health_check = false;
        config.network.server_contact_points =
            vec![format!("{VIRTUAL_TRANSPORT_ID}:localhost:{}", base_port + i as u16)];
        if i > 0 {
            config.network.initial_peers =
                vec![format!("{VIRTUAL_TRANSPORT_ID}:localhost:{}", base_port + i as u16 - 1)];
        }
        let node = PlatformNode::new(config, transport.clone())?;
        node.start().await?;
        nodes.push(node);
    }

    wait_for_convergence(&nodes, Duration::from_secs(30)).await?;
    tracing::info!(nodes = n, "mesh converged");

    let reference = &nodes[0];
    let (node_snapshots, link_snapshots) = reference.routing_manager().topology_snapshot();
    println!(
        "{}",
        NetworkFormatter::format_topology(&node_snapshots, &link_snapshots, reference.node_id())
    );
    for node in &nodes {
        println!(
            "{}: {}",
            node.information().display_name,
            NetworkFormatter::format_stats(&node.routing_manager().stats_snapshot())
        );
    }

    for node in &nodes {
        node.shutdown().await;
    }
    Ok(())
}

async fn wait_for_convergence(
    nodes: &[Arc<PlatformNode>],
    timeout: Duration,
) -> anyhow::Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        let hashes: Vec<String> = nodes
            .iter()
            .map(|n| n.routing_manager().topology_hash())
            .collect();
        let converged = hashes.windows(2).all(|pair| pair[0] == pair[1]);
        if converged {
            return Ok(());
        }
        if Instant::now() > deadline {
            anyhow::bail!("mesh did not converge within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
