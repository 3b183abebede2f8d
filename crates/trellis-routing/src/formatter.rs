//! Human-readable summaries of topology and routing statistics.

use trellis_model::NodeId;

use crate::stats::NetworkStats;
use crate::topology::{TopologyLink, TopologyNode};

pub struct NetworkFormatter;

impl NetworkFormatter {
    /// Multi-line rendering of a topology snapshot: every node with its
    /// outgoing links, the local node marked.
    pub fn format_topology(
        nodes: &[TopologyNode],
        links: &[TopologyLink],
        local: &NodeId,
    ) -> String {
        let mut out = format!("{} nodes, {} links\n", nodes.len(), links.len());
        for node in nodes {
            let marker = if &node.node_id == local { " (local)" } else { "" };
            let host = if node.is_workflow_host {
                " [workflow host]"
            } else {
                ""
            };
            out.push_str(&format!(
                "  {} \"{}\"{}{} seq={}\n",
                node.node_id, node.display_name, marker, host, node.sequence_number
            ));
            for link in links.iter().filter(|l| l.from == node.node_id) {
                out.push_str(&format!("    -> {} via {}\n", link.to, link.connection_id));
            }
        }
        out
    }

    /// One-line statistics summary for logs.
    pub fn format_stats(stats: &NetworkStats) -> String {
        format!(
            "LSAs sent={} received={} rejected={}; shortest-path runs={}; failed sends={}",
            stats.sent_lsas,
            stats.received_lsas,
            stats.rejected_lsas,
            stats.shortest_path_computations,
            stats.failed_communications
        )
    }
}
