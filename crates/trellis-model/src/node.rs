//! Node identity -- persistent node ids, handshake information, display names.
//!
//! A `NodeId` is an opaque persistent string, equal by value, created once at
//! node startup and cloned (never shared) when crossing connection
//! boundaries. Display names are best-effort and resolved through a
//! `NodeInformationRegistry` that is updated from every handshake.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// Opaque persistent node identifier. Equality is by id string only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        NodeId(id.into())
    }

    /// Mint a fresh random node id (used at node startup).
    pub fn random() -> Self {
        NodeId(crate::ids::random_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(s.to_string())
    }
}

/// Self-description a node sends during the connection handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInformation {
    pub node_id: NodeId,
    pub display_name: String,
    pub is_workflow_host: bool,
}

impl NodeInformation {
    pub fn new(node_id: NodeId, display_name: impl Into<String>, is_workflow_host: bool) -> Self {
        Self {
            node_id,
            display_name: display_name.into(),
            is_workflow_host,
        }
    }

    /// Short description used in log output.
    pub fn log_description(&self) -> String {
        format!("{} [{}]", self.display_name, self.node_id)
    }
}

/// Shared registry of display names learned from handshakes.
///
/// Injected explicitly into the services that need it; there is no global
/// instance. Lookups fall back to the raw id for unknown nodes.
#[derive(Debug, Default)]
pub struct NodeInformationRegistry {
    names: RwLock<HashMap<NodeId, String>>,
}

impl NodeInformationRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Merge handshake information into the registry.
    pub fn update_from(&self, info: &NodeInformation) {
        let mut names = self.names.write().expect("registry lock poisoned");
        names.insert(info.node_id.clone(), info.display_name.clone());
    }

    /// Best-effort display name: the registered name, or the raw id.
    pub fn display_name_for(&self, id: &NodeId) -> String {
        let names = self.names.read().expect("registry lock poisoned");
        names
            .get(id)
            .cloned()
            .unwrap_or_else(|| id.as_str().to_string())
    }
}
