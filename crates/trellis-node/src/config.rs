//! Configuration types for trellis-node.
//! Parsed from a TOML file; every field has a sensible default.

use serde::{Deserialize, Serialize};
use std::path::Path;

use trellis_model::{ProtocolParams, DEFAULT_PARAMS};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub callback: CallbackSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub is_workflow_host: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSection {
    /// Contact points to listen on, as "transportId:host:port" strings.
    #[serde(default)]
    pub server_contact_points: Vec<String>,
    /// Peers to connect to at startup, same grammar.
    #[serde(default)]
    pub initial_peers: Vec<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_msec: u64,
    #[serde(default = "default_true")]
    pub health_check: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackSection {
    #[serde(default = "default_ttl")]
    pub ttl_msec: u64,
    /// The TTL sweep runs this many times per TTL window.
    #[serde(default = "default_sweep_divisor")]
    pub sweep_divisor: u32,
}

fn default_name() -> String {
    "trellis-node".into()
}
fn default_request_timeout() -> u64 {
    DEFAULT_PARAMS.request_timeout_msec
}
fn default_true() -> bool {
    true
}
fn default_ttl() -> u64 {
    DEFAULT_PARAMS.callback_ttl_msec
}
fn default_sweep_divisor() -> u32 {
    DEFAULT_PARAMS.callback_sweep_divisor
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            name: default_name(),
            is_workflow_host: false,
        }
    }
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            server_contact_points: Vec::new(),
            initial_peers: Vec::new(),
            request_timeout_msec: default_request_timeout(),
            health_check: true,
        }
    }
}

impl Default for CallbackSection {
    fn default() -> Self {
        Self {
            ttl_msec: default_ttl(),
            sweep_divisor: default_sweep_divisor(),
        }
    }
}

impl NodeConfig {
    /// Load config from file, or fall back to defaults if missing.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: NodeConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// The protocol parameter set this configuration resolves to.
    pub fn params(&self) -> ProtocolParams {
        ProtocolParams {
            request_timeout_msec: self.network.request_timeout_msec,
            callback_ttl_msec: self.callback.ttl_msec,
            callback_sweep_divisor: self.callback.sweep_divisor.max(1),
            ..DEFAULT_PARAMS
        }
    }
}
