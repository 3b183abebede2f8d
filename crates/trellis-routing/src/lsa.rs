//! Link-state advertisements -- the flooded routing messages.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use trellis_model::NodeId;

/// Why an LSA was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LsaReason {
    Startup,
    Update,
    /// The advertising node is leaving the network; receivers drop it.
    Shutdown,
}

/// One directed link advertised by an LSA owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LsaLink {
    pub to: NodeId,
    pub connection_id: String,
}

/// A node's advertisement of itself and its immediate neighbor set.
///
/// Sequence numbers are per owner and strictly increasing; a receiver
/// accepts an LSA only if its sequence number is higher than the stored one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStateAdvertisement {
    pub owner: NodeId,
    pub sequence_number: u64,
    pub display_name: String,
    pub is_workflow_host: bool,
    pub reason: LsaReason,
    pub links: Vec<LsaLink>,
}

/// A batch of LSAs keyed by owner, exchanged when a connection is
/// established to transfer the full known topology in one round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LsaBatch {
    pub entries: BTreeMap<NodeId, LinkStateAdvertisement>,
}

impl LsaBatch {
    pub fn insert(&mut self, lsa: LinkStateAdvertisement) {
        self.entries.insert(lsa.owner.clone(), lsa);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Wire payload for messages on the `lsa` topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LsaMessage {
    Single(LinkStateAdvertisement),
    Batch(LsaBatch),
}
