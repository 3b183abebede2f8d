//! Message metadata vocabulary.
//!
//! Every message carries a string/string map. Known keys:
//!
//! ```text
//! "category"  "routing" | "healthCheck"
//! "topic"     "lsa" | "routed"
//! "type"      "message" | "confirmation" | "failure"
//! "hopcount"  0..n (string-encoded)
//! "receiver" / "sender"  node ids
//! "messageid" unique per message
//! "trace"     comma-joined breadcrumb of visited nodes
//! ```

use std::collections::HashMap;

use crate::node::NodeId;

pub const KEY_CATEGORY: &str = "category";
pub const KEY_TOPIC: &str = "topic";
pub const KEY_TYPE: &str = "type";
pub const KEY_HOPCOUNT: &str = "hopcount";
pub const KEY_RECEIVER: &str = "receiver";
pub const KEY_SENDER: &str = "sender";
pub const KEY_MESSAGEID: &str = "messageid";
pub const KEY_TRACE: &str = "trace";

pub const CATEGORY_ROUTING: &str = "routing";
pub const CATEGORY_HEALTH_CHECK: &str = "healthCheck";

pub const TOPIC_LSA: &str = "lsa";
pub const TOPIC_ROUTED: &str = "routed";

pub const TYPE_MESSAGE: &str = "message";
pub const TYPE_CONFIRMATION: &str = "confirmation";
pub const TYPE_FAILURE: &str = "failure";

/// Builder/accessor wrapper around a message metadata map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetaData {
    map: HashMap<String, String>,
}

impl MetaData {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Metadata for routing-category messages.
    pub fn routing() -> Self {
        Self::empty().with_value(KEY_CATEGORY, CATEGORY_ROUTING)
    }

    /// Metadata for an LSA flood message.
    pub fn lsa_message() -> Self {
        Self::routing().with_value(KEY_TOPIC, TOPIC_LSA)
    }

    /// Metadata for a routed point-to-point message.
    pub fn routed_message() -> Self {
        Self::routing()
            .with_value(KEY_TOPIC, TOPIC_ROUTED)
            .with_value(KEY_TYPE, TYPE_MESSAGE)
    }

    /// Metadata used for both health check requests and responses.
    pub fn health_check() -> Self {
        Self::empty().with_value(KEY_CATEGORY, CATEGORY_HEALTH_CHECK)
    }

    pub fn wrap(map: HashMap<String, String>) -> Self {
        Self { map }
    }

    /// Detached copy of the inner map.
    pub fn clone_map(&self) -> HashMap<String, String> {
        self.map.clone()
    }

    pub fn into_map(self) -> HashMap<String, String> {
        self.map
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    pub fn set_value(&mut self, key: &str, value: impl Into<String>) {
        self.map.insert(key.to_string(), value.into());
    }

    pub fn with_value(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set_value(key, value);
        self
    }

    pub fn category(&self) -> Option<&str> {
        self.get(KEY_CATEGORY)
    }

    pub fn topic(&self) -> Option<&str> {
        self.get(KEY_TOPIC)
    }

    pub fn sender(&self) -> Option<NodeId> {
        self.get(KEY_SENDER).map(NodeId::from)
    }

    pub fn receiver(&self) -> Option<NodeId> {
        self.get(KEY_RECEIVER).map(NodeId::from)
    }

    pub fn set_sender(&mut self, id: &NodeId) {
        self.set_value(KEY_SENDER, id.as_str());
    }

    pub fn set_receiver(&mut self, id: &NodeId) {
        self.set_value(KEY_RECEIVER, id.as_str());
    }

    pub fn message_id(&self) -> Option<&str> {
        self.get(KEY_MESSAGEID)
    }

    pub fn set_message_id(&mut self, id: &str) {
        self.set_value(KEY_MESSAGEID, id);
    }

    /// Current hop count; missing or unparsable counts as 0.
    pub fn hop_count(&self) -> u32 {
        self.get(KEY_HOPCOUNT)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    /// Increment the hop count field by one (missing counts as 0).
    pub fn increment_hop_count(&mut self) -> u32 {
        let next = self.hop_count() + 1;
        self.set_value(KEY_HOPCOUNT, next.to_string());
        next
    }

    /// Append a node to the trace breadcrumb.
    pub fn add_trace_item(&mut self, item: &str) {
        match self.map.get_mut(KEY_TRACE) {
            Some(trace) => {
                trace.push(',');
                trace.push_str(item);
            }
            None => self.set_value(KEY_TRACE, item),
        }
    }

    /// True if every key/value pair of `self` is present in `other`.
    /// Used to match handler filters against incoming messages.
    pub fn matches(&self, other: &MetaData) -> bool {
        self.map
            .iter()
            .all(|(k, v)| other.map.get(k).is_some_and(|ov| ov == v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lsa_message_metadata() {
        let md = MetaData::lsa_message();
        assert_eq!(md.category(), Some(CATEGORY_ROUTING));
        assert_eq!(md.topic(), Some(TOPIC_LSA));
    }

    #[test]
    fn test_hop_count_increment_from_missing() {
        let mut md = MetaData::empty();
        assert_eq!(md.hop_count(), 0);
        assert_eq!(md.increment_hop_count(), 1);
        assert_eq!(md.increment_hop_count(), 2);
        assert_eq!(md.get(KEY_HOPCOUNT), Some("2"));
    }

    #[test]
    fn test_trace_breadcrumb() {
        let mut md = MetaData::empty();
        md.add_trace_item("node-a");
        md.add_trace_item("node-b");
        assert_eq!(md.get(KEY_TRACE), Some("node-a,node-b"));
    }

    #[test]
    fn test_matches_filter_semantics() {
        let filter = MetaData::routing().with_value(KEY_TOPIC, TOPIC_LSA);
        let message = MetaData::lsa_message().with_value(KEY_SENDER, "n1");
        assert!(filter.matches(&message));
        assert!(!message.matches(&filter)); // sender key missing in filter
    }

    #[test]
    fn test_clone_map_is_detached() {
        let md = MetaData::routing();
        let mut cloned = md.clone_map();
        cloned.insert(KEY_TOPIC.into(), "mutated".into());
        assert_eq!(md.topic(), None);
    }
}
