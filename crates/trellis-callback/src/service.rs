//! Owner-side callback registry.
//!
//! One table behind one mutex keeps an entry's weak reference, TTL expiry
//! and home platform consistent: registration, invocation, renewal and the
//! sweep never observe a half-updated entry.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use trellis_model::{ids, CommResult, CommunicationError, NodeId};

use crate::object::CallbackObject;

struct ObjectEntry {
    object: Weak<dyn CallbackObject>,
    expiry: Instant,
    /// The platform holding the proxy that keeps this object alive.
    home_platform: NodeId,
}

/// What one sweep pass did to a table: entries removed, and the surviving
/// `(object id, peer)` pairs owed a TTL renewal on the peer's mirror table.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub removed: Vec<String>,
    pub renewals: Vec<(String, NodeId)>,
}

/// Registry of locally owned objects that remote nodes may invoke.
pub struct CallbackService {
    ttl: Duration,
    entries: Mutex<HashMap<String, ObjectEntry>>,
}

impl CallbackService {
    pub fn new(ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Register an object for remote invocation. Registration is idempotent
    /// by identity: the same `Arc` registered twice keeps its id (with a
    /// refreshed TTL); two distinct objects always get distinct ids.
    pub fn add_callback_object(
        &self,
        object: &Arc<dyn CallbackObject>,
        home_platform: NodeId,
    ) -> String {
        let mut entries = self.entries.lock().expect("callback table lock");
        let now = Instant::now();

        for (id, entry) in entries.iter_mut() {
            if entry
                .object
                .upgrade()
                .is_some_and(|existing| Arc::ptr_eq(&existing, object))
            {
                entry.expiry = now + self.ttl;
                return id.clone();
            }
        }

        let id = ids::random_id();
        tracing::debug!(
            object_id = %id,
            interface = object.interface_name(),
            home = %home_platform,
            "registered callback object"
        );
        entries.insert(
            id.clone(),
            ObjectEntry {
                object: Arc::downgrade(object),
                expiry: now + self.ttl,
                home_platform,
            },
        );
        id
    }

    /// The id under which an object is registered, if it still is.
    pub fn object_identifier_for(&self, object: &Arc<dyn CallbackObject>) -> Option<String> {
        let entries = self.entries.lock().expect("callback table lock");
        entries.iter().find_map(|(id, entry)| {
            entry
                .object
                .upgrade()
                .is_some_and(|existing| Arc::ptr_eq(&existing, object))
                .then(|| id.clone())
        })
    }

    pub fn get_callback_object(&self, id: &str) -> Option<Arc<dyn CallbackObject>> {
        let entries = self.entries.lock().expect("callback table lock");
        entries.get(id).and_then(|entry| entry.object.upgrade())
    }

    /// Invoke a method on a registered object. Unknown or collected ids fail
    /// with a communication error naming the id; the object's own dispatch
    /// table rejects methods outside the remote-invokable set.
    pub fn callback(&self, id: &str, method: &str, args: Vec<Value>) -> CommResult<Value> {
        let object = self
            .get_callback_object(id)
            .ok_or_else(|| CommunicationError::UnknownCallbackObject(id.to_string()))?;
        // dispatch outside the table lock
        object.invoke(method, args)
    }

    /// Renewal entry point used by remote sweeps: push the expiry out.
    pub fn set_ttl(&self, id: &str, expiry: Instant) {
        let mut entries = self.entries.lock().expect("callback table lock");
        if let Some(entry) = entries.get_mut(id) {
            entry.expiry = expiry;
        }
    }

    /// Renew an entry by one full TTL from now.
    pub fn renew_ttl(&self, id: &str) {
        self.set_ttl(id, Instant::now() + self.ttl);
    }

    /// One sweep pass: under the table lock, drop every entry whose weak
    /// reference is dead or whose TTL expired; report the survivors so the
    /// caller can push renewals to their peers.
    pub fn sweep(&self, now: Instant) -> SweepReport {
        let mut report = SweepReport::default();
        let mut entries = self.entries.lock().expect("callback table lock");
        entries.retain(|id, entry| {
            let alive = entry.object.strong_count() > 0 && entry.expiry > now;
            if alive {
                report
                    .renewals
                    .push((id.clone(), entry.home_platform.clone()));
            } else {
                report.removed.push(id.clone());
            }
            alive
        });
        if !report.removed.is_empty() {
            tracing::debug!(removed = report.removed.len(), "swept callback objects");
        }
        report
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("callback table lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
