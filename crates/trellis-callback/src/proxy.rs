//! Proxy-holder side: remote-invocation handles and their registry.
//!
//! A `CallbackProxy` is the generic stand-in for an object owned by another
//! node; typed wrappers implement the object's remote interface on top of
//! it. The `CallbackProxyService` mirrors the owner-side table so proxies
//! are swept and renewed the same way.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use trellis_model::{CommResult, NodeId};

use crate::object::CallbackProxyHandle;
use crate::service::SweepReport;

/// Which mirror table a TTL renewal targets on the receiving node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteSide {
    Object,
    Proxy,
}

/// Wire form of callback traffic between nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CallbackRemoteCall {
    Invoke {
        object_id: String,
        method: String,
        args: Vec<Value>,
    },
    RenewTtl {
        object_id: String,
        side: RemoteSide,
    },
}

/// Transport seam for callback traffic; implemented over routed requests by
/// the node assembly.
#[async_trait]
pub trait RemoteCallSender: Send + Sync {
    async fn send_remote_call(
        &self,
        target: &NodeId,
        call: CallbackRemoteCall,
    ) -> CommResult<Value>;
}

/// Generic remote-invocation handle for one remote object.
pub struct CallbackProxy {
    object_identifier: String,
    home_platform: NodeId,
    sender: Arc<dyn RemoteCallSender>,
}

impl CallbackProxy {
    pub fn new(
        object_identifier: impl Into<String>,
        home_platform: NodeId,
        sender: Arc<dyn RemoteCallSender>,
    ) -> Arc<Self> {
        Arc::new(Self {
            object_identifier: object_identifier.into(),
            home_platform,
            sender,
        })
    }

    /// Forward a method invocation to the remote owner.
    pub async fn invoke(&self, method: &str, args: Vec<Value>) -> CommResult<Value> {
        self.sender
            .send_remote_call(
                &self.home_platform,
                CallbackRemoteCall::Invoke {
                    object_id: self.object_identifier.clone(),
                    method: method.to_string(),
                    args,
                },
            )
            .await
    }
}

impl CallbackProxyHandle for CallbackProxy {
    fn object_identifier(&self) -> &str {
        &self.object_identifier
    }

    fn home_platform(&self) -> &NodeId {
        &self.home_platform
    }
}

struct ProxyEntry {
    proxy: Weak<CallbackProxy>,
    expiry: Instant,
    /// The platform owning the object this proxy forwards to.
    home_platform: NodeId,
}

/// Mirror-image registry of the proxies this node holds.
pub struct CallbackProxyService {
    ttl: Duration,
    entries: Mutex<HashMap<String, ProxyEntry>>,
}

impl CallbackProxyService {
    pub fn new(ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Track a proxy under its remote object id.
    pub fn register_proxy(&self, proxy: &Arc<CallbackProxy>) {
        let mut entries = self.entries.lock().expect("proxy table lock");
        entries.insert(
            proxy.object_identifier().to_string(),
            ProxyEntry {
                proxy: Arc::downgrade(proxy),
                expiry: Instant::now() + self.ttl,
                home_platform: proxy.home_platform().clone(),
            },
        );
    }

    /// The live proxy for a remote object id, if this node still holds one.
    pub fn get_proxy(&self, object_id: &str) -> Option<Arc<CallbackProxy>> {
        let entries = self.entries.lock().expect("proxy table lock");
        entries.get(object_id).and_then(|entry| entry.proxy.upgrade())
    }

    /// Renewal entry point used by remote sweeps.
    pub fn set_ttl(&self, object_id: &str, expiry: Instant) {
        let mut entries = self.entries.lock().expect("proxy table lock");
        if let Some(entry) = entries.get_mut(object_id) {
            entry.expiry = expiry;
        }
    }

    pub fn renew_ttl(&self, object_id: &str) {
        self.set_ttl(object_id, Instant::now() + self.ttl);
    }

    /// One sweep pass over the proxy table; same contract as the owner-side
    /// sweep.
    pub fn sweep(&self, now: Instant) -> SweepReport {
        let mut report = SweepReport::default();
        let mut entries = self.entries.lock().expect("proxy table lock");
        entries.retain(|id, entry| {
            let alive = entry.proxy.strong_count() > 0 && entry.expiry > now;
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
            tracing::debug!(removed = report.removed.len(), "swept callback proxies");
        }
        report
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("proxy table lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Sender that records calls and answers with a canned value.
    struct RecordingSender {
        calls: Mutex<Vec<(NodeId, CallbackRemoteCall)>>,
        invocations: AtomicUsize,
    }

    impl RecordingSender {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                invocations: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl RemoteCallSender for RecordingSender {
        async fn send_remote_call(
            &self,
            target: &NodeId,
            call: CallbackRemoteCall,
        ) -> CommResult<Value> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            self.calls
                .lock()
                .unwrap()
                .push((target.clone(), call));
            Ok(Value::from("remote-ok"))
        }
    }

    /// Typed wrapper: the worked example of a concrete proxy implementing
    /// an object's remote interface over the generic handle.
    struct ProbeProxy {
        inner: Arc<CallbackProxy>,
    }

    impl ProbeProxy {
        async fn ping(&self, token: &str) -> CommResult<Value> {
            self.inner.invoke("ping", vec![Value::from(token)]).await
        }
    }

    impl CallbackProxyHandle for ProbeProxy {
        fn object_identifier(&self) -> &str {
            self.inner.object_identifier()
        }

        fn home_platform(&self) -> &NodeId {
            self.inner.home_platform()
        }
    }

    #[tokio::test]
    async fn test_proxy_forwards_to_home_platform() {
        let sender = RecordingSender::new();
        let proxy = CallbackProxy::new("obj-1", NodeId::new("owner"), sender.clone());
        let typed = ProbeProxy { inner: proxy };

        let result = typed.ping("abc").await.unwrap();
        assert_eq!(result, Value::from("remote-ok"));
        assert_eq!(typed.object_identifier(), "obj-1");
        assert_eq!(typed.home_platform(), &NodeId::new("owner"));

        let calls = sender.calls.lock().unwrap();
        match &calls[0] {
            (target, CallbackRemoteCall::Invoke { object_id, method, args }) => {
                assert_eq!(target, &NodeId::new("owner"));
                assert_eq!(object_id, "obj-1");
                assert_eq!(method, "ping");
                assert_eq!(args, &vec![Value::from("abc")]);
            }
            other => panic!("unexpected call: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_proxy_registry_weak_lifecycle() {
        let sender = RecordingSender::new();
        let service = CallbackProxyService::new(Duration::from_secs(600));

        let proxy = CallbackProxy::new("obj-2", NodeId::new("owner"), sender);
        service.register_proxy(&proxy);
        assert!(service.get_proxy("obj-2").is_some());

        drop(proxy);
        assert!(service.get_proxy("obj-2").is_none());
        let report = service.sweep(Instant::now());
        assert_eq!(report.removed, vec!["obj-2".to_string()]);
        assert!(service.is_empty());
    }

    #[test]
    fn test_remote_call_serde_roundtrip() {
        let call = CallbackRemoteCall::RenewTtl {
            object_id: "obj-3".into(),
            side: RemoteSide::Proxy,
        };
        let json = serde_json::to_string(&call).unwrap();
        match serde_json::from_str(&json).unwrap() {
            CallbackRemoteCall::RenewTtl { object_id, side } => {
                assert_eq!(object_id, "obj-3");
                assert_eq!(side, RemoteSide::Proxy);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }
}
