//! Platform payloads -- what routed requests carry between nodes.
//!
//! The routed layer moves opaque bytes; this module defines the payload
//! vocabulary of the platform (callback traffic, remote service calls, the
//! echo probe) and dispatches it at the destination.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use trellis_callback::{
    CallbackObject, CallbackProxyService, CallbackRemoteCall, CallbackService, RemoteCallSender,
    RemoteSide,
};
use trellis_model::{CommResult, CommunicationError, NodeId};
use trellis_routing::{RequestPayloadHandler, RoutingService};

/// Typed payload of a routed request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PlatformPayload {
    /// Diagnostics probe answered with a deterministic transform.
    Echo { text: String },
    /// Invocation of a named remote service on the destination node.
    ServiceCall {
        interface: String,
        method: String,
        args: Vec<Value>,
    },
    /// Callback-subsystem traffic (invocations and TTL renewals).
    Callback(CallbackRemoteCall),
}

/// Destination-side dispatcher for `PlatformPayload` requests.
pub struct PlatformPayloadHandler {
    callback_service: Arc<CallbackService>,
    proxy_service: Arc<CallbackProxyService>,
    /// Remote-invokable services keyed by interface name.
    remote_services: Mutex<HashMap<&'static str, Arc<dyn CallbackObject>>>,
}

impl PlatformPayloadHandler {
    pub fn new(
        callback_service: Arc<CallbackService>,
        proxy_service: Arc<CallbackProxyService>,
    ) -> Arc<Self> {
        Arc::new(Self {
            callback_service,
            proxy_service,
            remote_services: Mutex::new(HashMap::new()),
        })
    }

    /// Expose a service object for remote `ServiceCall` dispatch.
    pub fn register_remote_service(&self, service: Arc<dyn CallbackObject>) {
        let mut services = self.remote_services.lock().expect("services lock");
        services.insert(service.interface_name(), service);
    }

    /// The deterministic transform applied to echo probes.
    pub fn echo_transform(text: &str) -> String {
        format!("handled({text})")
    }
}

#[async_trait]
impl RequestPayloadHandler for PlatformPayloadHandler {
    async fn handle_request_payload(&self, payload: &[u8], sender: &NodeId) -> CommResult<Vec<u8>> {
        let payload: PlatformPayload = serde_json::from_slice(payload)?;
        match payload {
            PlatformPayload::Echo { text } => {
                tracing::debug!(%sender, "answering echo probe");
                Ok(Self::echo_transform(&text).into_bytes())
            }
            PlatformPayload::ServiceCall {
                interface,
                method,
                args,
            } => {
                let service = {
                    let services = self.remote_services.lock().expect("services lock");
                    services.get(interface.as_str()).cloned()
                }
                .ok_or_else(|| {
                    CommunicationError::RemoteInvocation(format!(
                        "no remote service '{interface}' registered"
                    ))
                })?;
                let result = service.invoke(&method, args)?;
                Ok(serde_json::to_vec(&result)?)
            }
            PlatformPayload::Callback(call) => match call {
                CallbackRemoteCall::Invoke {
                    object_id,
                    method,
                    args,
                } => {
                    let result = self.callback_service.callback(&object_id, &method, args)?;
                    Ok(serde_json::to_vec(&result)?)
                }
                CallbackRemoteCall::RenewTtl { object_id, side } => {
                    match side {
                        RemoteSide::Object => self.callback_service.renew_ttl(&object_id),
                        RemoteSide::Proxy => self.proxy_service.renew_ttl(&object_id),
                    }
                    Ok(serde_json::to_vec(&Value::Null)?)
                }
            },
        }
    }
}

/// `RemoteCallSender` implementation over routed requests.
pub struct RoutedRemoteCallSender {
    routing: Arc<RoutingService>,
    timeout: Duration,
}

impl RoutedRemoteCallSender {
    pub fn new(routing: Arc<RoutingService>, timeout: Duration) -> Arc<Self> {
        Arc::new(Self { routing, timeout })
    }
}

#[async_trait]
impl RemoteCallSender for RoutedRemoteCallSender {
    async fn send_remote_call(
        &self,
        target: &NodeId,
        call: CallbackRemoteCall,
    ) -> CommResult<Value> {
        let payload = serde_json::to_vec(&PlatformPayload::Callback(call))?;
        let response = self
            .routing
            .perform_routed_request(payload, target, self.timeout)
            .await;
        if response.is_success() {
            Ok(serde_json::from_slice(response.content())?)
        } else {
            Err(CommunicationError::RemoteInvocation(format!(
                "call to '{target}' failed ({:?}): {}",
                response.result_code(),
                String::from_utf8_lossy(response.content())
            )))
        }
    }
}
