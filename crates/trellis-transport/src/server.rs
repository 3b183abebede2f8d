//! Server contact points -- bound, listening endpoints.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use trellis_model::{CommResult, NetworkContactPoint};

use crate::spi::{ConnectionEndpointHandler, TransportProvider};

/// A bound, listening endpoint: a contact point plus its endpoint handler
/// and an accept/reject flag. Transitions Stopped -> Started -> Stopped and
/// rejects connection attempts while stopped.
pub struct ServerContactPoint {
    ncp: NetworkContactPoint,
    endpoint_handler: Arc<dyn ConnectionEndpointHandler>,
    transport_provider: Arc<dyn TransportProvider>,
    accepting_messages: AtomicBool,
}

impl ServerContactPoint {
    pub fn new(
        transport_provider: Arc<dyn TransportProvider>,
        ncp: NetworkContactPoint,
        endpoint_handler: Arc<dyn ConnectionEndpointHandler>,
    ) -> Arc<Self> {
        Arc::new(Self {
            ncp,
            endpoint_handler,
            transport_provider,
            accepting_messages: AtomicBool::new(false),
        })
    }

    pub fn network_contact_point(&self) -> &NetworkContactPoint {
        &self.ncp
    }

    pub fn transport_id(&self) -> &str {
        &self.ncp.transport_id
    }

    pub fn endpoint_handler(&self) -> &Arc<dyn ConnectionEndpointHandler> {
        &self.endpoint_handler
    }

    pub fn is_accepting_messages(&self) -> bool {
        self.accepting_messages.load(Ordering::SeqCst)
    }

    pub fn set_accepting_messages(&self, accepting: bool) {
        self.accepting_messages.store(accepting, Ordering::SeqCst);
    }

    /// Start accepting connections at the configured contact point.
    pub fn start(self: &Arc<Self>) -> CommResult<()> {
        self.transport_provider.start_server(self)
    }

    /// Stop accepting connections.
    pub fn shut_down(self: &Arc<Self>) {
        self.transport_provider.stop_server(self);
    }
}

impl fmt::Display for ServerContactPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SCP (NCP='{}', listening={})",
            self.ncp,
            self.is_accepting_messages()
        )
    }
}
