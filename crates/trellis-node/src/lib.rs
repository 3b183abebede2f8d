//! Trellis Node -- assembly of one platform node.
//!
//! Wires the model, transport, routing and callback layers into a running
//! node behind the `CommunicationService` facade. All collaborators are
//! injected explicitly at construction; there is no global service state.

pub mod communication;
pub mod config;
pub mod management;
pub mod node;
pub mod payload;
pub mod registry;

pub use communication::{
    CommunicationService, NetworkStateModel, NetworkStateNode, RemoteServiceProxy, ServiceHandle,
};
pub use config::NodeConfig;
pub use management::ManagementService;
pub use node::PlatformNode;
pub use payload::{PlatformPayload, PlatformPayloadHandler, RoutedRemoteCallSender};
pub use registry::ServiceRegistry;
