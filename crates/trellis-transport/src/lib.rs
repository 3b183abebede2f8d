//! Trellis Transport -- transport SPI, connection service, virtual transport.
//!
//! A transport provider turns a contact point into a live connection after a
//! synchronous node-information handshake. Connections are reusable,
//! thread-safe request/response channels; all sends are asynchronous and
//! resolve through exactly-once delivery, including synthesized failures.

pub mod service;
pub mod spi;
pub mod virtual_transport;

mod server;

pub use server::ServerContactPoint;
pub use service::{ConnectionListener, ConnectionService, RequestHandler};
pub use spi::{
    BrokenConnectionListener, ConnectionEndpointHandler, NetworkConnection, RawDelivery,
    RawResponder, TransportProvider,
};
pub use virtual_transport::{VirtualTransport, VIRTUAL_TRANSPORT_ID};
