//! Trellis Model -- node identity, contact points, message model, wire codec.
//!
//! Transport-independent types shared by every layer: requests and responses
//! with string/string metadata, the metadata vocabulary, and the protocol
//! parameter set all nodes operate under.

pub mod codec;
pub mod contact;
pub mod error;
pub mod ids;
pub mod message;
pub mod metadata;
pub mod node;
pub mod params;

pub use codec::{EnvelopeCodec, WireEnvelope};
pub use contact::NetworkContactPoint;
pub use error::CommunicationError;
pub use message::{NetworkRequest, NetworkResponse, ResultCode};
pub use metadata::MetaData;
pub use node::{NodeId, NodeInformation, NodeInformationRegistry};
pub use params::{ProtocolParams, DEFAULT_PARAMS};

/// Result alias for communication-layer operations.
pub type CommResult<T> = Result<T, CommunicationError>;
