//! Communication-layer error taxonomy.
//!
//! Connection errors are a single kind split into "could not connect" and
//! "broken mid-use". Protocol-level failures cross the wire as response
//! result codes instead (see `message`).

use crate::node::NodeId;

#[derive(Debug, thiserror::Error)]
pub enum CommunicationError {
    #[error("invalid contact point '{input}': {reason}")]
    InvalidContactPoint { input: String, reason: String },
    #[error("no transport registered for id '{0}'")]
    UnknownTransport(String),
    #[error("could not connect: {0}")]
    CouldNotConnect(String),
    #[error("connection '{connection_id}' is broken: {reason}")]
    ConnectionBroken {
        connection_id: String,
        reason: String,
    },
    #[error("no route from '{from}' to '{to}'")]
    NoRouteToNode { from: NodeId, to: NodeId },
    #[error("callback object '{0}' is not reachable anymore")]
    UnknownCallbackObject(String),
    #[error("method '{method}' is not remotely invokable on '{interface}'")]
    CallbackMethodNotAllowed {
        interface: &'static str,
        method: String,
    },
    #[error("no local implementation registered for service '{0}'")]
    ServiceNotAvailable(&'static str),
    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("remote invocation failed: {0}")]
    RemoteInvocation(String),
}

impl CommunicationError {
    /// Shorthand used where a free-form connect failure is raised.
    pub fn could_not_connect(reason: impl Into<String>) -> Self {
        CommunicationError::CouldNotConnect(reason.into())
    }
}

/// Required by `tokio_util::codec::{Decoder, Encoder}`, whose associated
/// `Error` type must be `From<std::io::Error>`. A byte-stream IO failure
/// during framing is a mid-use connection breakage.
impl From<std::io::Error> for CommunicationError {
    fn from(err: std::io::Error) -> Self {
        CommunicationError::ConnectionBroken {
            connection_id: String::new(),
            reason: err.to_string(),
        }
    }
}
