//! Network contact points -- `"transportId:host:port"` addresses.
//!
//! Grammar: transport id from `[\w-]+`, host from `[\w.-]+`, port a decimal
//! in 1..=65535. Malformed strings fail with `InvalidContactPoint`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CommunicationError;

/// A location a transport can connect to: `{transport_id, host, port}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkContactPoint {
    pub transport_id: String,
    pub host: String,
    pub port: u16,
}

impl NetworkContactPoint {
    pub fn new(transport_id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            transport_id: transport_id.into(),
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NetworkContactPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.transport_id, self.host, self.port)
    }
}

fn is_transport_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn is_host_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.'
}

impl FromStr for NetworkContactPoint {
    type Err = CommunicationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| CommunicationError::InvalidContactPoint {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        let mut parts = s.split(':');
        let transport = parts.next().unwrap_or("");
        let host = parts.next().ok_or_else(|| invalid("missing host"))?;
        let port = parts.next().ok_or_else(|| invalid("missing port"))?;
        if parts.next().is_some() {
            return Err(invalid("too many ':' separators"));
        }

        if transport.is_empty() || !transport.chars().all(is_transport_char) {
            return Err(invalid("transport id must match [\\w-]+"));
        }
        if host.is_empty() || !host.chars().all(is_host_char) {
            return Err(invalid("host must match [\\w.-]+"));
        }
        if port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid("port must be decimal digits"));
        }
        let port: u32 = port.parse().map_err(|_| invalid("port out of range"))?;
        if port == 0 || port > u16::MAX as u32 {
            return Err(invalid("port must be in 1..=65535"));
        }

        Ok(NetworkContactPoint {
            transport_id: transport.to_string(),
            host: host.to_string(),
            port: port as u16,
        })
    }
}
