//! Protocol parameters -- the timing and bounds every node operates under.
//!
//! Collected in one const struct so tests can assert the invariants between
//! them (e.g. the callback sweep must run often enough to renew a TTL
//! before it expires).

use std::time::Duration;

/// A complete protocol parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolParams {
    // -- Request/response --
    /// Sender-side request/response timeout in milliseconds.
    pub request_timeout_msec: u64,
    /// Timeout while waiting for a forwarded response at an intermediate hop.
    pub forwarding_timeout_msec: u64,

    // -- Connection health checks --
    /// Interval between health checks per connection.
    pub health_check_interval_msec: u64,
    /// Maximum random delay before an individual check, to spread load.
    /// Must stay below interval minus timeout so checks never overlap.
    pub health_check_max_jitter_msec: u64,
    /// Response timeout for a single health check.
    pub health_check_timeout_msec: u64,
    /// Consecutive failures before a connection is considered broken.
    pub health_check_failure_limit: u32,

    // -- Routing --
    /// Hop-count ceiling for flooded LSAs and forwarded requests.
    pub max_hop_count: u32,
    /// Bounded size of the recently-received message buffer.
    pub message_buffer_size: usize,

    // -- Callback lifetime --
    /// Time-to-live for callback objects and proxies in milliseconds.
    pub callback_ttl_msec: u64,
    /// The sweep runs this many times inside one TTL window.
    pub callback_sweep_divisor: u32,

    // -- Transport --
    /// Maximum frame size for byte-stream transports.
    pub max_frame_bytes: usize,
}

impl ProtocolParams {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_msec)
    }

    pub fn forwarding_timeout(&self) -> Duration {
        Duration::from_millis(self.forwarding_timeout_msec)
    }

    pub fn callback_ttl(&self) -> Duration {
        Duration::from_millis(self.callback_ttl_msec)
    }

    /// Sweep interval: TTL divided by the sweep divisor. Strictly shorter
    /// than the TTL, so every live entry gets at least one renewal
    /// opportunity per window.
    pub fn callback_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.callback_ttl_msec / self.callback_sweep_divisor as u64)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_msec)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_msec)
    }
}

/// Default parameter set.
pub const DEFAULT_PARAMS: ProtocolParams = ProtocolParams {
    request_timeout_msec: 30_000,
    forwarding_timeout_msec: 30_000,

    health_check_interval_msec: 15_000,
    health_check_max_jitter_msec: 9_000,
    health_check_timeout_msec: 5_000,
    health_check_failure_limit: 3,

    max_hop_count: 200,
    message_buffer_size: 50,

    callback_ttl_msec: 600_000,
    callback_sweep_divisor: 8,

    max_frame_bytes: 16 * 1024 * 1024,
};
