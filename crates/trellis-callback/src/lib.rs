//! Trellis Callback -- distributed object-lifetime service.
//!
//! A node registers local objects for remote invocation; remote nodes hold
//! proxies that forward calls back to the owner. Both sides keep weak
//! references plus a TTL, and a periodic sweep removes dead or expired
//! entries while pushing best-effort TTL renewals to the mirror table on
//! the peer.

pub mod object;
pub mod proxy;
pub mod service;
pub mod sweep;

pub use object::{CallbackObject, CallbackProxyHandle};
pub use proxy::{
    CallbackProxy, CallbackProxyService, CallbackRemoteCall, RemoteCallSender, RemoteSide,
};
pub use service::CallbackService;
pub use sweep::{spawn_sweep_task, sweep_once};
