//! Periodic TTL sweep over both callback tables.
//!
//! The sweep itself runs under each table's lock; renewal pushes to remote
//! peers happen afterwards and are strictly best-effort -- an unreachable
//! peer is logged and skipped so one broken node never halts cleanup for
//! the rest.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use trellis_model::NodeId;

use crate::proxy::{CallbackProxyService, CallbackRemoteCall, RemoteCallSender, RemoteSide};
use crate::service::CallbackService;

/// Run one sweep pass over both tables and push TTL renewals for the
/// survivors to their peers.
pub async fn sweep_once(
    callback_service: &CallbackService,
    proxy_service: &CallbackProxyService,
    sender: &Arc<dyn RemoteCallSender>,
    now: Instant,
) {
    // object survivors renew their proxy records on the proxy holder;
    // proxy survivors renew their object records on the owner
    let object_report = callback_service.sweep(now);
    let proxy_report = proxy_service.sweep(now);

    push_renewals(sender, object_report.renewals, RemoteSide::Proxy).await;
    push_renewals(sender, proxy_report.renewals, RemoteSide::Object).await;
}

async fn push_renewals(
    sender: &Arc<dyn RemoteCallSender>,
    renewals: Vec<(String, NodeId)>,
    side: RemoteSide,
) {
    for (object_id, peer) in renewals {
        let call = CallbackRemoteCall::RenewTtl {
            object_id: object_id.clone(),
            side,
        };
        if let Err(e) = sender.send_remote_call(&peer, call).await {
            tracing::warn!(
                %peer,
                object_id = %object_id,
                error = %e,
                "TTL renewal failed, skipping peer"
            );
        }
    }
}

/// Spawn the periodic sweep task. The task ends when both services have
/// been dropped; aborting the returned handle stops it earlier.
pub fn spawn_sweep_task(
    callback_service: &Arc<CallbackService>,
    proxy_service: &Arc<CallbackProxyService>,
    sender: Arc<dyn RemoteCallSender>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    let callback_service: Weak<CallbackService> = Arc::downgrade(callback_service);
    let proxy_service: Weak<CallbackProxyService> = Arc::downgrade(proxy_service);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let (Some(objects), Some(proxies)) =
                (callback_service.upgrade(), proxy_service.upgrade())
            else {
                break;
            };
            sweep_once(&objects, &proxies, &sender, Instant::now()).await;
        }
    })
}
