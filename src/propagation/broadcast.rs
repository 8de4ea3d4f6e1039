use super::{AuthChange, Propagate};
use crate::{
    auth::{AuthCache, Principal},
    discovery::{rpc_peers, Directory},
    rpc::PeerClient,
};
use std::{future::Future, pin::Pin, sync::Arc};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// What a fan-out managed to do. Only used for logs and tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub attempted: usize,
    pub delivered: usize,
}

/// Pushes local authentication changes to every RPC-capable peer.
#[derive(Debug)]
pub struct Broadcaster<D, C> {
    cache: AuthCache,
    directory: Arc<D>,
    client: Arc<C>,
    self_id: String,
}

impl<D: Directory, C: PeerClient> Broadcaster<D, C> {
    /// `self_id` is this node's RPC service id; it is never sent to.
    pub fn new(
        cache: AuthCache,
        directory: Arc<D>,
        client: Arc<C>,
        self_id: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            directory,
            client,
            self_id: self_id.into(),
        }
    }

    /// Apply locally, then spawn the fan-out and return without waiting for it.
    pub async fn broadcast(
        &self,
        change: AuthChange,
        principal: Principal,
    ) -> JoinHandle<BroadcastReport> {
        match change {
            AuthChange::Authenticated => self.cache.put(principal.clone()).await,
            AuthChange::Unauthenticated => {
                self.cache.remove(&principal).await;
            }
        }

        let directory = Arc::clone(&self.directory);
        let client = Arc::clone(&self.client);
        let self_id = self.self_id.clone();
        tokio::spawn(async move {
            fan_out(directory.as_ref(), client.as_ref(), &self_id, change, &principal).await
        })
    }
}

impl<D: Directory, C: PeerClient> Propagate for Broadcaster<D, C> {
    fn announce<'a>(
        &'a self,
        change: AuthChange,
        principal: Principal,
    ) -> Pin<Box<dyn Future<Output = JoinHandle<BroadcastReport>> + Send + 'a>> {
        Box::pin(self.broadcast(change, principal))
    }
}

async fn fan_out<D: Directory, C: PeerClient>(
    directory: &D,
    client: &C,
    self_id: &str,
    change: AuthChange,
    principal: &Principal,
) -> BroadcastReport {
    let peers = match rpc_peers(directory, self_id).await {
        Ok(peers) => peers,
        Err(err) => {
            warn!(error = %err, ?change, "cannot list peers, change not propagated");
            return BroadcastReport::default();
        }
    };

    let mut report = BroadcastReport::default();
    for peer in &peers {
        report.attempted += 1;
        let result = match change {
            AuthChange::Authenticated => client.authenticate(peer, principal).await,
            AuthChange::Unauthenticated => client.unauthenticate(peer, principal).await,
        };
        match result {
            Ok(true) => report.delivered += 1,
            Ok(false) => warn!(peer.id = %peer.id, ?change, "peer did not acknowledge"),
            Err(err) => error!(peer.id = %peer.id, ?change, error = %err, "propagation failed"),
        }
    }

    debug!(
        ?change,
        attempted = report.attempted,
        delivered = report.delivered,
        "propagation finished"
    );
    report
}
