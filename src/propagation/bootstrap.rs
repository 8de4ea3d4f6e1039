use crate::{
    auth::AuthCache,
    discovery::{rpc_peers, Directory, Peer},
    rpc::{PeerClient, RpcError},
};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{info, instrument, warn};

/// Fixed-delay retry budget for dialing the bootstrap peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// `attempts` counts the first call; zero is treated as one.
    #[must_use]
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(10, Duration::from_secs(10))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// No other RPC-capable node is registered.
    ColdStart,
    /// The cache was replaced by the snapshot of `peer`.
    Synced { peer: String, principals: usize },
    /// The directory could not be queried.
    Skipped,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("bootstrap peer {peer} unreachable after {attempts} attempts: {source}")]
    Exhausted {
        peer: String,
        attempts: u32,
        #[source]
        source: RpcError,
    },
    #[error("bootstrap from {peer} failed: {source}")]
    Protocol {
        peer: String,
        #[source]
        source: RpcError,
    },
}

/// One-shot pull of the full authenticated set from a single peer.
#[derive(Debug)]
pub struct Bootstrap<D, C> {
    cache: AuthCache,
    directory: Arc<D>,
    client: Arc<C>,
    self_id: String,
    rpc_service: String,
    policy: RetryPolicy,
}

impl<D: Directory, C: PeerClient> Bootstrap<D, C> {
    /// `self_id` and `rpc_service` are this node's RPC service id and name.
    pub fn new(
        cache: AuthCache,
        directory: Arc<D>,
        client: Arc<C>,
        self_id: impl Into<String>,
        rpc_service: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            directory,
            client,
            self_id: self_id.into(),
            rpc_service: rpc_service.into(),
            policy: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the local cache with a peer's snapshot.
    ///
    /// # Errors
    /// Returns `BootstrapError::Exhausted` if the peer stayed unreachable for
    /// the whole retry budget, or `BootstrapError::Protocol` on the first
    /// failure after a connection was made.
    #[instrument(skip(self), fields(rpc.id = %self.self_id))]
    pub async fn run(&self) -> Result<BootstrapOutcome, BootstrapError> {
        let peers = match rpc_peers(self.directory.as_ref(), &self.self_id).await {
            Ok(peers) => peers,
            Err(err) => {
                warn!(error = %err, "cannot list peers, starting with an empty cache");
                return Ok(BootstrapOutcome::Skipped);
            }
        };

        let Some(peer) = choose_peer(&peers, &self.rpc_service) else {
            info!("no peers registered, cold start");
            return Ok(BootstrapOutcome::ColdStart);
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.get_all_authenticated(peer).await {
                Ok(snapshot) => {
                    let principals = snapshot.len();
                    self.cache.put_all(snapshot).await;
                    info!(peer.id = %peer.id, principals, attempt, "auth cache bootstrapped");
                    return Ok(BootstrapOutcome::Synced {
                        peer: peer.id.clone(),
                        principals,
                    });
                }
                Err(err) if err.is_transient() => {
                    if attempt >= self.policy.attempts {
                        return Err(BootstrapError::Exhausted {
                            peer: peer.id.clone(),
                            attempts: attempt,
                            source: err,
                        });
                    }
                    warn!(
                        peer.id = %peer.id,
                        attempt,
                        max_attempts = self.policy.attempts,
                        error = %err,
                        "bootstrap peer unreachable, retrying in {:?}",
                        self.policy.delay
                    );
                    tokio::time::sleep(self.policy.delay).await;
                }
                Err(err) => {
                    return Err(BootstrapError::Protocol {
                        peer: peer.id.clone(),
                        source: err,
                    });
                }
            }
        }
    }
}

/// Same-service peers first, then lowest id. `peers` is sorted by id.
fn choose_peer<'a>(peers: &'a [Peer], rpc_service: &str) -> Option<&'a Peer> {
    peers
        .iter()
        .find(|peer| peer.service == rpc_service)
        .or_else(|| peers.first())
}
