use super::{procedure_path, AUTHENTICATE, GET_ALL_AUTHENTICATED, UNAUTHENTICATE};
use crate::{auth::Principal, discovery::Peer};
use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use std::{collections::HashMap, future::Future, time::Duration};
use thiserror::Error;
use tracing::{debug, instrument};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum RpcError {
    /// The connection to the peer could not be established. Nothing was
    /// delivered, so the call is safe to retry.
    #[error("peer {peer} unreachable: {source}")]
    Unreachable {
        peer: String,
        #[source]
        source: BoxError,
    },
    #[error("{procedure} to {peer} failed: {source}")]
    Transport {
        peer: String,
        procedure: &'static str,
        #[source]
        source: BoxError,
    },
    #[error("{procedure} to {peer} returned {status}")]
    Status {
        peer: String,
        procedure: &'static str,
        status: u16,
    },
    #[error("{procedure} to {peer} returned an invalid reply: {source}")]
    Decode {
        peer: String,
        procedure: &'static str,
        #[source]
        source: BoxError,
    },
}

impl RpcError {
    /// Whether the call failed before reaching the peer. A call that timed
    /// out after connecting may have been applied and is not transient.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }
}

/// Client side of the replication procedures.
pub trait PeerClient: Send + Sync + 'static {
    fn authenticate(
        &self,
        peer: &Peer,
        principal: &Principal,
    ) -> impl Future<Output = Result<bool, RpcError>> + Send;

    fn unauthenticate(
        &self,
        peer: &Peer,
        principal: &Principal,
    ) -> impl Future<Output = Result<bool, RpcError>> + Send;

    fn get_all_authenticated(
        &self,
        peer: &Peer,
    ) -> impl Future<Output = Result<HashMap<String, Principal>, RpcError>> + Send;
}

/// [`PeerClient`] speaking JSON over HTTP.
#[derive(Clone, Debug)]
pub struct HttpPeerClient {
    client: Client,
}

impl HttpPeerClient {
    /// Every call (connect included) is bounded by `timeout`.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    async fn call<B, R>(&self, peer: &Peer, procedure: &'static str, body: &B) -> Result<R, RpcError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", peer.endpoint(), procedure_path(procedure));
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|source| {
                if source.is_connect() {
                    RpcError::Unreachable {
                        peer: peer.id.clone(),
                        source: source.into(),
                    }
                } else {
                    RpcError::Transport {
                        peer: peer.id.clone(),
                        procedure,
                        source: source.into(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::Status {
                peer: peer.id.clone(),
                procedure,
                status: status.as_u16(),
            });
        }

        response.json::<R>().await.map_err(|source| RpcError::Decode {
            peer: peer.id.clone(),
            procedure,
            source: source.into(),
        })
    }
}

impl PeerClient for HttpPeerClient {
    #[instrument(skip(self, peer, principal), fields(peer.id = %peer.id))]
    async fn authenticate(&self, peer: &Peer, principal: &Principal) -> Result<bool, RpcError> {
        self.call(peer, AUTHENTICATE, principal).await
    }

    #[instrument(skip(self, peer, principal), fields(peer.id = %peer.id))]
    async fn unauthenticate(&self, peer: &Peer, principal: &Principal) -> Result<bool, RpcError> {
        self.call(peer, UNAUTHENTICATE, principal).await
    }

    #[instrument(skip(self, peer), fields(peer.id = %peer.id))]
    async fn get_all_authenticated(
        &self,
        peer: &Peer,
    ) -> Result<HashMap<String, Principal>, RpcError> {
        let snapshot: HashMap<String, Principal> =
            self.call(peer, GET_ALL_AUTHENTICATED, &true).await?;
        debug!(count = snapshot.len(), "fetched authenticated snapshot");
        Ok(snapshot)
    }
}
