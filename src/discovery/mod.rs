//! Peer discovery through the service directory.
//!
//! Every node registers two services: its HTTP API and its replication RPC
//! listener. Only the latter carries the [`RPC_META_KEY`] marker, and only
//! services carrying it are treated as replication peers.

pub mod consul;

use std::{collections::HashMap, future::Future};
use thiserror::Error;
use ulid::Ulid;

pub use self::consul::ConsulDirectory;

/// Service meta key marking a replication RPC listener.
pub const RPC_META_KEY: &str = "RPCService";

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("discovery request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("discovery returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid discovery url: {0}")]
    Url(#[from] url::ParseError),
}

/// A service instance as reported by the directory. Rebuilt on every query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Peer {
    pub id: String,
    pub service: String,
    pub address: String,
    pub port: u16,
    pub rpc_capable: bool,
}

impl Peer {
    #[must_use]
    pub fn endpoint(&self) -> String {
        if self.address.contains(':') {
            format!("http://[{}]:{}", self.address, self.port)
        } else {
            format!("http://{}:{}", self.address, self.port)
        }
    }
}

/// Read side of the service directory.
pub trait Directory: Send + Sync + 'static {
    /// Every registered service instance, in no particular order.
    fn services(&self) -> impl Future<Output = Result<Vec<Peer>, DiscoveryError>> + Send;
}

/// RPC-capable peers other than `self_id`, sorted by id.
///
/// # Errors
/// Returns the directory error if the listing fails.
pub async fn rpc_peers<D: Directory>(
    directory: &D,
    self_id: &str,
) -> Result<Vec<Peer>, DiscoveryError> {
    let mut peers: Vec<Peer> = directory
        .services()
        .await?
        .into_iter()
        .filter(|peer| peer.rpc_capable && peer.id != self_id)
        .collect();
    peers.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(peers)
}

/// Registration payload for one service instance.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct ServiceRegistration {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Address", skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(rename = "Port")]
    pub port: u16,
    #[serde(rename = "Tags")]
    pub tags: Vec<String>,
    #[serde(rename = "Meta")]
    pub meta: HashMap<String, String>,
}

/// Names and instance-unique ids this node registers under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceIdentity {
    name: String,
    instance: String,
}

impl ServiceIdentity {
    /// Identity with a fresh ULID instance id.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_instance(name, Ulid::new().to_string().to_lowercase())
    }

    #[must_use]
    pub fn with_instance(name: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instance: instance.into(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn instance(&self) -> &str {
        &self.instance
    }

    #[must_use]
    pub fn http_id(&self) -> String {
        format!("{}-{}", self.name, self.instance)
    }

    #[must_use]
    pub fn rpc_name(&self) -> String {
        format!("{}-rpc", self.name)
    }

    #[must_use]
    pub fn rpc_id(&self) -> String {
        format!("{}-{}", self.rpc_name(), self.instance)
    }

    /// HTTP and RPC registrations, in that order.
    #[must_use]
    pub fn registrations(
        &self,
        http_port: u16,
        rpc_port: u16,
        address: Option<&str>,
    ) -> [ServiceRegistration; 2] {
        let address = address.map(ToString::to_string);
        let http = ServiceRegistration {
            id: self.http_id(),
            name: self.name.clone(),
            address: address.clone(),
            port: http_port,
            tags: vec![self.name.clone()],
            meta: HashMap::new(),
        };
        let rpc = ServiceRegistration {
            id: self.rpc_id(),
            name: self.rpc_name(),
            address,
            port: rpc_port,
            tags: vec![self.rpc_name()],
            meta: HashMap::from([(RPC_META_KEY.to_string(), "yes".to_string())]),
        };
        [http, rpc]
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    /// In-memory directory for tests across the crate.
    #[derive(Clone, Debug, Default)]
    pub(crate) struct StaticDirectory {
        peers: Vec<Peer>,
        fail: bool,
        calls: Arc<AtomicUsize>,
    }

    impl StaticDirectory {
        pub(crate) fn new(peers: Vec<Peer>) -> Self {
            Self {
                peers,
                ..Self::default()
            }
        }

        pub(crate) fn unreachable() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Directory for StaticDirectory {
        async fn services(&self) -> Result<Vec<Peer>, DiscoveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(DiscoveryError::Status {
                    status: 503,
                    body: "directory unavailable".to_string(),
                });
            }
            Ok(self.peers.clone())
        }
    }

    pub(crate) fn peer(id: &str, rpc_capable: bool) -> Peer {
        Peer {
            id: id.to_string(),
            service: if rpc_capable { "authmesh-rpc" } else { "authmesh" }.to_string(),
            address: "127.0.0.1".to_string(),
            port: 9090,
            rpc_capable,
        }
    }

    #[tokio::test]
    async fn rpc_peers_excludes_self_and_plain_services() -> anyhow::Result<()> {
        let directory = StaticDirectory::new(vec![
            peer("authmesh-rpc-b", true),
            peer("authmesh-a", false),
            peer("authmesh-rpc-a", true),
            peer("authmesh-rpc-self", true),
        ]);

        let peers = rpc_peers(&directory, "authmesh-rpc-self").await?;
        let ids: Vec<&str> = peers.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["authmesh-rpc-a", "authmesh-rpc-b"]);
        Ok(())
    }

    #[test]
    fn identity_registrations_mark_only_rpc() {
        let identity = ServiceIdentity::with_instance("authmesh", "01abc");
        let [http, rpc] = identity.registrations(8080, 9090, Some("10.0.0.5"));

        assert_eq!(http.id, "authmesh-01abc");
        assert_eq!(http.port, 8080);
        assert!(http.meta.is_empty());

        assert_eq!(rpc.id, "authmesh-rpc-01abc");
        assert_eq!(rpc.name, "authmesh-rpc");
        assert_eq!(rpc.port, 9090);
        assert_eq!(rpc.meta.get(RPC_META_KEY).map(String::as_str), Some("yes"));
        assert_eq!(rpc.address.as_deref(), Some("10.0.0.5"));
    }

    #[test]
    fn registration_uses_directory_field_names() -> anyhow::Result<()> {
        let identity = ServiceIdentity::with_instance("authmesh", "01abc");
        let [http, _] = identity.registrations(8080, 9090, None);
        let json = serde_json::to_value(&http)?;
        assert_eq!(json["ID"], "authmesh-01abc");
        assert_eq!(json["Name"], "authmesh");
        assert_eq!(json["Port"], 8080);
        assert!(json.get("Address").is_none());
        Ok(())
    }

    #[test]
    fn peer_endpoint_brackets_ipv6() {
        let mut p = peer("x", true);
        assert_eq!(p.endpoint(), "http://127.0.0.1:9090");
        p.address = "::1".to_string();
        assert_eq!(p.endpoint(), "http://[::1]:9090");
    }
}
