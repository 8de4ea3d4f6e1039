//! Consul agent HTTP API client.

use super::{Directory, DiscoveryError, Peer, ServiceRegistration, RPC_META_KEY};
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::{collections::HashMap, time::Duration};
use tracing::{debug, instrument};
use url::Url;

const TOKEN_HEADER: &str = "X-Consul-Token";

#[derive(Debug, Deserialize)]
struct AgentService {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Service")]
    service: String,
    #[serde(rename = "Address", default)]
    address: String,
    #[serde(rename = "Port", default)]
    port: u16,
    #[serde(rename = "Meta", default)]
    meta: Option<HashMap<String, String>>,
}

/// Directory backed by the local Consul agent.
#[derive(Clone, Debug)]
pub struct ConsulDirectory {
    base: Url,
    token: Option<SecretString>,
    client: Client,
    // Agents report an empty address for services registered without one.
    fallback_host: String,
}

impl ConsulDirectory {
    /// Build a client for the agent at `url` (e.g. `http://127.0.0.1:8500`).
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be built.
    pub fn new(
        url: &str,
        token: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, DiscoveryError> {
        let mut base = Url::parse(url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let fallback_host = base.host_str().unwrap_or("127.0.0.1").to_string();

        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            base,
            token,
            client,
            fallback_host,
        })
    }

    fn with_token(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.header(TOKEN_HEADER, token.expose_secret()),
            None => request,
        }
    }

    /// Register (or re-register) a service instance with the agent.
    ///
    /// # Errors
    /// Returns an error if the agent is unreachable or rejects the registration.
    #[instrument(skip(self, registration), fields(service.id = %registration.id))]
    pub async fn register(&self, registration: &ServiceRegistration) -> Result<(), DiscoveryError> {
        let url = self.base.join("v1/agent/service/register")?;
        let response = self
            .with_token(self.client.put(url))
            .json(registration)
            .send()
            .await?;
        check(response).await?;
        debug!(name = %registration.name, port = registration.port, "service registered");
        Ok(())
    }

    /// Remove a service instance from the agent.
    ///
    /// # Errors
    /// Returns an error if the agent is unreachable or rejects the request.
    #[instrument(skip(self))]
    pub async fn deregister(&self, service_id: &str) -> Result<(), DiscoveryError> {
        let url = self
            .base
            .join(&format!("v1/agent/service/deregister/{service_id}"))?;
        let response = self.with_token(self.client.put(url)).send().await?;
        check(response).await?;
        Ok(())
    }
}

impl Directory for ConsulDirectory {
    async fn services(&self) -> Result<Vec<Peer>, DiscoveryError> {
        let url = self.base.join("v1/agent/services")?;
        let response = self.with_token(self.client.get(url)).send().await?;
        let services: HashMap<String, AgentService> = check(response).await?.json().await?;

        Ok(services
            .into_values()
            .map(|service| {
                let rpc_capable = service
                    .meta
                    .as_ref()
                    .is_some_and(|meta| meta.contains_key(RPC_META_KEY));
                let address = if service.address.is_empty() {
                    self.fallback_host.clone()
                } else {
                    service.address
                };
                Peer {
                    id: service.id,
                    service: service.service,
                    address,
                    port: service.port,
                    rpc_capable,
                }
            })
            .collect())
    }
}

async fn check(response: Response) -> Result<Response, DiscoveryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(DiscoveryError::Status {
        status: status.as_u16(),
        body,
    })
}
