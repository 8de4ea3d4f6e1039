//! Exchange of an identity provider's access token for a verified identity.
//!
//! The HTTP login route hands the provider token to a [`PrincipalVerifier`];
//! only a verified identity is ever attached to a session.

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::{future::Future, pin::Pin, time::Duration};
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

/// Who the provider says the token belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub email: String,
    pub agent: String,
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("identity provider rejected the token")]
    Rejected,
    #[error("no identity provider is configured")]
    Unavailable,
    #[error("identity provider returned {0}")]
    Status(u16),
    #[error("identity provider request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error(transparent)]
    Url(#[from] url::ParseError),
}

pub type VerifyFuture<'a> = Pin<Box<dyn Future<Output = Result<Identity, VerifyError>> + Send + 'a>>;

/// Turns a provider access token into an [`Identity`].
pub trait PrincipalVerifier: Send + Sync {
    fn verify<'a>(&'a self, provider_token: &'a str) -> VerifyFuture<'a>;
}

/// Refuses every login. Used when no provider is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledVerifier;

impl PrincipalVerifier for DisabledVerifier {
    fn verify<'a>(&'a self, _provider_token: &'a str) -> VerifyFuture<'a> {
        Box::pin(async { Err(VerifyError::Unavailable) })
    }
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    #[serde(default)]
    email: String,
}

/// Verifies tokens against an OAuth `userinfo` endpoint (bearer auth, JSON
/// reply carrying `email`).
#[derive(Clone, Debug)]
pub struct UserInfoVerifier {
    url: Url,
    agent: String,
    client: Client,
}

impl UserInfoVerifier {
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be built.
    pub fn new(url: &str, agent: impl Into<String>, timeout: Duration) -> Result<Self, VerifyError> {
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            url: Url::parse(url)?,
            agent: agent.into(),
            client,
        })
    }

    #[instrument(skip(self, provider_token), fields(agent = %self.agent))]
    async fn fetch(&self, provider_token: &str) -> Result<Identity, VerifyError> {
        let response = self
            .client
            .get(self.url.clone())
            .bearer_auth(provider_token)
            .send()
            .await?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => return Err(VerifyError::Rejected),
            status if !status.is_success() => return Err(VerifyError::Status(status.as_u16())),
            _ => {}
        }

        let info: UserInfo = response.json().await?;
        if info.email.is_empty() {
            debug!("userinfo reply carries no email");
            return Err(VerifyError::Rejected);
        }
        Ok(Identity {
            email: info.email,
            agent: self.agent.clone(),
        })
    }
}

impl PrincipalVerifier for UserInfoVerifier {
    fn verify<'a>(&'a self, provider_token: &'a str) -> VerifyFuture<'a> {
        Box::pin(self.fetch(provider_token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn can_bind_localhost() -> bool {
        std::net::TcpListener::bind("127.0.0.1:0").is_ok()
    }

    async fn verifier(server: &MockServer) -> Result<UserInfoVerifier> {
        Ok(UserInfoVerifier::new(
            &format!("{}/userinfo", server.uri()),
            "google",
            Duration::from_secs(2),
        )?)
    }

    #[tokio::test]
    async fn valid_token_yields_identity() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .and(header("authorization", "Bearer good-token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"email": "a@example.com", "name": "A"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let identity = verifier(&server).await?.verify("good-token").await?;
        assert_eq!(
            identity,
            Identity {
                email: "a@example.com".to_string(),
                agent: "google".to_string(),
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn unauthorized_token_is_rejected() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let result = verifier(&server).await?.verify("expired").await;
        assert!(matches!(result, Err(VerifyError::Rejected)), "{result:?}");
        Ok(())
    }

    #[tokio::test]
    async fn reply_without_email_is_rejected() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"sub": "1"})))
            .mount(&server)
            .await;

        let result = verifier(&server).await?.verify("token").await;
        assert!(matches!(result, Err(VerifyError::Rejected)), "{result:?}");
        Ok(())
    }

    #[tokio::test]
    async fn provider_outage_is_a_status_error() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let result = verifier(&server).await?.verify("token").await;
        assert!(matches!(result, Err(VerifyError::Status(502))), "{result:?}");
        Ok(())
    }

    #[tokio::test]
    async fn disabled_verifier_refuses_everything() {
        assert!(matches!(
            DisabledVerifier.verify("anything").await,
            Err(VerifyError::Unavailable)
        ));
    }
}
