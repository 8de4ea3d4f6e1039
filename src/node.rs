//! The state one process owns: the auth cache, the admission arbiter, the
//! propagation path to peers and the identity verifier. Built once at startup
//! and cloned into every HTTP handler.

use crate::{
    arbiter::{ArbiterError, ArbiterHandle},
    auth::{
        AuthCache, DisabledVerifier, Principal, PrincipalVerifier, RegisteredApp, Session,
        VerifyError,
    },
    propagation::{AuthChange, Propagate},
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum LoginError {
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error(transparent)]
    Arbiter(#[from] ArbiterError),
}

#[derive(Clone)]
pub struct Node {
    cache: AuthCache,
    arbiter: ArbiterHandle,
    propagate: Arc<dyn Propagate>,
    verifier: Arc<dyn PrincipalVerifier>,
}

impl Node {
    /// `propagate` must write to the same `cache`. Logins are refused until a
    /// verifier is attached with [`Node::with_verifier`].
    pub fn new(cache: AuthCache, arbiter: ArbiterHandle, propagate: Arc<dyn Propagate>) -> Self {
        Self {
            cache,
            arbiter,
            propagate,
            verifier: Arc::new(DisabledVerifier),
        }
    }

    #[must_use]
    pub fn with_verifier(mut self, verifier: Arc<dyn PrincipalVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    #[must_use]
    pub fn cache(&self) -> &AuthCache {
        &self.cache
    }

    #[must_use]
    pub fn arbiter(&self) -> &ArbiterHandle {
        &self.arbiter
    }

    /// Attach a verified principal to `session` and tell the fleet.
    ///
    /// Returns once the local cache and session store reflect the login; the
    /// peer fan-out continues in the background.
    ///
    /// # Errors
    /// Returns `ArbiterError::Closed` if the session could not be stored.
    pub async fn login(&self, session: Session, principal: Principal) -> Result<Session, ArbiterError> {
        let session = session.authenticate(principal.clone());
        self.arbiter.set_session(session.clone()).await?;
        // fan-out handle is dropped on purpose: errors are logged by the task
        drop(self.propagate.announce(AuthChange::Authenticated, principal).await);
        info!(session.id = %session.id, "session authenticated");
        Ok(session)
    }

    /// Verify `provider_token` and log the resulting user into `session`.
    ///
    /// The session id doubles as the user's access token.
    ///
    /// # Errors
    /// Returns `LoginError::Verify` if the provider does not vouch for the
    /// token, or `LoginError::Arbiter` if the session could not be stored.
    pub async fn login_with_token(
        &self,
        session: Session,
        provider_token: &str,
    ) -> Result<Session, LoginError> {
        let identity = self.verifier.verify(provider_token).await?;
        let principal = Principal::user(session.id.clone(), identity.email, identity.agent);
        Ok(self.login(session, principal).await?)
    }

    /// Detach the principal (if any) from `session` and tell the fleet.
    ///
    /// # Errors
    /// Returns `ArbiterError::Closed` if the session could not be stored.
    pub async fn logout(&self, session: Session) -> Result<Session, ArbiterError> {
        let principal = session.principal.clone();
        let session = session.clear();
        self.arbiter.set_session(session.clone()).await?;
        match principal {
            Some(principal) => {
                drop(
                    self.propagate
                        .announce(AuthChange::Unauthenticated, principal)
                        .await,
                );
                info!(session.id = %session.id, "session logged out");
            }
            None => debug!(session.id = %session.id, "logout of an anonymous session"),
        }
        Ok(session)
    }

    /// Keep an application credential and announce it in principal form.
    pub async fn register_app(&self, app: RegisteredApp) {
        let principal = app.to_principal();
        info!(app = %app.name, master = app.is_master, "registering app");
        self.cache.put_app(app).await;
        drop(
            self.propagate
                .announce(AuthChange::Authenticated, principal)
                .await,
        );
    }

    pub async fn revoke_app(&self, app: &RegisteredApp) {
        if self.cache.remove_app(app).await.is_none() {
            debug!(app = %app.name, "revoking an unknown app");
        }
        drop(
            self.propagate
                .announce(AuthChange::Unauthenticated, app.to_principal())
                .await,
        );
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        arbiter::{self, Admission, ArbiterConfig},
        auth::{verifier::VerifyFuture, Identity, PrincipalKind},
        propagation::BroadcastReport,
    };
    use anyhow::{anyhow, Result};
    use std::{future::Future, pin::Pin, sync::Mutex};
    use tokio::task::JoinHandle;

    /// Applies changes to the cache and records them instead of calling peers.
    #[derive(Debug, Default)]
    pub(crate) struct LocalOnly {
        cache: AuthCache,
        changes: Mutex<Vec<(AuthChange, String)>>,
    }

    impl LocalOnly {
        pub(crate) fn new(cache: AuthCache) -> Self {
            Self {
                cache,
                changes: Mutex::default(),
            }
        }

        pub(crate) fn changes(&self) -> Vec<(AuthChange, String)> {
            self.changes.lock().map(|c| c.clone()).unwrap_or_default()
        }
    }

    impl Propagate for LocalOnly {
        fn announce<'a>(
            &'a self,
            change: AuthChange,
            principal: Principal,
        ) -> Pin<Box<dyn Future<Output = JoinHandle<BroadcastReport>> + Send + 'a>> {
            Box::pin(async move {
                if let Ok(mut changes) = self.changes.lock() {
                    changes.push((change, principal.token.clone()));
                }
                match change {
                    AuthChange::Authenticated => self.cache.put(principal).await,
                    AuthChange::Unauthenticated => {
                        self.cache.remove(&principal).await;
                    }
                }
                tokio::spawn(async { BroadcastReport::default() })
            })
        }
    }

    /// Accepts `token-<name>` as `<name>@example.com`, rejects anything else.
    /// A configured delay makes every verification that slow.
    #[derive(Debug, Default)]
    pub(crate) struct StubVerifier {
        pub(crate) delay: Option<std::time::Duration>,
    }

    impl PrincipalVerifier for StubVerifier {
        fn verify<'a>(&'a self, provider_token: &'a str) -> VerifyFuture<'a> {
            Box::pin(async move {
                if let Some(delay) = self.delay {
                    tokio::time::sleep(delay).await;
                }
                match provider_token.strip_prefix("token-") {
                    Some(name) if !name.is_empty() => Ok(Identity {
                        email: format!("{name}@example.com"),
                        agent: "google".to_string(),
                    }),
                    _ => Err(VerifyError::Rejected),
                }
            })
        }
    }

    pub(crate) fn node(pool_size: usize) -> (Node, Arc<LocalOnly>) {
        let cache = AuthCache::new();
        let (handle, _task) = arbiter::spawn(&ArbiterConfig::new().with_pool_size(pool_size));
        let propagate = Arc::new(LocalOnly::new(cache.clone()));
        let node = Node::new(cache, handle, propagate.clone())
            .with_verifier(Arc::new(StubVerifier::default()));
        (node, propagate)
    }

    async fn fresh_session(node: &Node) -> Result<Session> {
        match node.arbiter().acquire("").await? {
            Admission::Granted { lease, session } => {
                node.arbiter().release(lease).await?;
                Ok(session)
            }
            Admission::Exhausted => Err(anyhow!("pool exhausted")),
        }
    }

    #[tokio::test]
    async fn login_stores_session_and_principal() -> Result<()> {
        let (node, propagate) = node(2);
        let session = fresh_session(&node).await?;
        let principal = Principal::user("t1", "a@example.com", "google");

        let session = node.login(session, principal.clone()).await?;
        assert!(session.authenticated);
        assert_eq!(node.cache().get("t1").await, Some(principal.clone()));
        assert_eq!(
            propagate.changes(),
            vec![(AuthChange::Authenticated, "t1".to_string())]
        );

        // the arbiter now hands out the authenticated session for this id
        match node.arbiter().acquire(&session.id).await? {
            Admission::Granted { session: stored, .. } => {
                assert_eq!(stored.principal, Some(principal));
            }
            Admission::Exhausted => return Err(anyhow!("pool exhausted")),
        }
        Ok(())
    }

    #[tokio::test]
    async fn verified_token_logs_in_under_the_session_id() -> Result<()> {
        let (node, propagate) = node(2);
        let session = fresh_session(&node).await?;
        let id = session.id.clone();

        let session = node.login_with_token(session, "token-alice").await?;
        let principal = session.principal.clone().ok_or_else(|| anyhow!("no principal"))?;
        assert_eq!(principal.token, id);
        assert_eq!(principal.email, "alice@example.com");
        assert!(node.cache().is_authenticated(&id).await);
        assert_eq!(propagate.changes(), vec![(AuthChange::Authenticated, id)]);
        Ok(())
    }

    #[tokio::test]
    async fn rejected_token_changes_nothing() -> Result<()> {
        let (node, propagate) = node(2);
        let session = fresh_session(&node).await?;

        let result = node.login_with_token(session, "forged").await;
        assert!(matches!(result, Err(LoginError::Verify(VerifyError::Rejected))));
        assert!(node.cache().is_empty().await);
        assert!(propagate.changes().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn node_without_verifier_refuses_logins() -> Result<()> {
        let cache = AuthCache::new();
        let (handle, _task) = arbiter::spawn(&ArbiterConfig::new());
        let node = Node::new(cache.clone(), handle, Arc::new(LocalOnly::new(cache)));
        let session = fresh_session(&node).await?;

        assert!(matches!(
            node.login_with_token(session, "token-alice").await,
            Err(LoginError::Verify(VerifyError::Unavailable))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn logout_clears_session_and_unauthenticates() -> Result<()> {
        let (node, propagate) = node(2);
        let session = fresh_session(&node).await?;
        let session = node
            .login(session, Principal::user("t1", "a@example.com", "google"))
            .await?;

        let session = node.logout(session).await?;
        assert!(!session.authenticated);
        assert!(session.principal.is_none());
        assert!(!node.cache().is_authenticated("t1").await);
        assert_eq!(propagate.changes().len(), 2);

        // anonymous logout announces nothing
        node.logout(session).await?;
        assert_eq!(propagate.changes().len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn master_app_registration_sets_master() -> Result<()> {
        let (node, _) = node(1);
        let app = RegisteredApp {
            token: "app-root".to_string(),
            name: "platform".to_string(),
            email: "ops@example.com".to_string(),
            description: String::new(),
            is_master: true,
        };

        node.register_app(app.clone()).await;
        let master = node.cache().master().await;
        assert_eq!(master.map(|m| m.kind), Some(PrincipalKind::PlatformApp));
        assert!(node.cache().snapshot().await.contains_key("app-root"));

        node.revoke_app(&app).await;
        assert!(node.cache().master().await.is_none());
        assert!(node.cache().snapshot().await.is_empty());
        Ok(())
    }
}
