//! In-memory record of who is currently authenticated on this node.
//!
//! Every local handler and every inbound RPC request goes through the same
//! mutex. Writes are last-writer-wins per token; there is no TTL and no
//! versioning, so replicas converge only through broadcasts and bootstrap pulls.

use super::{Principal, RegisteredApp};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Default)]
struct Inner {
    principals: HashMap<String, Principal>,
    apps: HashMap<String, RegisteredApp>,
    // Mirror of the platform-app principal for O(1) lookup.
    master: Option<Principal>,
}

/// Shared token -> principal store. Clones share the same state.
#[derive(Clone, Debug, Default)]
pub struct AuthCache {
    inner: Arc<Mutex<Inner>>,
}

impl AuthCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, token: &str) -> Option<Principal> {
        self.inner.lock().await.principals.get(token).cloned()
    }

    pub async fn is_authenticated(&self, token: &str) -> bool {
        self.inner.lock().await.principals.contains_key(token)
    }

    /// Insert or replace the principal stored under its token.
    ///
    /// Overwriting the master's token with a non-platform principal demotes it.
    pub async fn put(&self, principal: Principal) {
        let mut inner = self.inner.lock().await;
        if principal.is_platform_app() {
            inner.master = Some(principal.clone());
        } else if inner
            .master
            .as_ref()
            .is_some_and(|m| m.token == principal.token)
        {
            inner.master = None;
        }
        inner.principals.insert(principal.token.clone(), principal);
    }

    /// Replace the whole principal namespace with `principals`.
    ///
    /// This is a full overwrite, not a merge. The master pointer is recomputed
    /// from the new contents (lowest token wins if several platform apps exist).
    pub async fn put_all(&self, principals: HashMap<String, Principal>) {
        let master = principals
            .values()
            .filter(|p| p.is_platform_app())
            .min_by(|a, b| a.token.cmp(&b.token))
            .cloned();

        let mut inner = self.inner.lock().await;
        debug!(
            previous = inner.principals.len(),
            replaced = principals.len(),
            "auth cache replaced"
        );
        inner.principals = principals;
        inner.master = master;
    }

    pub async fn remove(&self, principal: &Principal) -> Option<Principal> {
        let mut inner = self.inner.lock().await;
        if inner
            .master
            .as_ref()
            .is_some_and(|m| m.token == principal.token)
        {
            inner.master = None;
        }
        inner.principals.remove(&principal.token)
    }

    pub async fn put_app(&self, app: RegisteredApp) {
        self.inner.lock().await.apps.insert(app.token.clone(), app);
    }

    pub async fn app(&self, token: &str) -> Option<RegisteredApp> {
        self.inner.lock().await.apps.get(token).cloned()
    }

    pub async fn remove_app(&self, app: &RegisteredApp) -> Option<RegisteredApp> {
        self.inner.lock().await.apps.remove(&app.token)
    }

    /// Full token-keyed view: principals plus registered apps in principal form.
    /// An app shadows a principal with the same token.
    pub async fn snapshot(&self) -> HashMap<String, Principal> {
        let inner = self.inner.lock().await;
        let mut all = inner.principals.clone();
        for (token, app) in &inner.apps {
            all.insert(token.clone(), app.to_principal());
        }
        all
    }

    pub async fn master(&self) -> Option<Principal> {
        self.inner.lock().await.master.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.principals.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.principals.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::PrincipalKind;
    use std::collections::HashSet;

    fn user(token: &str, email: &str) -> Principal {
        Principal::user(token, email, "google")
    }

    #[tokio::test]
    async fn put_then_get_then_remove() {
        let cache = AuthCache::new();
        let p = user("t1", "a@example.com");

        cache.put(p.clone()).await;
        assert_eq!(cache.get("t1").await, Some(p.clone()));
        assert!(cache.is_authenticated("t1").await);

        assert_eq!(cache.remove(&p).await, Some(p));
        assert_eq!(cache.get("t1").await, None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn later_write_replaces_without_merging() {
        let cache = AuthCache::new();
        cache.put(user("t1", "first@example.com")).await;
        let later = Principal::new("t1", PrincipalKind::App, "second@example.com", "github");
        cache.put(later.clone()).await;

        assert_eq!(cache.get("t1").await, Some(later));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn platform_app_is_mirrored_as_master() {
        let cache = AuthCache::new();
        assert!(cache.master().await.is_none());

        let master = Principal::new("m1", PrincipalKind::PlatformApp, "ops@example.com", "platform");
        cache.put(user("t1", "a@example.com")).await;
        cache.put(master.clone()).await;
        assert_eq!(cache.master().await, Some(master.clone()));

        cache.remove(&master).await;
        assert!(cache.master().await.is_none());
    }

    #[tokio::test]
    async fn overwriting_master_token_with_a_user_demotes_it() {
        let cache = AuthCache::new();
        let master = Principal::new("m1", PrincipalKind::PlatformApp, "ops@example.com", "platform");
        cache.put(master.clone()).await;

        // unrelated writes leave the master alone
        cache.put(user("t1", "a@example.com")).await;
        assert_eq!(cache.master().await, Some(master));

        cache.put(user("m1", "someone@example.com")).await;
        assert!(cache.master().await.is_none());
        assert_eq!(
            cache.get("m1").await.map(|p| p.kind),
            Some(PrincipalKind::User)
        );
    }

    #[tokio::test]
    async fn registered_app_is_found_by_token() {
        let cache = AuthCache::new();
        let app = RegisteredApp {
            token: "app-1".to_string(),
            name: "reports".to_string(),
            email: "reports@example.com".to_string(),
            description: String::new(),
            is_master: false,
        };
        cache.put_app(app.clone()).await;

        assert_eq!(cache.app("app-1").await, Some(app.clone()));
        assert_eq!(cache.app("t1").await, None);
        cache.remove_app(&app).await;
        assert_eq!(cache.app("app-1").await, None);
    }

    #[tokio::test]
    async fn put_all_overwrites_everything() {
        let cache = AuthCache::new();
        cache.put(user("stale", "old@example.com")).await;
        cache
            .put(Principal::new("m0", PrincipalKind::PlatformApp, "ops@example.com", "platform"))
            .await;

        let mut incoming = HashMap::new();
        incoming.insert("t1".to_string(), user("t1", "a@example.com"));
        incoming.insert("t2".to_string(), user("t2", "b@example.com"));
        cache.put_all(incoming).await;

        assert_eq!(cache.get("stale").await, None);
        assert_eq!(cache.len().await, 2);
        assert!(cache.master().await.is_none());
    }

    #[tokio::test]
    async fn snapshot_round_trips_into_fresh_cache() {
        let source = AuthCache::new();
        source.put(user("t1", "a@example.com")).await;
        source.put(user("t2", "b@example.com")).await;
        source
            .put_app(RegisteredApp {
                token: "app-1".to_string(),
                name: "reports".to_string(),
                email: "reports@example.com".to_string(),
                description: String::new(),
                is_master: true,
            })
            .await;

        let snapshot = source.snapshot().await;
        let fresh = AuthCache::new();
        fresh.put_all(snapshot.clone()).await;

        let expected: HashSet<String> = snapshot.keys().cloned().collect();
        let actual: HashSet<String> = fresh.snapshot().await.keys().cloned().collect();
        assert_eq!(expected, actual);
        assert_eq!(
            fresh.get("app-1").await.map(|p| p.kind),
            Some(PrincipalKind::PlatformApp)
        );
        assert_eq!(fresh.master().await.map(|p| p.token), Some("app-1".to_string()));
    }

    #[tokio::test]
    async fn removed_app_leaves_snapshot() {
        let cache = AuthCache::new();
        let app = RegisteredApp {
            token: "app-1".to_string(),
            name: "reports".to_string(),
            email: "reports@example.com".to_string(),
            description: String::new(),
            is_master: false,
        };
        cache.put_app(app.clone()).await;
        assert!(cache.snapshot().await.contains_key("app-1"));

        cache.remove_app(&app).await;
        assert!(cache.snapshot().await.is_empty());
    }
}
