//! Authenticated identities and registered application credentials.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Issuing agent recorded on principals minted from registered apps.
pub const PLATFORM_AGENT: &str = "platform";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum PrincipalKind {
    /// Human user logged in through an OAuth provider.
    User,
    /// Registered application acting with its own token.
    App,
    /// The platform's own application; holds elevated rights.
    PlatformApp,
}

/// An authenticated identity keyed by its opaque token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Principal {
    pub token: String,
    pub kind: PrincipalKind,
    pub email: String,
    pub agent: String,
}

impl Principal {
    #[must_use]
    pub fn new(
        token: impl Into<String>,
        kind: PrincipalKind,
        email: impl Into<String>,
        agent: impl Into<String>,
    ) -> Self {
        Self {
            token: token.into(),
            kind,
            email: email.into(),
            agent: agent.into(),
        }
    }

    #[must_use]
    pub fn user(token: impl Into<String>, email: impl Into<String>, agent: impl Into<String>) -> Self {
        Self::new(token, PrincipalKind::User, email, agent)
    }

    #[must_use]
    pub fn is_platform_app(&self) -> bool {
        self.kind == PrincipalKind::PlatformApp
    }
}

/// Application credential kept in its own namespace of the auth cache.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RegisteredApp {
    pub token: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_master: bool,
}

impl RegisteredApp {
    /// Principal form used when the app is shared with peers.
    #[must_use]
    pub fn to_principal(&self) -> Principal {
        let kind = if self.is_master {
            PrincipalKind::PlatformApp
        } else {
            PrincipalKind::App
        };
        Principal::new(self.token.clone(), kind, self.email.clone(), PLATFORM_AGENT)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_kebab_case() {
        let principal = Principal::new("t1", PrincipalKind::PlatformApp, "ops@example.com", "google");
        let json = serde_json::to_value(&principal).unwrap();
        assert_eq!(json["kind"], "platform-app");
        assert_eq!(json["token"], "t1");
    }

    #[test]
    fn master_app_becomes_platform_app() {
        let app = RegisteredApp {
            token: "app-token".to_string(),
            name: "ingest".to_string(),
            email: "ingest@example.com".to_string(),
            description: String::new(),
            is_master: true,
        };
        let principal = app.to_principal();
        assert!(principal.is_platform_app());
        assert_eq!(principal.agent, PLATFORM_AGENT);

        let regular = RegisteredApp {
            is_master: false,
            ..app
        };
        assert_eq!(regular.to_principal().kind, PrincipalKind::App);
    }
}
