use super::Principal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Per-client continuity record. May exist without an authenticated principal.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Session {
    pub id: String,
    pub authenticated: bool,
    pub principal: Option<Principal>,
}

impl Session {
    /// Fresh unauthenticated session keyed by a random UUID.
    #[must_use]
    pub fn mint() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            authenticated: false,
            principal: None,
        }
    }

    #[must_use]
    pub fn authenticate(mut self, principal: Principal) -> Self {
        self.authenticated = true;
        self.principal = Some(principal);
        self
    }

    #[must_use]
    pub fn clear(mut self) -> Self {
        self.authenticated = false;
        self.principal = None;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_sessions_are_unique_and_anonymous() {
        let a = Session::mint();
        let b = Session::mint();
        assert_ne!(a.id, b.id);
        assert!(!a.authenticated);
        assert!(a.principal.is_none());
    }

    #[test]
    fn authenticate_then_clear_keeps_id() {
        let session = Session::mint();
        let id = session.id.clone();
        let session = session.authenticate(Principal::user("t1", "a@example.com", "google"));
        assert!(session.authenticated);
        let session = session.clear();
        assert_eq!(session.id, id);
        assert!(!session.authenticated);
        assert!(session.principal.is_none());
    }
}
