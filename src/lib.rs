//! # Authmesh (Replicated Authentication Node)
//!
//! `authmesh` is one node of a horizontally scaled authentication service.
//! Every node keeps the full set of authenticated principals in memory and
//! tells its peers about each change, so any node can answer for any token.
//!
//! ## Admission
//!
//! Each HTTP request must lease one of a fixed number of slots before it is
//! handled. The slot pool and the slot-to-session map live inside a single
//! actor task (the arbiter); handlers talk to it over a channel. When the pool
//! is empty the request is rejected with `429 Too Many Requests`. A periodic
//! sweep reclaims slots whose lease outlived the request timeouts.
//!
//! ## Auth Cache & Propagation
//!
//! The auth cache maps access tokens to principals (users or registered
//! applications). Changes are applied locally first, then broadcast to every
//! other RPC-capable peer listed in Consul:
//!
//! - **`RPCAuth.Authenticate`:** add a principal under its token.
//! - **`RPCAuth.Unauthenticate`:** remove a principal's token.
//! - **`RPCAuth.GetAllAuthenticated`:** snapshot of the whole cache.
//!
//! Broadcasts are fire-and-forget: a failed peer is logged and skipped.
//!
//! ## Login
//!
//! `POST /v1/auth/login` exchanges an identity provider token for a verified
//! user through a [`auth::PrincipalVerifier`], attaches it to the caller's
//! session and announces it. Logged-in users may register application tokens,
//! which are announced the same way.
//!
//! ## Bootstrap
//!
//! On startup a node pulls the full cache from one peer, retrying while the
//! peer is unreachable. A node with no peers starts cold.

pub mod api;
pub mod arbiter;
pub mod auth;
pub mod cli;
pub mod discovery;
pub mod node;
pub mod propagation;
pub mod rpc;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with("authmesh/"));
        assert!(APP_USER_AGENT.ends_with(env!("CARGO_PKG_VERSION")));
    }
}
