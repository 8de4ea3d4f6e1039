//! Authentication state shared by the HTTP and RPC surfaces.

pub mod cache;
pub mod principal;
pub mod session;
pub mod verifier;

pub use self::cache::AuthCache;
pub use self::principal::{PLATFORM_AGENT, Principal, PrincipalKind, RegisteredApp};
pub use self::session::Session;
pub use self::verifier::{
    DisabledVerifier, Identity, PrincipalVerifier, UserInfoVerifier, VerifyError,
};

/// Name of the cookie carrying the session id.
pub const SESSION_COOKIE: &str = "auth-token";
