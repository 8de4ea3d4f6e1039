//! Replication protocol spoken between peers.
//!
//! Three procedures over JSON/HTTP on a dedicated port:
//!
//! | Procedure | Request | Reply |
//! |---|---|---|
//! | `RPCAuth.Authenticate` | `Principal` | `true` |
//! | `RPCAuth.Unauthenticate` | `Principal` | `true` |
//! | `RPCAuth.GetAllAuthenticated` | `bool` (ignored) | `{token: Principal}` |
//!
//! Handlers never send a negative acknowledgement. A failed call is always a
//! transport-level failure seen by the client.

pub mod client;
pub mod server;

pub use self::client::{BoxError, HttpPeerClient, PeerClient, RpcError};
pub use self::server::{router, serve};

pub const AUTHENTICATE: &str = "RPCAuth.Authenticate";
pub const UNAUTHENTICATE: &str = "RPCAuth.Unauthenticate";
pub const GET_ALL_AUTHENTICATED: &str = "RPCAuth.GetAllAuthenticated";

/// URL path of a procedure.
#[must_use]
pub fn procedure_path(procedure: &str) -> String {
    format!("/rpc/{procedure}")
}
