//! Keeping peer caches in step with this one.
//!
//! Two directions: [`Broadcaster`] pushes each local login/logout to every
//! peer (best effort, never awaited by the request), and [`Bootstrap`] pulls a
//! full snapshot from one peer at startup.

pub mod bootstrap;
pub mod broadcast;

use crate::auth::Principal;
use std::{future::Future, pin::Pin};
use tokio::task::JoinHandle;

pub use self::bootstrap::{Bootstrap, BootstrapError, BootstrapOutcome, RetryPolicy};
pub use self::broadcast::{BroadcastReport, Broadcaster};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthChange {
    Authenticated,
    Unauthenticated,
}

/// Object-safe face of [`Broadcaster`], so callers need not name its generics.
pub trait Propagate: Send + Sync {
    /// Apply `change` to the local cache, then start the peer fan-out.
    ///
    /// The future resolves once the local cache reflects the change. The
    /// returned handle tracks the fan-out and may be dropped.
    fn announce<'a>(
        &'a self,
        change: AuthChange,
        principal: Principal,
    ) -> Pin<Box<dyn Future<Output = JoinHandle<BroadcastReport>> + Send + 'a>>;
}
