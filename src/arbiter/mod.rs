//! Admission arbiter: bounds how many requests may hold server resources.
//!
//! A single task owns the slot pool and the session map and processes typed
//! commands one at a time, so no lock guards that state. Callers talk to it
//! through a cloneable [`ArbiterHandle`] and only wait for the reply.
//!
//! Leases that outlive `read + response + write` timeouts are reclaimed by a
//! periodic sweep, which covers handlers that crashed or hung without releasing.

pub mod pool;

use crate::auth::Session;
use std::{collections::HashMap, time::Duration};
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::{interval, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

pub use self::pool::{Lease, SlotId, SlotPool};

const COMMAND_BUFFER: usize = 1024;
const DEFAULT_POOL_SIZE: usize = 2;
const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 120;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArbiterError {
    #[error("admission arbiter is not running")]
    Closed,
}

/// Per-phase request timeouts. Their sum is the longest a lease may live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeouts {
    pub request_read: Duration,
    pub response: Duration,
    pub response_write: Duration,
}

impl Timeouts {
    #[must_use]
    pub const fn from_millis(request_read: u64, response: u64, response_write: u64) -> Self {
        Self {
            request_read: Duration::from_millis(request_read),
            response: Duration::from_millis(response),
            response_write: Duration::from_millis(response_write),
        }
    }

    #[must_use]
    pub fn lease_budget(&self) -> Duration {
        self.request_read + self.response + self.response_write
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::from_millis(40, 2000, 1000)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ArbiterConfig {
    pool_size: usize,
    timeouts: Timeouts,
    sweep_interval: Duration,
}

impl ArbiterConfig {
    /// Default config: 2 slots, 40ms/2s/1s timeouts, sweep every 2 minutes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            timeouts: Timeouts::default(),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECONDS),
        }
    }

    #[must_use]
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    #[must_use]
    pub fn with_sweep_interval(mut self, sweep_interval: Duration) -> Self {
        self.sweep_interval = sweep_interval;
        self
    }

    #[must_use]
    pub const fn pool_size(&self) -> usize {
        self.pool_size
    }

    #[must_use]
    pub const fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of an acquire. `Exhausted` is a control signal, not a failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Admission {
    Granted { lease: Lease, session: Session },
    Exhausted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArbiterStatus {
    pub pool_size: usize,
    pub leased: usize,
    pub sessions: usize,
}

#[derive(Debug)]
enum Command {
    Acquire {
        session_id: String,
        reply: oneshot::Sender<Admission>,
    },
    Release {
        lease: Lease,
        reply: oneshot::Sender<bool>,
    },
    SetSession {
        session: Session,
        reply: oneshot::Sender<()>,
    },
    Sweep {
        reply: oneshot::Sender<usize>,
    },
    Status {
        reply: oneshot::Sender<ArbiterStatus>,
    },
}

/// State owned exclusively by the actor task.
#[derive(Debug)]
struct Arbiter {
    pool: SlotPool,
    sessions: HashMap<String, Session>,
    lease_budget: Duration,
}

impl Arbiter {
    fn new(config: &ArbiterConfig) -> Self {
        Self {
            pool: SlotPool::new(config.pool_size),
            sessions: HashMap::new(),
            lease_budget: config.timeouts.lease_budget(),
        }
    }

    fn handle(&mut self, command: Command, now: Instant) {
        match command {
            Command::Acquire { session_id, reply } => {
                let admission = self.acquire(&session_id, now);
                // Caller went away before the reply: hand the slot straight back.
                if let Err(Admission::Granted { lease, .. }) = reply.send(admission) {
                    self.pool.release(lease);
                }
            }
            Command::Release { lease, reply } => {
                let released = self.pool.release(lease);
                if !released {
                    debug!(slot = lease.slot, "release of a lease that is no longer current");
                }
                let _ = reply.send(released);
            }
            Command::SetSession { session, reply } => {
                self.sessions.insert(session.id.clone(), session);
                let _ = reply.send(());
            }
            Command::Sweep { reply } => {
                let reclaimed = self.pool.reclaim_expired(now, self.lease_budget);
                if !reclaimed.is_empty() {
                    warn!(?reclaimed, "reclaimed slots from timed out requests");
                }
                let _ = reply.send(reclaimed.len());
            }
            Command::Status { reply } => {
                let _ = reply.send(ArbiterStatus {
                    pool_size: self.pool.size(),
                    leased: self.pool.leased_count(),
                    sessions: self.sessions.len(),
                });
            }
        }
    }

    fn acquire(&mut self, session_id: &str, now: Instant) -> Admission {
        let Some(lease) = self.pool.lease(now) else {
            return Admission::Exhausted;
        };
        let session = self.resolve_session(session_id);
        Admission::Granted { lease, session }
    }

    fn resolve_session(&mut self, session_id: &str) -> Session {
        if !session_id.is_empty() {
            if let Some(session) = self.sessions.get(session_id) {
                return session.clone();
            }
        }
        let session = Session::mint();
        self.sessions.insert(session.id.clone(), session.clone());
        session
    }
}

/// Cloneable sender side of the arbiter actor.
#[derive(Clone, Debug)]
pub struct ArbiterHandle {
    tx: mpsc::Sender<Command>,
}

impl ArbiterHandle {
    /// Lease a slot and resolve (or mint) the session for `session_id`.
    ///
    /// # Errors
    /// Returns `ArbiterError::Closed` if the actor task has stopped.
    pub async fn acquire(&self, session_id: &str) -> Result<Admission, ArbiterError> {
        self.request(|reply| Command::Acquire {
            session_id: session_id.to_string(),
            reply,
        })
        .await
    }

    /// Return a leased slot to the pool. `Ok(false)` means the lease is no
    /// longer current: already released, or reclaimed by a sweep.
    ///
    /// # Errors
    /// Returns `ArbiterError::Closed` if the actor task has stopped.
    pub async fn release(&self, lease: Lease) -> Result<bool, ArbiterError> {
        self.request(|reply| Command::Release { lease, reply }).await
    }

    /// Upsert a session by id.
    ///
    /// # Errors
    /// Returns `ArbiterError::Closed` if the actor task has stopped.
    pub async fn set_session(&self, session: Session) -> Result<(), ArbiterError> {
        self.request(|reply| Command::SetSession { session, reply })
            .await
    }

    /// Reclaim expired leases, returning how many were freed.
    ///
    /// # Errors
    /// Returns `ArbiterError::Closed` if the actor task has stopped.
    pub async fn sweep(&self) -> Result<usize, ArbiterError> {
        self.request(|reply| Command::Sweep { reply }).await
    }

    /// # Errors
    /// Returns `ArbiterError::Closed` if the actor task has stopped.
    pub async fn status(&self) -> Result<ArbiterStatus, ArbiterError> {
        self.request(|reply| Command::Status { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ArbiterError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(command(reply))
            .await
            .map_err(|_| ArbiterError::Closed)?;
        rx.await.map_err(|_| ArbiterError::Closed)
    }
}

/// Start the arbiter actor. It runs until every handle is dropped.
#[must_use]
pub fn spawn(config: &ArbiterConfig) -> (ArbiterHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(COMMAND_BUFFER);
    let mut arbiter = Arbiter::new(config);

    info!(
        pool_size = config.pool_size,
        lease_budget_ms = u64::try_from(arbiter.lease_budget.as_millis()).unwrap_or(u64::MAX),
        "admission arbiter started"
    );

    let task = tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            arbiter.handle(command, Instant::now());
        }
        debug!("admission arbiter stopped");
    });

    (ArbiterHandle { tx }, task)
}

/// Periodically ask the arbiter to sweep expired leases, independent of traffic.
#[must_use]
pub fn spawn_sweeper(handle: ArbiterHandle, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match handle.sweep().await {
                Ok(0) => {}
                Ok(reclaimed) => debug!(reclaimed, "sweep completed"),
                Err(err) => {
                    debug!(error = %err, "stopping sweeper");
                    break;
                }
            }
        }
    })
}
