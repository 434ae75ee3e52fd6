//! Asymmetric concurrency arbiter between sync passes and exclusive CRUD.
//!
//! A sync in progress rejects everything else immediately. An exclusive CRUD
//! operation in progress makes later requests of either kind wait their turn.
//! Waiters are served in ticket order; creates and reads never come here.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tracing::debug;

use offcache_common::{Error, Result};

/// Message of the `Locked` error returned while a sync holds the arbiter.
pub const SYNC_IN_PROGRESS: &str = "sync in progress";

/// Message of the `Locked` error returned to a second pending sync.
pub const SYNC_ALREADY_PENDING: &str = "another sync is already pending";

/// Kind of access requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    /// A whole sync pass.
    Sync,
    /// Update, delete, bulk delete, cache clear or password change.
    CrudExclusive,
}

/// Observable arbiter state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbiterState {
    Idle,
    /// Holder plus queued exclusive CRUD requests.
    CrudHeld(usize),
    SyncHeld,
}

#[derive(Debug)]
struct Waiter {
    ticket: u64,
    access: Access,
}

#[derive(Debug, Default)]
struct Inner {
    holder: Option<Access>,
    queue: VecDeque<Waiter>,
    next_ticket: u64,
}

/// Process-wide gate every sync and exclusive CRUD operation passes through.
#[derive(Default)]
pub struct Arbiter {
    inner: Mutex<Inner>,
    released: Notify,
}

impl fmt::Debug for Arbiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arbiter")
            .field("state", &self.state())
            .finish()
    }
}

impl Arbiter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Acquire the arbiter for `access`.
    ///
    /// # Postconditions
    /// - On success the returned guard holds the arbiter until dropped
    ///
    /// # Errors
    /// - `Locked` if a sync holds the arbiter
    /// - `Locked` for a sync request while another sync is queued
    ///
    /// Dropping the returned future while it waits gives up its place in
    /// the queue.
    pub async fn acquire(self: &Arc<Self>, access: Access) -> Result<ArbiterGuard> {
        let ticket = {
            let mut inner = self.lock();
            if inner.holder == Some(Access::Sync) {
                debug!("Rejecting {:?}: sync in progress", access);
                return Err(Error::Locked(SYNC_IN_PROGRESS.to_string()));
            }
            if access == Access::Sync && inner.queue.iter().any(|w| w.access == Access::Sync) {
                debug!("Rejecting sync: another sync is queued");
                return Err(Error::Locked(SYNC_ALREADY_PENDING.to_string()));
            }
            if inner.holder.is_none() && inner.queue.is_empty() {
                inner.holder = Some(access);
                debug!("Granted {:?}", access);
                return Ok(ArbiterGuard::new(self.clone(), access));
            }
            let ticket = inner.next_ticket;
            inner.next_ticket += 1;
            inner.queue.push_back(Waiter { ticket, access });
            debug!("Queued {:?} as ticket {}", access, ticket);
            ticket
        };

        let mut pending = PendingTicket {
            arbiter: self,
            ticket,
            granted: false,
        };
        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.lock();
                let first = inner.queue.front().map(|w| w.ticket);
                if inner.holder.is_none() && first == Some(ticket) {
                    inner.queue.pop_front();
                    inner.holder = Some(access);
                    pending.granted = true;
                    debug!("Granted {:?} to ticket {}", access, ticket);
                    return Ok(ArbiterGuard::new(self.clone(), access));
                }
            }

            notified.await;
        }
    }

    pub fn state(&self) -> ArbiterState {
        let inner = self.lock();
        match inner.holder {
            None => ArbiterState::Idle,
            Some(Access::Sync) => ArbiterState::SyncHeld,
            Some(Access::CrudExclusive) => ArbiterState::CrudHeld(
                1 + inner
                    .queue
                    .iter()
                    .filter(|w| w.access == Access::CrudExclusive)
                    .count(),
            ),
        }
    }

    /// Number of queued requests.
    pub fn waiting(&self) -> usize {
        self.lock().queue.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, access: Access) {
        self.lock().holder = None;
        debug!("Released {:?}", access);
        self.released.notify_waiters();
    }

    fn abandon(&self, ticket: u64) {
        self.lock().queue.retain(|w| w.ticket != ticket);
        debug!("Ticket {} abandoned", ticket);
        self.released.notify_waiters();
    }
}

/// Removes a queued ticket if the acquiring future is dropped before grant.
struct PendingTicket<'a> {
    arbiter: &'a Arbiter,
    ticket: u64,
    granted: bool,
}

impl Drop for PendingTicket<'_> {
    fn drop(&mut self) {
        if !self.granted {
            self.arbiter.abandon(self.ticket);
        }
    }
}

/// Held access. Releases the arbiter when dropped.
#[must_use = "the arbiter is released as soon as the guard is dropped"]
pub struct ArbiterGuard {
    arbiter: Arc<Arbiter>,
    access: Access,
}

impl ArbiterGuard {
    fn new(arbiter: Arc<Arbiter>, access: Access) -> Self {
        Self { arbiter, access }
    }

    pub fn access(&self) -> Access {
        self.access
    }
}

impl fmt::Debug for ArbiterGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArbiterGuard")
            .field("access", &self.access)
            .finish()
    }
}

impl Drop for ArbiterGuard {
    fn drop(&mut self) {
        self.arbiter.release(self.access);
    }
}
