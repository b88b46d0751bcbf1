//! One-shot message waits
//!
//! `EventWaiter` holds predicate-guarded callbacks against the single inbound
//! message stream. Each registration resolves exactly once: either the first
//! message its predicate accepts, or its deadline. Both paths remove the
//! registration from the pending map under the same mutex, so whichever side
//! removes it first runs its callback and the other finds nothing.

use crate::chat::InboundMessage;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

type Predicate = Box<dyn Fn(&InboundMessage) -> bool + Send + Sync>;
type OnMatch = Box<dyn FnOnce(InboundMessage) + Send>;
type OnTimeout = Box<dyn FnOnce() + Send>;

/// Handle of a registration, unique for the lifetime of the waiter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WaitId(u64);

struct Registration {
    predicate: Predicate,
    on_match: OnMatch,
    on_timeout: Option<OnTimeout>,
    deadline: Option<Instant>,
    /// Cancels the timer task once the registration is consumed by a match
    timer: Option<CancellationToken>,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("deadline", &self.deadline)
            .field("expires", &self.timer.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Inner {
    pending: Mutex<HashMap<WaitId, Registration>>,
    next_id: AtomicU64,
}

/// Shared registry of pending waits. Cloning yields another handle to the
/// same registry.
#[derive(Clone, Default)]
pub struct EventWaiter {
    inner: Arc<Inner>,
}

impl EventWaiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn pending_map(&self) -> MutexGuard<'_, HashMap<WaitId, Registration>> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a one-shot wait.
    ///
    /// `on_match` runs with the first dispatched message `predicate` accepts.
    /// If none arrives within `timeout`, `on_timeout` runs instead. A zero
    /// timeout registers without expiry and `on_timeout` is dropped unused.
    ///
    /// Must be called from within a Tokio runtime when `timeout` is non-zero.
    /// Predicates are evaluated while the registry lock is held and must not
    /// call back into the waiter.
    pub fn register<P, M, T>(
        &self,
        predicate: P,
        on_match: M,
        timeout: Duration,
        on_timeout: T,
    ) -> WaitId
    where
        P: Fn(&InboundMessage) -> bool + Send + Sync + 'static,
        M: FnOnce(InboundMessage) + Send + 'static,
        T: FnOnce() + Send + 'static,
    {
        let id = WaitId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let expires = !timeout.is_zero();
        let deadline = expires.then(|| Instant::now() + timeout);
        let timer = expires.then(CancellationToken::new);

        let registration = Registration {
            predicate: Box::new(predicate),
            on_match: Box::new(on_match),
            on_timeout: expires.then(|| Box::new(on_timeout) as OnTimeout),
            deadline,
            timer: timer.clone(),
        };
        self.pending_map().insert(id, registration);

        if let (Some(token), Some(deadline)) = (timer, deadline) {
            let waiter = self.clone();
            tokio::spawn(async move {
                tokio::select! {
                    biased;
                    () = token.cancelled() => {}
                    () = tokio::time::sleep_until(deadline) => waiter.expire(id),
                }
            });
        }

        tracing::trace!(wait_id = id.0, ?timeout, "Registered wait");
        id
    }

    /// Offer one inbound message to every pending registration.
    ///
    /// Matching registrations are removed before any callback runs, then
    /// their `on_match` callbacks are invoked outside the lock so they may
    /// register follow-up waits. Returns the number of callbacks invoked.
    pub fn dispatch(&self, message: &InboundMessage) -> usize {
        let matched: Vec<(WaitId, Registration)> = {
            let mut pending = self.pending_map();
            let ids: Vec<WaitId> = pending
                .iter()
                .filter(|(_, registration)| (registration.predicate)(message))
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id).map(|r| (id, r)))
                .collect()
        };

        let count = matched.len();
        for (id, registration) in matched {
            if let Some(timer) = registration.timer {
                timer.cancel();
            }
            tracing::trace!(wait_id = id.0, message_id = %message.id, "Wait matched");
            (registration.on_match)(message.clone());
        }
        count
    }

    /// Deadline path: remove the registration if still pending and run its
    /// timeout callback. A registration already consumed by a match is a no-op.
    fn expire(&self, id: WaitId) {
        let removed = self.pending_map().remove(&id);
        match removed {
            Some(registration) => {
                tracing::trace!(wait_id = id.0, "Wait expired");
                if let Some(on_timeout) = registration.on_timeout {
                    on_timeout();
                }
            }
            None => tracing::trace!(wait_id = id.0, "Timer fired after match, ignoring"),
        }
    }

    /// Number of registrations still waiting
    pub fn pending(&self) -> usize {
        self.pending_map().len()
    }

    /// Drop every pending registration without running any callback
    pub fn shutdown(&self) {
        let drained: Vec<Registration> = self.pending_map().drain().map(|(_, r)| r).collect();
        let count = drained.len();
        for registration in drained {
            if let Some(timer) = registration.timer {
                timer.cancel();
            }
        }
        if count > 0 {
            tracing::info!(count, "Discarded pending waits on shutdown");
        }
    }
}
