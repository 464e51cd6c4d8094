//! Per-identifier leases: at most one in-flight retrieval per canonical key.
//!
//! The first caller for a key starts the work; later callers join it and
//! receive a clone of the same result. The table only holds a weak handle,
//! so the work is dropped (cancelled) once every waiter has gone away, while
//! a work item that still has waiters keeps running.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared, WeakShared};
use tracing::trace;

type Work<T> = Shared<BoxFuture<'static, T>>;

struct Flight<T> {
    id: u64,
    work: WeakShared<BoxFuture<'static, T>>,
}

/// Result of a leased call.
#[derive(Debug, Clone)]
pub struct Leased<T> {
    pub value: T,
    /// `true` if this caller joined work started by another caller.
    pub joined: bool,
}

/// Table of in-flight work keyed by canonical identifier.
pub struct LeaseTable<T> {
    flights: DashMap<String, Flight<T>>,
    next_id: AtomicU64,
}

impl<T> Default for LeaseTable<T> {
    fn default() -> Self {
        Self {
            flights: DashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<T> std::fmt::Debug for LeaseTable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseTable")
            .field("in_flight", &self.flights.len())
            .finish()
    }
}

/// Drops the table entry of an abandoned flight once its last waiter is gone.
///
/// Must be bound before the waiter's handle so it is dropped after it.
struct Release<'a, T> {
    table: &'a LeaseTable<T>,
    key: &'a str,
    id: u64,
}

impl<T> Drop for Release<'_, T> {
    fn drop(&mut self) {
        self.table
            .flights
            .remove_if(self.key, |_, f| f.id == self.id && f.work.upgrade().is_none());
    }
}

impl<T> LeaseTable<T>
where
    T: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with live work.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.flights
            .iter()
            .filter(|f| f.work.upgrade().is_some())
            .count()
    }

    /// Runs `make()` under the lease for `key`, or joins the work already
    /// running for it.
    pub async fn run<F, Fut>(&self, key: &str, make: F) -> Leased<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (work, id, joined) = match self.flights.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                let live = entry.get().work.upgrade();
                if let Some(work) = live {
                    (work, entry.get().id, true)
                } else {
                    let (work, flight) = self.start(make);
                    let id = flight.id;
                    entry.insert(flight);
                    (work, id, false)
                }
            }
            Entry::Vacant(entry) => {
                let (work, flight) = self.start(make);
                let id = flight.id;
                entry.insert(flight);
                (work, id, false)
            }
        };
        if joined {
            trace!(key, "joined in-flight work");
        }

        let release = Release {
            table: self,
            key,
            id,
        };
        let value = work.await;
        // Completed: later callers start fresh instead of reusing this result.
        self.flights.remove_if(key, |_, f| f.id == id);
        drop(release);
        Leased { value, joined }
    }

    fn start<F, Fut>(&self, make: F) -> (Work<T>, Flight<T>)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let work = make().boxed().shared();
        let weak = work
            .downgrade()
            .unwrap_or_else(|| unreachable!("fresh shared future cannot be complete"));
        (work, Flight { id, work: weak })
    }
}
