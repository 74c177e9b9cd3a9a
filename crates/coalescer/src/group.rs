//! The coalescing group: the transient coordination record a leader and its
//! followers share for the lifetime of one underlying query.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::CoalesceError;

/// An element of a query result. The coalescer never inspects record
/// contents; it only stores, counts, and hands them out.
pub type Record = Vec<u8>;

/// Shared, immutable ownership of an ordered sequence of [`Record`]s.
/// Cloning a `SharedResult` is a ref-count bump, not a copy: a single
/// underlying query's output fans out to every waiter in its group at O(1)
/// cost per waiter.
pub type SharedResult = Arc<Vec<Record>>;

/// Where a group is in its Forming → Querying → Completed lifecycle.
///
/// `Completed` is deliberately not a variant here: a group is observable in
/// that state only long enough to publish to its waiters, which in this
/// implementation happens atomically with its removal from the namespace
/// map (see [`crate::coalescer::Coalescer`]), so no caller ever looks up a
/// group and finds it `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Forming,
    Querying,
}

/// The shared slot a waiter's outcome is published into.
///
/// Co-owned by the caller's task (which holds its `Arc` until its `coalesce`
/// call returns) and by the group (which holds its `Arc` in `waiters` until
/// it publishes). This is the lifetime-safe replacement for the
/// stack-address trick a non-GC implementation would otherwise be tempted
/// to use: the slot outlives neither owner, so the leader can always
/// publish into it even if the caller that created it has already timed
/// out and stopped polling.
pub(crate) struct WaiterSlot<E> {
    /// The caller's own `request_version`. Not used by the coalescer for
    /// filtering (see the spec's open question on per-follower filtering);
    /// carried for callers that want to post-filter locally, and for
    /// diagnostics.
    #[allow(dead_code)]
    pub requested_version: u64,
    /// Set `true` by the leader (or by `shutdown()`) exactly once, after
    /// `outcome` has been written. Readers must load this with `Acquire`
    /// after an `Arc::clone`d `Notify` wakes them; the write side stores
    /// with `Release`.
    pub done: AtomicBool,
    pub outcome: Mutex<Option<Result<SharedResult, CoalesceError<E>>>>,
}

impl<E> WaiterSlot<E> {
    pub fn new(requested_version: u64) -> Self {
        Self {
            requested_version,
            done: AtomicBool::new(false),
            outcome: Mutex::new(None),
        }
    }
}

/// One coalescing group: all currently-admitted waiters for one namespace's
/// active generation.
pub(crate) struct Group<E> {
    /// Monotonically increasing per coalescer, not per namespace. Exists so
    /// that, even though this implementation never hands a stale group back
    /// out of the map (a completed group is removed in the same critical
    /// section that publishes to it), the identifier required by the
    /// design notes is a first-class, inspectable field rather than an
    /// implicit property of object identity.
    pub generation: u64,
    pub min_version: u64,
    pub max_version: u64,
    pub phase: Phase,
    pub waiters: Vec<Arc<WaiterSlot<E>>>,
    /// Cloned out to followers (and to the leader, for its pre-query
    /// window) before the coordination lock is dropped, so waiting never
    /// happens while the lock is held.
    pub notify: Arc<Notify>,
}

impl<E> Group<E> {
    pub fn new(generation: u64, leader: Arc<WaiterSlot<E>>, request_version: u64) -> Self {
        Self {
            generation,
            min_version: request_version,
            max_version: request_version,
            phase: Phase::Forming,
            waiters: vec![leader],
            notify: Arc::new(Notify::new()),
        }
    }
}
