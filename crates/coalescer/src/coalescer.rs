//! The coalescer singleton: maps namespace to current group, enforces
//! admission policy, elects leaders, and runs the leader's query outside
//! the coordination lock.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use coalescer_core::events::{EventListener, EventListeners};
use coalescer_core::CoalescerEvent;
use hashbrown::HashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;

#[cfg(feature = "metrics")]
use metrics::{counter, describe_counter, gauge};

#[cfg(feature = "tracing")]
use tracing::{debug, warn};

use crate::config::CoalesceConfig;
use crate::error::CoalesceError;
use crate::group::{Group, Phase, Record, SharedResult, WaiterSlot};
use crate::stats::{CoalescerStats, CoalescerStatsSnapshot};

/// A process-wide singleton consulted on the request path of every catalog
/// query. Generic over `E`, the error type the caller-supplied `query_fn`
/// can fail with — one `Coalescer<E>` is shared by every caller of a given
/// query shape, the way one `CoalesceService<S, ..>` was shared per
/// upstream service in the layer this crate grew out of.
pub struct Coalescer<E>
where
    E: std::fmt::Debug + std::fmt::Display + Clone,
{
    config: Arc<CoalesceConfig>,
    groups: Mutex<HashMap<String, Group<E>>>,
    stats: CoalescerStats,
    shutdown: AtomicBool,
    shutdown_notify: Notify,
    next_generation: AtomicU64,
    events: EventListeners<CoalescerEvent>,
}

impl<E> Coalescer<E>
where
    E: std::fmt::Debug + std::fmt::Display + Clone,
{
    /// Create a new coalescer from the given configuration.
    pub fn new(config: Arc<CoalesceConfig>) -> Self {
        #[cfg(feature = "metrics")]
        {
            describe_counter!(
                "coalescer_requests_total",
                "Total number of coalesce() calls, partitioned by outcome role"
            );
            describe_counter!(
                "coalescer_queries_total",
                "Total number of underlying query_fn invocations"
            );
        }

        Self {
            config,
            groups: Mutex::new(HashMap::new()),
            stats: CoalescerStats::new(),
            shutdown: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
            next_generation: AtomicU64::new(0),
            events: EventListeners::new(),
        }
    }

    /// Register a listener for [`CoalescerEvent`]s emitted at the state
    /// transitions this coalescer drives through.
    pub fn add_event_listener<L>(&mut self, listener: L)
    where
        L: EventListener<CoalescerEvent> + 'static,
    {
        self.events.add(listener);
    }

    fn name(&self) -> &str {
        self.config.name().unwrap_or("<unnamed>")
    }

    fn next_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed)
    }

    /// Coalesce a query for `namespace` at `request_version`.
    ///
    /// `query_fn` is invoked at most once per maximal burst of requests
    /// that share a namespace and satisfy the version-gap policy; every
    /// coalesced caller in that burst receives the same [`SharedResult`].
    pub async fn coalesce<F, Fut>(
        &self,
        namespace: &str,
        request_version: u64,
        query_fn: F,
    ) -> Result<SharedResult, CoalesceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Vec<Record>, E>>,
    {
        self.stats.total_requests.fetch_add(1, Ordering::Relaxed);

        if self.shutdown.load(Ordering::Acquire) {
            return Err(CoalesceError::ShutdownInProgress);
        }

        if !self.config.enabled() {
            self.stats.actual_queries.fetch_add(1, Ordering::Relaxed);
            return query_fn().await.map(Arc::new).map_err(CoalesceError::Query);
        }

        enum Role<E> {
            Direct,
            Leader { generation: u64 },
            Follower {
                slot: Arc<WaiterSlot<E>>,
                notify: Arc<Notify>,
                deadline: Instant,
            },
        }

        let role = {
            let mut groups = self.groups.lock();

            if self.shutdown.load(Ordering::Acquire) {
                return Err(CoalesceError::ShutdownInProgress);
            }

            match groups.get_mut(namespace) {
                None => {
                    let generation = self.next_generation();
                    let leader_slot = Arc::new(WaiterSlot::new(request_version));
                    let group = Group::new(generation, Arc::clone(&leader_slot), request_version);
                    groups.insert(namespace.to_string(), group);
                    self.stats.active_groups.fetch_add(1, Ordering::Relaxed);

                    #[cfg(feature = "metrics")]
                    gauge!("coalescer_active_groups", "coalescer" => self.name().to_string())
                        .increment(1.0);

                    #[cfg(feature = "tracing")]
                    debug!(
                        coalescer = %self.name(),
                        namespace,
                        generation,
                        "elected leader for fresh coalescing group"
                    );

                    self.events.emit(&CoalescerEvent::LeaderElected {
                        name: self.name().to_string(),
                        timestamp: Instant::now(),
                        namespace: namespace.to_string(),
                        generation,
                    });

                    Role::Leader { generation }
                }
                Some(group) => {
                    if group.phase != Phase::Forming {
                        // The existing group has already moved past Forming:
                        // its leader dropped the lock and is mid-query (or
                        // about to remove it). §4.2 forbids appending to a
                        // Querying group, and §3 forbids a second Forming/
                        // Querying group for this namespace while one is
                        // still live, so this caller cannot coalesce into
                        // anything right now — it runs its own query,
                        // accounted the same way an overflowed request is.
                        self.stats.overflow_requests.fetch_add(1, Ordering::Relaxed);
                        self.stats.actual_queries.fetch_add(1, Ordering::Relaxed);

                        #[cfg(feature = "metrics")]
                        counter!("coalescer_requests_total", "coalescer" => self.name().to_string(), "role" => "overflow").increment(1);

                        self.events.emit(&CoalescerEvent::Overflow {
                            name: self.name().to_string(),
                            timestamp: Instant::now(),
                            namespace: namespace.to_string(),
                        });

                        Role::Direct
                    } else if group.waiters.len() >= self.config.max_waiters_per_group() {
                        self.stats.overflow_requests.fetch_add(1, Ordering::Relaxed);
                        self.stats.actual_queries.fetch_add(1, Ordering::Relaxed);

                        #[cfg(feature = "metrics")]
                        counter!("coalescer_requests_total", "coalescer" => self.name().to_string(), "role" => "overflow").increment(1);

                        self.events.emit(&CoalescerEvent::Overflow {
                            name: self.name().to_string(),
                            timestamp: Instant::now(),
                            namespace: namespace.to_string(),
                        });

                        Role::Direct
                    } else {
                        let new_min = group.min_version.min(request_version);
                        let new_max = group.max_version.max(request_version);

                        if new_max - new_min > self.config.max_version_gap() {
                            self.stats
                                .version_gap_skipped_requests
                                .fetch_add(1, Ordering::Relaxed);
                            self.stats.actual_queries.fetch_add(1, Ordering::Relaxed);

                            #[cfg(feature = "metrics")]
                            counter!("coalescer_requests_total", "coalescer" => self.name().to_string(), "role" => "version_gap_skip").increment(1);

                            self.events.emit(&CoalescerEvent::VersionGapSkipped {
                                name: self.name().to_string(),
                                timestamp: Instant::now(),
                                namespace: namespace.to_string(),
                                gap: new_max - new_min,
                            });

                            Role::Direct
                        } else {
                            group.min_version = new_min;
                            group.max_version = new_max;

                            let slot = Arc::new(WaiterSlot::new(request_version));
                            group.waiters.push(Arc::clone(&slot));
                            self.stats.coalesced_requests.fetch_add(1, Ordering::Relaxed);

                            #[cfg(feature = "metrics")]
                            counter!("coalescer_requests_total", "coalescer" => self.name().to_string(), "role" => "follower").increment(1);

                            Role::Follower {
                                slot,
                                notify: Arc::clone(&group.notify),
                                deadline: Instant::now() + self.config.max_wait_time(),
                            }
                        }
                    }
                }
            }
        };

        match role {
            Role::Direct => query_fn().await.map(Arc::new).map_err(CoalesceError::Query),
            Role::Leader { generation } => {
                self.run_leader(namespace, generation, query_fn).await
            }
            Role::Follower {
                slot,
                notify,
                deadline,
            } => self.wait_follower(slot, notify, deadline).await,
        }
    }

    async fn run_leader<F, Fut>(
        &self,
        namespace: &str,
        generation: u64,
        query_fn: F,
    ) -> Result<SharedResult, CoalesceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Vec<Record>, E>>,
    {
        let window = self.config.window_duration();
        if !window.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(window) => {}
                _ = self.shutdown_notify.notified() => {}
            }
        }

        if self.shutdown.load(Ordering::Acquire) {
            return Err(CoalesceError::ShutdownInProgress);
        }

        {
            let mut groups = self.groups.lock();
            if let Some(group) = groups.get_mut(namespace) {
                if group.generation == generation {
                    group.phase = Phase::Querying;
                }
            }
        }

        // The coordination lock is not held across this call: a single
        // slow namespace must never block admission decisions for every
        // other namespace.
        let outcome = query_fn().await;

        if self.shutdown.load(Ordering::Acquire) {
            // shutdown() has already marked every waiter in this group
            // (including this leader's own slot) Completed-with-error and
            // removed the group from the map.
            return Err(CoalesceError::ShutdownInProgress);
        }

        let shared_outcome: Result<SharedResult, E> = outcome.map(Arc::new);

        let published = {
            let mut groups = self.groups.lock();
            match groups.remove(namespace) {
                Some(group) if group.generation == generation => {
                    for waiter in &group.waiters {
                        let waiter_outcome = match &shared_outcome {
                            Ok(result) => Ok(Arc::clone(result)),
                            Err(err) => Err(CoalesceError::Query(err.clone())),
                        };
                        *waiter.outcome.lock() = Some(waiter_outcome);
                        waiter.done.store(true, Ordering::Release);
                    }
                    self.stats.active_groups.fetch_sub(1, Ordering::Relaxed);

                    #[cfg(feature = "metrics")]
                    gauge!("coalescer_active_groups", "coalescer" => self.name().to_string())
                        .decrement(1.0);

                    self.events.emit(&CoalescerEvent::GroupCompleted {
                        name: self.name().to_string(),
                        timestamp: Instant::now(),
                        namespace: namespace.to_string(),
                        generation,
                        waiter_count: group.waiters.len(),
                        success: shared_outcome.is_ok(),
                    });

                    group.notify.notify_waiters();
                    true
                }
                Some(other) => {
                    // Shouldn't happen: at most one group exists per
                    // namespace while Forming/Querying. Put it back rather
                    // than silently dropping a live group.
                    groups.insert(namespace.to_string(), other);
                    false
                }
                None => false,
            }
        };

        if !published || self.shutdown.load(Ordering::Acquire) {
            return Err(CoalesceError::ShutdownInProgress);
        }

        #[cfg(feature = "tracing")]
        if shared_outcome.is_err() {
            debug!(coalescer = %self.name(), namespace, generation, "leader query failed; error shared with all waiters");
        }

        self.stats.actual_queries.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        counter!("coalescer_queries_total", "coalescer" => self.name().to_string(), "role" => "leader").increment(1);

        shared_outcome.map_err(CoalesceError::Query)
    }

    async fn wait_follower(
        &self,
        slot: Arc<WaiterSlot<E>>,
        notify: Arc<Notify>,
        deadline: Instant,
    ) -> Result<SharedResult, CoalesceError<E>> {
        loop {
            if slot.done.load(Ordering::Acquire) {
                break;
            }

            if self.shutdown.load(Ordering::Acquire) && !slot.done.load(Ordering::Acquire) {
                return Err(CoalesceError::ShutdownInProgress);
            }

            let now = Instant::now();
            if now >= deadline {
                if slot.done.load(Ordering::Acquire) {
                    break;
                }
                self.stats.timeout_requests.fetch_add(1, Ordering::Relaxed);

                #[cfg(feature = "metrics")]
                counter!("coalescer_requests_total", "coalescer" => self.name().to_string(), "role" => "timed_out").increment(1);

                #[cfg(feature = "tracing")]
                warn!(coalescer = %self.name(), "follower wait exceeded max_wait_time");

                return Err(CoalesceError::ExceededTimeLimit);
            }

            let remaining = deadline - now;
            // Ignore the timeout's own result: the loop re-checks `done`,
            // the deadline, and shutdown on every iteration regardless of
            // why `notified()` returned (or didn't).
            let _ = tokio::time::timeout(remaining, notify.notified()).await;
        }

        slot.outcome
            .lock()
            .take()
            .expect("leader must write outcome before setting done")
    }

    /// Idempotently shut the coalescer down: every currently Forming or
    /// Querying group is marked Completed-with-error, every waiter is
    /// signaled, the group map is cleared, and subsequent calls fail
    /// immediately with [`CoalesceError::ShutdownInProgress`].
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut groups = self.groups.lock();
        let drained: Vec<_> = groups.drain().collect();
        drop(groups);

        for (_, group) in drained {
            for waiter in &group.waiters {
                *waiter.outcome.lock() = Some(Err(CoalesceError::ShutdownInProgress));
                waiter.done.store(true, Ordering::Release);
            }
            group.notify.notify_waiters();
            self.stats.active_groups.fetch_sub(1, Ordering::Relaxed);
        }

        self.shutdown_notify.notify_waiters();

        #[cfg(feature = "tracing")]
        debug!(coalescer = %self.name(), "shutdown initiated");

        self.events.emit(&CoalescerEvent::ShutdownInitiated {
            name: self.name().to_string(),
            timestamp: Instant::now(),
        });
    }

    /// Non-blocking observer for whether `shutdown()` has been called.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Take a snapshot of the stats counters.
    pub fn get_stats(&self) -> CoalescerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Zero the cumulative counters (see [`CoalescerStats::reset`]).
    pub fn reset_stats(&self) {
        self.stats.reset();
    }
}
