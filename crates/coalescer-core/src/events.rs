//! Event system for the coalescer.
//!
//! Provides a unified event system the coalescer can emit into for
//! observability and monitoring, independent of whether the `tracing` or
//! `metrics` features are enabled.

#[cfg(feature = "tracing")]
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Trait for events emitted by the coalescer.
pub trait CoalesceEvent: Send + Sync + fmt::Debug {
    /// Returns the type of event (e.g. "leader_elected", "group_completed").
    fn event_type(&self) -> &'static str;

    /// Returns when this event occurred.
    fn timestamp(&self) -> Instant;

    /// Returns the name of the coalescer instance that emitted this event.
    fn pattern_name(&self) -> &str;
}

/// Trait for listening to coalescer events.
pub trait EventListener<E: CoalesceEvent>: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &E);
}

/// Type alias for boxed event listeners.
pub type BoxedEventListener<E> = Arc<dyn EventListener<E>>;

/// A collection of event listeners.
#[derive(Clone)]
pub struct EventListeners<E: CoalesceEvent> {
    listeners: Vec<BoxedEventListener<E>>,
}

impl<E: CoalesceEvent> EventListeners<E> {
    /// Creates a new empty event listener collection.
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    /// Adds a listener to the collection.
    pub fn add<L>(&mut self, listener: L)
    where
        L: EventListener<E> + 'static,
    {
        self.listeners.push(Arc::new(listener));
    }

    /// Emits an event to all registered listeners.
    ///
    /// If a listener panics, the panic is caught and the remaining listeners
    /// will still be called. This ensures one misbehaving listener doesn't
    /// prevent others from receiving events. When the optional `tracing`
    /// feature is enabled, panicking listeners are logged as warnings; with the
    /// `metrics` feature enabled a counter is incremented for observability.
    pub fn emit(&self, event: &E) {
        for (index, listener) in self.listeners.iter().enumerate() {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener.on_event(event);
            }));

            if let Err(_panic_payload) = result {
                #[cfg(feature = "tracing")]
                log_listener_panic(index, event, _panic_payload.as_ref());

                #[cfg(feature = "metrics")]
                record_listener_panic_metric(event);

                #[cfg(not(feature = "tracing"))]
                let _ = index;

                #[cfg(not(any(feature = "tracing", feature = "metrics")))]
                let _ = _panic_payload;
            }
        }
    }

    /// Returns true if there are no listeners.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Returns the number of listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }
}

impl<E: CoalesceEvent> Default for EventListeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// A simple function-based event listener.
pub struct FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    f: F,
    _phantom: std::marker::PhantomData<E>,
}

impl<E, F> FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    /// Creates a new function-based listener.
    pub fn new(f: F) -> Self {
        Self {
            f,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<E, F> EventListener<E> for FnListener<E, F>
where
    E: CoalesceEvent,
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        (self.f)(event)
    }
}

#[cfg(feature = "tracing")]
fn log_listener_panic<E: CoalesceEvent>(
    index: usize,
    event: &E,
    panic_payload: &(dyn Any + Send),
) {
    let panic_message = panic_payload
        .downcast_ref::<&'static str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic_payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());

    tracing::warn!(
        listener_index = index,
        pattern = event.pattern_name(),
        event_type = event.event_type(),
        panic_message = %panic_message,
        "coalescer event listener panicked"
    );
}

#[cfg(feature = "metrics")]
fn record_listener_panic_metric<E: CoalesceEvent>(event: &E) {
    let pattern_label = event.pattern_name().to_string();
    let event_type_label = event.event_type().to_string();

    metrics::counter!(
        "coalescer_event_listener_panics_total",
        "pattern" => pattern_label,
        "event_type" => event_type_label
    )
    .increment(1);
}

/// Events emitted by the coalescer at the transition points described in
/// the admission algorithm and shutdown protocol.
///
/// These are the structured counterpart to the `tracing` call sites and
/// `metrics` counters in [`crate`]'s users — a host process can subscribe
/// without depending on either.
#[derive(Debug, Clone)]
pub enum CoalescerEvent {
    /// A caller became the leader for a fresh coalescing group.
    LeaderElected {
        /// Name of the coalescer instance (from `CoalesceConfig::name`).
        name: String,
        timestamp: Instant,
        namespace: String,
        generation: u64,
    },
    /// A group reached `Completed` and was published to its waiters.
    GroupCompleted {
        name: String,
        timestamp: Instant,
        namespace: String,
        generation: u64,
        waiter_count: usize,
        success: bool,
    },
    /// A request was routed to overflow because its group was at capacity.
    Overflow {
        name: String,
        timestamp: Instant,
        namespace: String,
    },
    /// A request was routed to the version-gap-skip path.
    VersionGapSkipped {
        name: String,
        timestamp: Instant,
        namespace: String,
        gap: u64,
    },
    /// A follower's wait exceeded `MaxWaitTime`.
    FollowerTimedOut {
        name: String,
        timestamp: Instant,
        namespace: String,
    },
    /// `shutdown()` was invoked.
    ShutdownInitiated { name: String, timestamp: Instant },
}

impl CoalesceEvent for CoalescerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CoalescerEvent::LeaderElected { .. } => "leader_elected",
            CoalescerEvent::GroupCompleted { .. } => "group_completed",
            CoalescerEvent::Overflow { .. } => "overflow",
            CoalescerEvent::VersionGapSkipped { .. } => "version_gap_skipped",
            CoalescerEvent::FollowerTimedOut { .. } => "follower_timed_out",
            CoalescerEvent::ShutdownInitiated { .. } => "shutdown_initiated",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            CoalescerEvent::LeaderElected { timestamp, .. }
            | CoalescerEvent::GroupCompleted { timestamp, .. }
            | CoalescerEvent::Overflow { timestamp, .. }
            | CoalescerEvent::VersionGapSkipped { timestamp, .. }
            | CoalescerEvent::FollowerTimedOut { timestamp, .. }
            | CoalescerEvent::ShutdownInitiated { timestamp, .. } => *timestamp,
        }
    }

    fn pattern_name(&self) -> &str {
        match self {
            CoalescerEvent::LeaderElected { name, .. }
            | CoalescerEvent::GroupCompleted { name, .. }
            | CoalescerEvent::Overflow { name, .. }
            | CoalescerEvent::VersionGapSkipped { name, .. }
            | CoalescerEvent::FollowerTimedOut { name, .. }
            | CoalescerEvent::ShutdownInitiated { name, .. } => name,
        }
    }
}
