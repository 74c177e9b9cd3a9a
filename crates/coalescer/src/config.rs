//! Runtime-mutable configuration for a [`crate::Coalescer`].
//!
//! Every field is read fresh on each admission decision (see
//! [`crate::coalescer::Coalescer::coalesce`]) rather than snapshotted once,
//! so an operator can flip `enabled` off during an incident, or widen
//! `max_version_gap`, without restarting the process.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

const DEFAULT_WINDOW_DURATION: Duration = Duration::from_millis(5);
const DEFAULT_MAX_WAIT_TIME: Duration = Duration::from_millis(100);
const DEFAULT_MAX_WAITERS_PER_GROUP: usize = 1000;
const DEFAULT_MAX_VERSION_GAP: u64 = 500;

/// Configuration for a [`crate::Coalescer`].
///
/// Construct with [`CoalesceConfig::builder`]; every setter also has a
/// runtime counterpart (`set_*`) so the live config an already-constructed
/// `Coalescer` holds can be adjusted in place.
#[derive(Debug)]
pub struct CoalesceConfig {
    window_duration_nanos: AtomicU64,
    max_wait_time_nanos: AtomicU64,
    max_waiters_per_group: AtomicUsize,
    max_version_gap: AtomicU64,
    enabled: AtomicBool,
    /// Used only for logging/metrics labels; not itself runtime-mutable.
    #[cfg_attr(not(any(feature = "metrics", feature = "tracing")), allow(dead_code))]
    name: Option<String>,
}

impl CoalesceConfig {
    /// Start building a config, beginning from the documented defaults.
    pub fn builder() -> CoalesceConfigBuilder {
        CoalesceConfigBuilder::new()
    }

    /// The leader's pre-query wait. Zero means no wait (leader queries
    /// immediately, at the cost of coalescing opportunity).
    pub fn window_duration(&self) -> Duration {
        Duration::from_nanos(self.window_duration_nanos.load(Ordering::Relaxed))
    }

    /// Set the leader's pre-query wait.
    pub fn set_window_duration(&self, duration: Duration) {
        self.window_duration_nanos
            .store(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    /// The follower's total wait bound.
    pub fn max_wait_time(&self) -> Duration {
        Duration::from_nanos(self.max_wait_time_nanos.load(Ordering::Relaxed))
    }

    /// Set the follower's total wait bound.
    pub fn set_max_wait_time(&self, duration: Duration) {
        self.max_wait_time_nanos
            .store(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    /// The admission cap on a single group's waiter list.
    pub fn max_waiters_per_group(&self) -> usize {
        self.max_waiters_per_group.load(Ordering::Relaxed)
    }

    /// Set the admission cap on a single group's waiter list.
    pub fn set_max_waiters_per_group(&self, max: usize) {
        self.max_waiters_per_group.store(max, Ordering::Relaxed);
    }

    /// The largest permitted `max_version - min_version` within a group.
    pub fn max_version_gap(&self) -> u64 {
        self.max_version_gap.load(Ordering::Relaxed)
    }

    /// Set the largest permitted `max_version - min_version` within a group.
    pub fn set_max_version_gap(&self, gap: u64) {
        self.max_version_gap.store(gap, Ordering::Relaxed);
    }

    /// When `false`, every call bypasses the coalescer and invokes
    /// `query_fn` directly.
    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Enable or disable the coalescer in place.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// The label used in log lines and metric tags, if one was configured.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl Default for CoalesceConfig {
    fn default() -> Self {
        CoalesceConfigBuilder::default().build()
    }
}

/// Builder for [`CoalesceConfig`].
#[derive(Debug, Clone)]
pub struct CoalesceConfigBuilder {
    window_duration: Duration,
    max_wait_time: Duration,
    max_waiters_per_group: usize,
    max_version_gap: u64,
    enabled: bool,
    name: Option<String>,
}

impl CoalesceConfigBuilder {
    /// Create a new builder, seeded with the documented defaults:
    /// a 5ms window, a 100ms follower wait bound, a 1000-waiter cap, and a
    /// 500-unit version-gap cap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the leader's pre-query wait. Pass `Duration::ZERO` to disable
    /// the window entirely (see the design notes on `WindowDuration = 0`).
    pub fn window_duration(mut self, duration: Duration) -> Self {
        self.window_duration = duration;
        self
    }

    /// Set the follower's total wait bound.
    pub fn max_wait_time(mut self, duration: Duration) -> Self {
        self.max_wait_time = duration;
        self
    }

    /// Set the admission cap on a single group's waiter list.
    pub fn max_waiters_per_group(mut self, max: usize) -> Self {
        self.max_waiters_per_group = max;
        self
    }

    /// Set the largest permitted version gap within a group.
    pub fn max_version_gap(mut self, gap: u64) -> Self {
        self.max_version_gap = gap;
        self
    }

    /// Set whether the coalescer starts enabled. Defaults to `true`.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set a name for this coalescer instance (used in logging/metrics).
    ///
    /// # Example
    ///
    /// ```rust
    /// use coalescer::CoalesceConfig;
    ///
    /// let config = CoalesceConfig::builder()
    ///     .name("chunk-catalog")
    ///     .build();
    /// ```
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Build the configuration.
    pub fn build(self) -> CoalesceConfig {
        CoalesceConfig {
            window_duration_nanos: AtomicU64::new(self.window_duration.as_nanos() as u64),
            max_wait_time_nanos: AtomicU64::new(self.max_wait_time.as_nanos() as u64),
            max_waiters_per_group: AtomicUsize::new(self.max_waiters_per_group),
            max_version_gap: AtomicU64::new(self.max_version_gap),
            enabled: AtomicBool::new(self.enabled),
            name: self.name,
        }
    }
}

impl Default for CoalesceConfigBuilder {
    fn default() -> Self {
        Self {
            window_duration: DEFAULT_WINDOW_DURATION,
            max_wait_time: DEFAULT_MAX_WAIT_TIME,
            max_waiters_per_group: DEFAULT_MAX_WAITERS_PER_GROUP,
            max_version_gap: DEFAULT_MAX_VERSION_GAP,
            enabled: true,
            name: None,
        }
    }
}
