//! Shared observability infrastructure for the routing-metadata coalescer.
//!
//! Split out of the main coalescer crate the way `tower-resilience-core` is
//! split out of the individual pattern crates upstream: a single event
//! system that the coalescer emits into, without forcing a dependency on
//! `tracing` or `metrics` for callers who just want to subscribe in-process.

pub mod events;

pub use events::{CoalesceEvent, CoalescerEvent, EventListener, EventListeners, FnListener};
