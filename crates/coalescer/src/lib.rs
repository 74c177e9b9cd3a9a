//! A leader/follower query coalescer.
//!
//! This crate absorbs a thundering herd of near-identical queries against a
//! single logical resource — the motivating case is routing-metadata
//! lookups from thousands of router processes refreshing their chunk maps
//! against a centrally-stored catalog — and collapses them into a small
//! number of underlying queries.
//!
//! # How It Works
//!
//! 1. The first call for a given namespace becomes the *leader*: it waits
//!    a short `window_duration` to let concurrent callers join, then runs
//!    the caller-supplied `query_fn` once.
//! 2. Calls that arrive while a group is forming become *followers*: they
//!    wait for the leader's result instead of running their own query.
//! 3. The leader's result (or error) is fanned out to every follower by
//!    cheap `Arc` clone, not by copying records.
//! 4. A request whose version differs too much from the group's range, or
//!    that arrives once a group is already at its waiter cap, runs its own
//!    query immediately instead of joining.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use coalescer::{CoalesceConfig, Coalescer};
//!
//! # #[derive(Debug, Clone)]
//! # struct CatalogError;
//! # impl std::fmt::Display for CatalogError {
//! #     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//! #         write!(f, "catalog error")
//! #     }
//! # }
//! # async fn example() {
//! let coalescer: Coalescer<CatalogError> = Coalescer::new(Arc::new(CoalesceConfig::default()));
//!
//! let result = coalescer
//!     .coalesce("db.coll", 1000, || async {
//!         // Run the underlying catalog query here.
//!         Ok::<_, CatalogError>(vec![b"record".to_vec()])
//!     })
//!     .await;
//! # let _ = result;
//! # }
//! ```
//!
//! # Requirements
//!
//! - The query error type `E` must implement `Clone + Debug + Display`, so
//!   the same failure can be shared across every coalesced waiter.
//!
//! # Prior Art
//!
//! This pattern is also known as:
//! - **Singleflight** (Go's `golang.org/x/sync/singleflight`)
//! - **Request deduplication** / **request collapsing**
//! - **Cache stampede protection**

mod coalescer;
mod config;
mod error;
mod group;
mod stats;

pub use coalescer::Coalescer;
pub use config::{CoalesceConfig, CoalesceConfigBuilder};
pub use error::CoalesceError;
pub use group::{Record, SharedResult};
pub use stats::{CoalescerStats, CoalescerStatsSnapshot};

pub use coalescer_core::{CoalesceEvent, CoalescerEvent, EventListener, EventListeners, FnListener};
