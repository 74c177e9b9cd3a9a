//! Property-based tests for the query coalescer.
//!
//! Run with: cargo test --test property_tests
//!
//! These tests use proptest to generate random inputs and verify that
//! invariants hold.

pub mod coalesce;
