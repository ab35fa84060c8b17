//! Integration test suite for shootflow.
//!
//! These tests drive flows and reconcile attempts end to end through the
//! public API, with an in-memory Shoot store and a scripted botanist in
//! place of real infrastructure.
//!
//! # Test Categories
//!
//! - `flow_execution`: Ordering, skipping, propagation, retry and cancellation
//! - `status_machine`: Retry-budget transitions across reconcile attempts
//! - `reconcile_e2e`: Full reconcile attempts through `ShootReconciler`
//!
//! Retry intervals are exercised on tokio's paused clock, so no test waits
//! in real time.


mod flow_execution;
