//! Integration tests for the resilient invoker
//!
//! These tests build the full component stack through the public API and
//! drive it the way an embedding service would.

pub mod invoker_flow;
pub mod metrics_test;
