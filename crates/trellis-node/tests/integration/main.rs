//! Integration test entry point for trellis-node.
//!
//! Run with: cargo test --test integration

mod harness;

mod callback;
mod convergence;
mod messaging;
