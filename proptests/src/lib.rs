//! Property-based tests for the media gateway's pure building blocks.
//!
//! ## Running Tests
//!
//! ```bash
//! # Run all property tests
//! cargo test -p proptests
//!
//! # Run with more test cases (slower but more thorough)
//! PROPTEST_CASES=10000 cargo test -p proptests
//!
//! # Run specific test module
//! cargo test -p proptests plan
//! ```
//!
//! ## Test Categories
//!
//! - **Plan tests**: aligned windows reproduce exactly the requested bytes
//! - **Range tests**: header parsing bounds and error classes
//! - **RPC tests**: error classification is total and stable

// Re-export common for use in test modules
pub use common;

/// Shared test strategies and helpers.
pub mod strategies;

#[cfg(test)]
mod plan;
#[cfg(test)]
mod range;
#[cfg(test)]
mod rpc;
