//! Shared utilities.
//!
//! Hashing helpers and test helpers used across the crate.

pub mod hash;

#[cfg(test)]
pub mod testutil;
