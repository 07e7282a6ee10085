//! Shared helpers for FUSE mount tests.

#[macro_use]
pub mod harness;

#[allow(unused_imports)]
pub use harness::*;
