//! End-to-end test support for the engram engine
//!
//! Provides isolated engine instances over temporary data roots plus
//! deterministic provider mocks, so scenarios run without any remote
//! service or model download.

pub mod harness;
pub mod mocks;
