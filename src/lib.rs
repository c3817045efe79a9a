//! # seopulse
//!
//! Metrics tracking, change detection, and A/B testing engine for content
//! optimization pipelines.
//!
//! The crate records per-URL metric snapshots into an append-only time-series
//! store, classifies deltas between consecutive snapshots, scans metric
//! histories for statistical outliers, and fires rule-driven alerts. A
//! separate A/B test lifecycle accumulates per-variant observations, compares
//! control and variant with Welch's t-test, and can deploy (and roll back)
//! the winning variant.

pub mod abtest;
pub mod alert;
pub mod anomaly;
pub mod change;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod stats;
pub mod storage;
pub mod store;
pub mod winner;

pub use engine::OptimizationEngine;
pub use error::{Error, Result};
