//! Runtime layer for the ingestion monitor.
//!
//! Collects one run's inputs from disk and drives the concurrent
//! detection cycle over them.

pub mod collector;
pub mod observer;
pub mod orchestrator;

pub use monitor_core as core;
pub use monitor_data as data;
