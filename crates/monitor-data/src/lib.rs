//! Data layer for the ingestion monitor.
//!
//! Loads file telemetry and profile documents, runs the detection rules
//! per source and groups the resulting incidents by workspace.

pub mod aggregator;
pub mod analysis;
pub mod profile;
pub mod reader;
pub mod rules;

pub use monitor_core as core;
