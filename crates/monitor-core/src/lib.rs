//! Core types for the ingestion monitor.
//!
//! Holds the data model shared by every layer (file records, source
//! profiles, incidents), the error taxonomy, labeled-value extraction
//! helpers, date handling and CLI settings.

pub mod error;
pub mod extract;
pub mod models;
pub mod settings;
pub mod time_utils;

pub use error::{MonitorError, Result};
