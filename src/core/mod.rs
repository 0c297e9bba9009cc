//! Core functionality module
//!
//! Configuration, error handling, retry policy, part-number sessions and the
//! [`station::CaptureStation`] facade that ties the pipeline together.
//!
//! # Submodules
//!
//! - `config` - Configuration loading, saving, and management
//! - `error` - Error types and result aliases
//! - `retry` - Bounded exponential backoff for transient driver errors
//! - `sequence` - Per-part sequence number allocation
//! - `session` - Active part number and duplicate suppression
//! - `station` - Public facade

pub mod config;
pub mod error;
pub mod retry;
pub mod sequence;
pub mod session;
pub mod station;

pub use station::CaptureStation;
