//! Lattice common types, errors, and utilities.
//!
//! This crate provides shared definitions used by the lattice workload
//! harness and any other front end driving the index layer.

pub mod config;
pub mod error;

pub use config::{parse_size, IndexKind, RunConfig, ALLOWED_THREAD_COUNTS};
pub use error::{LatticeError, Result};
