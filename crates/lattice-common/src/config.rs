//! Configuration structures for lattice workload runs.

use crate::error::{LatticeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Worker-thread counts the harness accepts.
pub const ALLOWED_THREAD_COUNTS: [usize; 4] = [1, 4, 8, 16];

/// Which index implementation a run drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    /// Lock-free skip list (ordered, point operations).
    SkipList,
    /// Sharded hash index (unordered, point operations).
    InvertedIndex,
    /// Latch-coupled B+ tree (ordered, point and range operations).
    BPlusTree,
}

impl FromStr for IndexKind {
    type Err = LatticeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "skip-list" => Ok(IndexKind::SkipList),
            "inverted-index" => Ok(IndexKind::InvertedIndex),
            "bplus-tree" => Ok(IndexKind::BPlusTree),
            _ => Err(LatticeError::UnknownIndexKind(s.to_string())),
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            IndexKind::SkipList => "skip-list",
            IndexKind::InvertedIndex => "inverted-index",
            IndexKind::BPlusTree => "bplus-tree",
        };
        write!(f, "{}", tag)
    }
}

/// Configuration for a single load-then-run workload execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Index implementation under test.
    pub kind: IndexKind,
    /// Number of worker threads for the run phase.
    pub threads: usize,
    /// Generated key size in bytes (trace prefixes are padded to this).
    pub key_size: usize,
    /// Stored value size in bytes.
    pub value_size: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            kind: IndexKind::SkipList,
            threads: 1,
            key_size: 64,
            value_size: 64,
        }
    }
}

impl RunConfig {
    /// Validates the worker-thread count against the allowed set.
    pub fn validate(&self) -> Result<()> {
        if ALLOWED_THREAD_COUNTS.contains(&self.threads) {
            Ok(())
        } else {
            Err(LatticeError::InvalidThreadCount(self.threads))
        }
    }
}

/// Parses a size string like "64B", "4KB", or "1.5MB" into bytes.
///
/// Units are case-insensitive and scale by factors of 1024. A bare number
/// means bytes. The magnitude may be integer or decimal.
pub fn parse_size(input: &str) -> Result<usize> {
    let s = input.trim().to_ascii_lowercase();
    if s.is_empty() {
        return Err(LatticeError::InvalidSize(input.to_string()));
    }

    let num_end = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());
    let magnitude: f64 = s[..num_end]
        .parse()
        .map_err(|_| LatticeError::InvalidSize(input.to_string()))?;

    let factor = match s[num_end..].trim() {
        "" | "b" | "bytes" => 1.0,
        "kb" | "k" => 1024.0,
        "mb" | "m" => 1024.0 * 1024.0,
        _ => return Err(LatticeError::InvalidSize(input.to_string())),
    };

    Ok((magnitude * factor) as usize)
}
