//! Error types for the TSP builder

use thiserror::Error;

/// Main error type for the builder
///
/// Every variant is terminal; the pipeline aborts with a diagnostic
/// identifying which stage failed.
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("input volume error: {0}")]
    Input(String),

    #[error("geometry error: {0}")]
    Geometry(String),

    #[error("timestep count {0} is not a power of two")]
    TimestepCount(u32),

    #[error("scratch file error: {0}")]
    Scratch(String),

    #[error("TSP write error: {0}")]
    TspWrite(String),

    #[error("invariant violation: {0}")]
    Invariant(String),
}
