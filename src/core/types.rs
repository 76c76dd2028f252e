//! Core type aliases and re-exports

pub use glam::UVec3;

/// Scalar voxel type; its byte width is recorded in the TSP header.
pub type Real = f32;

/// On-disk size of [`Real`] in bytes.
pub const REAL_SIZE: u32 = std::mem::size_of::<Real>() as u32;

/// Standard Result type for the builder
pub type Result<T> = std::result::Result<T, crate::core::error::Error>;
