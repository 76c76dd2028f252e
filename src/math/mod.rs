//! Mathematical utilities

pub mod morton;

pub use morton::{decode_morton, encode_morton};
