//! Volume data structures and brick operations

pub mod brick;
pub mod dataset;

pub use brick::Brick;
pub use dataset::DatasetHeader;
